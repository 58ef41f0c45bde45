//! Geohash encoding, decoding, neighbor lookup and polygon tiling.
//!
//! Ported from the reference `python-geohash`-derived algorithm used by the
//! original crawler (base32 alphabet, neighbor/border lookup tables, BFS
//! tiling with recursive per-cell refinement). The BFS tiler and the
//! recursive refinement step are kept as close to the original control flow
//! as an owned `VecDeque`/`HashSet` based implementation allows.

use std::collections::{HashSet, VecDeque};

use geo::{Contains, Coord, Intersects, LineString, Polygon};

const BASE32: &[u8] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Direction used by [`adjacent`] and [`neighbor`]. The order matches the
/// original neighbor/border lookup tables: south, north, west, east.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    South = 0,
    North = 1,
    West = 2,
    East = 3,
}

const NEIGHBORS: [[&str; 2]; 4] = [
    // South
    [
        "14365h7k9dcfesgujnmqp0r2twvyx8zb",
        "238967debc01fg45kmstqrwxuvhjyznp",
    ],
    // North
    [
        "p0r21436x8zb9dcf5h7kjnmqesgutwvy",
        "bc01fg45238967deuvhjyznpkmstqrwx",
    ],
    // West
    [
        "238967debc01fg45kmstqrwxuvhjyznp",
        "14365h7k9dcfesgujnmqp0r2twvyx8zb",
    ],
    // East
    [
        "bc01fg45238967deuvhjyznpkmstqrwx",
        "p0r21436x8zb9dcf5h7kjnmqesgutwvy",
    ],
];

const BORDERS: [[&str; 2]; 4] = [
    // South
    ["028b", "0145hjnp"],
    // North
    ["prxz", "bcfguvyz"],
    // West
    ["0145hjnp", "028b"],
    // East
    ["bcfguvyz", "prxz"],
];

fn base32_index(c: u8) -> usize {
    BASE32.iter().position(|&b| b == c).expect("invalid base32 geohash character")
}

/// A decoded geohash cell.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn center(&self) -> (f64, f64) {
        ((self.min_lat + self.max_lat) / 2.0, (self.min_lon + self.max_lon) / 2.0)
    }
}

/// Encode a `(lat, lon)` point to a geohash of the given character length.
pub fn encode(lat: f64, lon: f64, precision: usize) -> String {
    let mut lat_range = (-90.0, 90.0);
    let mut lon_range = (-180.0, 180.0);
    let mut is_lon = true;
    let mut bit = 0u8;
    let mut ch = 0u8;
    let mut out = String::with_capacity(precision);

    while out.len() < precision {
        if is_lon {
            let mid = (lon_range.0 + lon_range.1) / 2.0;
            if lon >= mid {
                ch |= 1 << (4 - bit);
                lon_range.0 = mid;
            } else {
                lon_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if lat >= mid {
                ch |= 1 << (4 - bit);
                lat_range.0 = mid;
            } else {
                lat_range.1 = mid;
            }
        }
        is_lon = !is_lon;
        if bit < 4 {
            bit += 1;
        } else {
            out.push(BASE32[ch as usize] as char);
            bit = 0;
            ch = 0;
        }
    }
    out
}

/// Decode a geohash to its bounding box.
pub fn bbox(geohash: &str) -> BoundingBox {
    let mut lat_range = (-90.0, 90.0);
    let mut lon_range = (-180.0, 180.0);
    let mut is_lon = true;

    for c in geohash.bytes() {
        let idx = base32_index(c);
        for bit in (0..5).rev() {
            let bitval = (idx >> bit) & 1;
            if is_lon {
                let mid = (lon_range.0 + lon_range.1) / 2.0;
                if bitval == 1 {
                    lon_range.0 = mid;
                } else {
                    lon_range.1 = mid;
                }
            } else {
                let mid = (lat_range.0 + lat_range.1) / 2.0;
                if bitval == 1 {
                    lat_range.0 = mid;
                } else {
                    lat_range.1 = mid;
                }
            }
            is_lon = !is_lon;
        }
    }

    BoundingBox {
        min_lat: lat_range.0,
        max_lat: lat_range.1,
        min_lon: lon_range.0,
        max_lon: lon_range.1,
    }
}

/// Decode a geohash to its centroid `(lat, lon)` plus the half-width of its
/// bounding box in each axis (`lat_err`, `lon_err`): the centroid is accurate
/// to within these margins.
pub fn decode(geohash: &str) -> (f64, f64, f64, f64) {
    let b = bbox(geohash);
    let (lat, lon) = b.center();
    (lat, lon, (b.max_lat - b.min_lat) / 2.0, (b.max_lon - b.min_lon) / 2.0)
}

/// The single geohash adjacent to `geohash` in `direction`.
fn adjacent(geohash: &str, direction: Direction) -> String {
    let geohash = geohash.to_lowercase();
    let last = *geohash.as_bytes().last().expect("empty geohash");
    let parent = &geohash[..geohash.len() - 1];
    let parity = (geohash.len() - 1) % 2; // 0 = even, 1 = odd

    let dir_idx = direction as usize;
    let parent = if BORDERS[dir_idx][parity]
        .as_bytes()
        .contains(&last)
        && !parent.is_empty()
    {
        adjacent(parent, direction)
    } else {
        parent.to_owned()
    };

    let neighbor_idx = NEIGHBORS[dir_idx][parity]
        .as_bytes()
        .iter()
        .position(|&b| b == last)
        .expect("geohash character not found in neighbor table");
    format!("{}{}", parent, BASE32[neighbor_idx] as char)
}

/// The single geohash adjacent to `geohash` in `direction`.
pub fn neighbor(geohash: &str, direction: Direction) -> String {
    adjacent(geohash, direction)
}

/// The eight geohashes neighboring `geohash` (N, S, E, W, NE, NW, SE, SW).
pub fn neighbors(geohash: &str) -> [String; 8] {
    let n = adjacent(geohash, Direction::North);
    let s = adjacent(geohash, Direction::South);
    let e = adjacent(geohash, Direction::East);
    let w = adjacent(geohash, Direction::West);
    let ne = adjacent(&n, Direction::East);
    let nw = adjacent(&n, Direction::West);
    let se = adjacent(&s, Direction::East);
    let sw = adjacent(&s, Direction::West);
    [n, s, e, w, ne, nw, se, sw]
}

/// The geohash cell as a `geo::Polygon` (lon, lat order).
pub fn to_polygon(geohash: &str) -> Polygon<f64> {
    bbox_to_polygon(&bbox(geohash))
}

fn bbox_to_polygon(b: &BoundingBox) -> Polygon<f64> {
    let ring = LineString::from(vec![
        Coord { x: b.min_lon, y: b.min_lat },
        Coord { x: b.max_lon, y: b.min_lat },
        Coord { x: b.max_lon, y: b.max_lat },
        Coord { x: b.min_lon, y: b.max_lat },
        Coord { x: b.min_lon, y: b.min_lat },
    ]);
    Polygon::new(ring, vec![])
}

/// BFS tiling of `polygon` at a single `precision`, classifying each visited
/// cell as fully contained ("inner") or merely intersecting.
fn tile_at_precision(
    polygon: &Polygon<f64>,
    precision: usize,
) -> (HashSet<String>, HashSet<String>) {
    let mut inner = HashSet::new();
    let mut intersecting = HashSet::new();
    let mut visited = HashSet::new();

    let exterior = polygon.exterior();
    let Some(seed_point) = exterior.points().next() else {
        return (inner, intersecting);
    };
    let seed = encode(seed_point.y(), seed_point.x(), precision);

    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(seed.clone());
    visited.insert(seed);

    while let Some(current) = queue.pop_front() {
        let cell = to_polygon(&current);
        if polygon.contains(&cell) {
            inner.insert(current.clone());
        } else if polygon.intersects(&cell) {
            intersecting.insert(current.clone());
        } else {
            continue;
        }

        for neighbor in neighbors(&current) {
            if visited.insert(neighbor.clone()) {
                queue.push_back(neighbor);
            }
        }
    }

    (inner, intersecting)
}

/// Tile `polygon` with geohashes between `start_precision` and
/// `stop_precision` characters, optionally including boundary-intersecting
/// cells at the finest precision reached.
///
/// Mirrors the original `polygon_geohasher`: tile once at `start_precision`;
/// if nothing intersects (can happen for slivers smaller than a single
/// cell), retry one precision finer; otherwise keep the fully-contained
/// cells and recursively refine each intersecting cell, one extra character
/// at a time, down to `stop_precision`.
pub fn polygon_geohasher(
    polygon: &Polygon<f64>,
    start_precision: usize,
    stop_precision: usize,
    intersect: bool,
) -> HashSet<String> {
    assert!(start_precision <= stop_precision);

    let mut precision = start_precision;
    let (inner, intersecting) = loop {
        let (inner, intersecting) = tile_at_precision(polygon, precision);
        if !intersecting.is_empty() || precision >= stop_precision {
            break (inner, intersecting);
        }
        precision += 1;
    };

    if precision >= stop_precision {
        let mut result = inner;
        if intersect {
            result.extend(intersecting);
        }
        return result;
    }

    let mut result = inner;
    for cell in intersecting {
        result.extend(refine_cell(polygon, &cell, precision, stop_precision, intersect));
    }
    result
}

/// Recursively append one base32 character at a time to `cell`, descending
/// toward `stop_precision`, keeping fully-contained children and recursing
/// into children that merely intersect.
fn refine_cell(
    polygon: &Polygon<f64>,
    cell: &str,
    precision: usize,
    stop_precision: usize,
    intersect: bool,
) -> HashSet<String> {
    let mut result = HashSet::new();
    if precision >= stop_precision {
        if intersect {
            result.insert(cell.to_owned());
        }
        return result;
    }

    for &c in BASE32 {
        let child = format!("{}{}", cell, c as char);
        let child_poly = to_polygon(&child);
        if polygon.contains(&child_poly) {
            result.insert(child);
        } else if polygon.intersects(&child_poly) {
            result.extend(refine_cell(
                polygon,
                &child,
                precision + 1,
                stop_precision,
                intersect,
            ));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{BoundingRect, Rect};

    #[test]
    fn encode_decode_round_trip_is_close() {
        let (lat, lon) = (39.9042, 116.4074);
        let hash = encode(lat, lon, 9);
        let (d_lat, d_lon, lat_err, lon_err) = decode(&hash);
        assert!((d_lat - lat).abs() < 1e-3);
        assert!((d_lon - lon).abs() < 1e-3);
        assert!(lat_err > 0.0 && lat_err < 1e-3);
        assert!(lon_err > 0.0 && lon_err < 1e-3);
    }

    #[test]
    fn decode_error_margins_shrink_with_precision() {
        let (_, _, lat_err6, lon_err6) = decode(&encode(39.9042, 116.4074, 6));
        let (_, _, lat_err9, lon_err9) = decode(&encode(39.9042, 116.4074, 9));
        assert!(lat_err9 < lat_err6);
        assert!(lon_err9 < lon_err6);
    }

    #[test]
    fn neighbors_are_adjacent_and_distinct() {
        let hash = encode(39.9042, 116.4074, 6);
        let ns = neighbors(&hash);
        let unique: HashSet<_> = ns.iter().collect();
        assert_eq!(unique.len(), 8);
        assert!(!ns.contains(&hash));
    }

    #[test]
    fn neighbor_in_a_single_direction_matches_the_full_neighbor_set() {
        let hash = encode(39.9042, 116.4074, 6);
        let ns = neighbors(&hash);
        assert_eq!(neighbor(&hash, Direction::North), ns[0]);
        assert_eq!(neighbor(&hash, Direction::South), ns[1]);
        assert_eq!(neighbor(&hash, Direction::East), ns[2]);
        assert_eq!(neighbor(&hash, Direction::West), ns[3]);
    }

    #[test]
    fn tiling_covers_a_bbox_polygon_and_stays_within_its_bounds() {
        let square = Polygon::new(
            LineString::from(vec![
                (116.30, 39.80),
                (116.50, 39.80),
                (116.50, 39.95),
                (116.30, 39.95),
                (116.30, 39.80),
            ]),
            vec![],
        );
        let cells = polygon_geohasher(&square, 5, 6, true);
        assert!(!cells.is_empty());

        let bounds: Rect<f64> = square.bounding_rect().unwrap();
        for cell in &cells {
            let b = bbox(cell);
            // Every tiled cell must at least touch the source polygon's
            // bounding box; cells cannot appear from nowhere.
            assert!(b.max_lon >= bounds.min().x - 0.2 && b.min_lon <= bounds.max().x + 0.2);
            assert!(b.max_lat >= bounds.min().y - 0.2 && b.min_lat <= bounds.max().y + 0.2);
        }
    }

    #[test]
    fn same_start_and_stop_precision_returns_single_pass_tiling() {
        let square = Polygon::new(
            LineString::from(vec![
                (116.30, 39.80),
                (116.50, 39.80),
                (116.50, 39.95),
                (116.30, 39.95),
                (116.30, 39.80),
            ]),
            vec![],
        );
        let cells = polygon_geohasher(&square, 5, 5, true);
        assert!(!cells.is_empty());
        for cell in &cells {
            assert_eq!(cell.len(), 5);
        }
    }
}
