//! Decoding of the upstream map provider's packed AOI ("area of interest")
//! string format into usable rings.
//!
//! The wire format is `TYPE|BOUND|RING;RING;...`, where each `RING` is a
//! flat, comma-separated `x,y,x,y,...` coordinate list in web-Mercator
//! units. `TYPE` distinguishes a single simple ring (`1`) from a multi-ring
//! shape whose rings must be folded together (`2`/`3`), and a tagged-ring
//! variant (`4`) where each ring is prefixed `"1-"` (outer boundary) or
//! `"2-"` (hole) and only outer rings are kept.
//!
//! `decode` only parses; it never projects or folds. Ring coordinates are
//! still in whatever projection the upstream packed them in (Mercator) and
//! must be projected to WGS-84 by the caller before [`assemble`] combines
//! them into one shape.

use geo::{BooleanOps, Coord, Intersects, LineString, MultiPolygon, Polygon};
use thiserror::Error;
use wkt::ToWkt;

/// An error produced while decoding an AOI string.
#[derive(Debug, Error)]
pub enum AoiError {
    #[error("AOI string has too few `|`-separated fields: {0:?}")]
    TooFewFields(String),
    #[error("AOI type {0:?} is not a recognized integer")]
    InvalidType(String),
    #[error("AOI ring has an odd number of coordinate components: {0:?}")]
    OddCoordinateCount(String),
    #[error("AOI ring contains a non-numeric coordinate: {0:?}")]
    InvalidCoordinate(String),
    #[error("AOI has no rings left after filtering")]
    NoRings,
}

/// A decoded, unprojected AOI string: its type tag, the upstream-supplied
/// bounding string (kept verbatim, not reparsed — its grammar is
/// provider-specific and unused by any operation in this crate), and the
/// raw coordinate rings.
#[derive(Clone, Debug)]
pub struct Decoded {
    pub kind: i32,
    pub bound: String,
    pub rings: Vec<Vec<(f64, f64)>>,
}

/// Parse a packed AOI string into its raw (unprojected) rings.
pub fn decode(input: &str) -> Result<Decoded, AoiError> {
    let fields: Vec<&str> = input.splitn(3, '|').collect();
    if fields.len() < 3 {
        return Err(AoiError::TooFewFields(input.to_owned()));
    }
    let kind: i32 = fields[0]
        .parse()
        .map_err(|_| AoiError::InvalidType(fields[0].to_owned()))?;
    let bound = fields[1].to_owned();
    let rings_field = fields[2].trim_end_matches(';');

    let ring_strs: Vec<&str> = rings_field.split(';').filter(|s| !s.is_empty()).collect();

    let ring_strs: Vec<&str> = if kind == 4 {
        ring_strs
            .into_iter()
            .filter_map(|s| s.strip_prefix("1-"))
            .collect()
    } else {
        ring_strs
    };

    if ring_strs.is_empty() {
        return Err(AoiError::NoRings);
    }

    let mut rings = Vec::with_capacity(ring_strs.len());
    for ring_str in &ring_strs {
        rings.push(parse_ring(ring_str)?);
    }

    Ok(Decoded { kind, bound, rings })
}

fn parse_ring(ring_str: &str) -> Result<Vec<(f64, f64)>, AoiError> {
    let components: Vec<&str> = ring_str.split(',').filter(|s| !s.is_empty()).collect();
    if components.len() % 2 != 0 {
        return Err(AoiError::OddCoordinateCount(ring_str.to_owned()));
    }

    let mut coords = Vec::with_capacity(components.len() / 2);
    for pair in components.chunks(2) {
        let x: f64 = pair[0]
            .parse()
            .map_err(|_| AoiError::InvalidCoordinate(pair[0].to_owned()))?;
        let y: f64 = pair[1]
            .parse()
            .map_err(|_| AoiError::InvalidCoordinate(pair[1].to_owned()))?;
        coords.push((x, y));
    }
    Ok(coords)
}

/// Close `points` (if not already closed) and build a `Polygon`.
pub fn ring_to_polygon(points: &[(f64, f64)]) -> Polygon<f64> {
    let mut coords: Vec<Coord<f64>> = points.iter().map(|&(x, y)| Coord { x, y }).collect();
    if coords.first() != coords.last() {
        if let Some(&first) = coords.first() {
            coords.push(first);
        }
    }
    Polygon::new(LineString::new(coords), vec![])
}

/// Fold already-projected rings into one shape: starting from the first
/// ring, for each subsequent ring, if it intersects the working polygon,
/// replace working with their difference; else union it in.
pub fn fold(polygons: Vec<Polygon<f64>>) -> MultiPolygon<f64> {
    let mut iter = polygons.into_iter();
    let Some(first) = iter.next() else {
        return MultiPolygon(vec![]);
    };
    let mut working = MultiPolygon(vec![first]);
    for next in iter {
        let next = MultiPolygon(vec![next]);
        working = if working.intersects(&next) {
            working.difference(&next)
        } else {
            working.union(&next)
        };
    }
    working
}

/// Assemble already-projected rings into the final shape: a lone ring
/// passes through unchanged; multiple rings are folded.
pub fn assemble(polygons: Vec<Polygon<f64>>) -> MultiPolygon<f64> {
    if polygons.len() == 1 {
        MultiPolygon(polygons)
    } else {
        fold(polygons)
    }
}

/// Render a shape as WKT: `POLYGON` when it holds exactly one ring-set,
/// `MULTIPOLYGON` otherwise.
pub fn to_wkt(shape: &MultiPolygon<f64>) -> String {
    match shape.0.len() {
        1 => shape.0[0].wkt_string(),
        _ => shape.wkt_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;

    fn polygons(decoded: &Decoded) -> Vec<Polygon<f64>> {
        decoded.rings.iter().map(|r| ring_to_polygon(r)).collect()
    }

    #[test]
    fn decodes_a_single_ring() {
        let input = "1|0,0,1,1|0,0,1,0,1,1,0,1,0,0";
        let decoded = decode(input).unwrap();
        assert_eq!(decoded.kind, 1);
        assert_eq!(decoded.bound, "0,0,1,1");
        assert_eq!(decoded.rings.len(), 1);

        let shape = assemble(polygons(&decoded));
        assert_eq!(shape.0.len(), 1);
        assert!(shape.unsigned_area() > 0.0);
    }

    #[test]
    fn folds_multiple_disjoint_rings_by_union() {
        let input = "2|0,0,2,1|0,0,1,0,1,1,0,1,0,0;1,0,2,0,2,1,1,1,1,0";
        let decoded = decode(input).unwrap();
        assert_eq!(decoded.kind, 2);
        let shape = assemble(polygons(&decoded));
        // Two adjacent unit squares folded together should cover more area
        // than either alone.
        assert!(shape.unsigned_area() > 1.5);
    }

    #[test]
    fn folds_overlapping_rings_by_difference() {
        // Ring 2 overlaps the right half of ring 1; since they intersect,
        // folding subtracts it instead of unioning it.
        let input = "2|b|0,0,2,0,2,2,0,2,0,0;1,0,3,0,3,2,1,2,1,0";
        let decoded = decode(input).unwrap();
        let shape = assemble(polygons(&decoded));
        // The 2x2 square (area 4) minus its right half's overlap (area 2)
        // leaves area 2, not the unioned 6.
        assert!(shape.unsigned_area() < 4.0, "area was {}", shape.unsigned_area());
    }

    #[test]
    fn type_four_keeps_only_outer_rings() {
        let input = "4|b|1-0,0,1,0,1,1,0,1,0,0;2-0.2,0.2,0.4,0.2,0.4,0.4,0.2,0.4,0.2,0.2";
        let decoded = decode(input).unwrap();
        assert_eq!(decoded.rings.len(), 1);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(decode("not-enough-fields").is_err());
        assert!(decode("x|b|0,0,1,0").is_err());
        assert!(decode("1|b|0,0,1").is_err());
    }

    #[test]
    fn to_wkt_renders_a_single_ring_as_polygon_not_multipolygon() {
        let decoded = decode("1|0,0,1,1|0,0,1,0,1,1,0,1,0,0").unwrap();
        let shape = assemble(polygons(&decoded));
        assert!(to_wkt(&shape).starts_with("POLYGON"));
    }
}
