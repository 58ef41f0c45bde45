//! Coordinate system transforms between WGS-84, GCJ-02, BD-09 and Web
//! Mercator.
//!
//! The original implementation picked a conversion function at runtime by
//! string-concatenating `"{old}_to_{new}"` and looking the result up with
//! `getattr`. We replace that with an exhaustive match over a closed
//! [`Projection`] enum, per the design notes: a typo in a config file or a
//! new projection can no longer silently resolve to `None` at call time.

use thiserror::Error;

/// A coordinate reference system understood by this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Projection {
    /// WGS-84, the GPS datum.
    Wgs84,
    /// GCJ-02, the obfuscated datum used by Chinese web maps.
    Gcj02,
    /// BD-09, Baidu's further-obfuscated datum.
    Bd09,
    /// Spherical Web Mercator, in meters.
    WebMercator,
}

/// Earth radius (meters) used for both the GCJ-02 correction polynomials and
/// the Web Mercator projection, matching the upstream providers' shared
/// Krasovsky-1940-derived constant.
const EARTH_RADIUS: f64 = 6378245.0;
const ECCENTRICITY_SQUARED: f64 = 0.00669342162296594323;
const X_PI: f64 = std::f64::consts::PI * 3000.0 / 180.0;

/// Transform `(lon, lat)` from `from` to `to`. Returns the input unchanged
/// when `from == to`.
pub fn transform(from: Projection, to: Projection, lon: f64, lat: f64) -> (f64, f64) {
    use Projection::*;
    match (from, to) {
        (a, b) if a == b => (lon, lat),

        (Wgs84, Gcj02) => wgs84_to_gcj02(lon, lat),
        (Gcj02, Wgs84) => gcj02_to_wgs84(lon, lat),
        (Gcj02, Bd09) => gcj02_to_bd09(lon, lat),
        (Bd09, Gcj02) => bd09_to_gcj02(lon, lat),
        (Wgs84, Bd09) => wgs84_to_bd09(lon, lat),
        (Bd09, Wgs84) => bd09_to_wgs84(lon, lat),
        (Wgs84, WebMercator) => wgs84_to_web_mercator(lon, lat),
        (WebMercator, Wgs84) => web_mercator_to_wgs84(lon, lat),
        (Bd09, WebMercator) => bd09_to_web_mercator(lon, lat),
        (WebMercator, Bd09) => web_mercator_to_bd09(lon, lat),
        (Gcj02, WebMercator) => {
            let (lon, lat) = gcj02_to_wgs84(lon, lat);
            wgs84_to_web_mercator(lon, lat)
        }
        (WebMercator, Gcj02) => {
            let (lon, lat) = web_mercator_to_wgs84(lon, lat);
            wgs84_to_gcj02(lon, lat)
        }
    }
}

/// Whether a WGS-84 point falls (roughly) outside mainland China, where the
/// GCJ-02 obfuscation does not apply.
fn out_of_china(lon: f64, lat: f64) -> bool {
    !(73.66..=135.05).contains(&lon) || !(3.86..=53.55).contains(&lat)
}

fn transform_lat(x: f64, y: f64) -> f64 {
    use std::f64::consts::PI;
    let mut ret = -100.0 + 2.0 * x + 3.0 * y + 0.2 * y * y + 0.1 * x * y + 0.2 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (y * PI).sin() + 40.0 * (y / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (160.0 * (y / 12.0 * PI).sin() + 320.0 * (y * PI / 30.0).sin()) * 2.0 / 3.0;
    ret
}

fn transform_lng(x: f64, y: f64) -> f64 {
    use std::f64::consts::PI;
    let mut ret = 300.0 + x + 2.0 * y + 0.1 * x * x + 0.1 * x * y + 0.1 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (x * PI).sin() + 40.0 * (x / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (150.0 * (x / 12.0 * PI).sin() + 300.0 * (x / 30.0 * PI).sin()) * 2.0 / 3.0;
    ret
}

fn wgs84_to_gcj02(lon: f64, lat: f64) -> (f64, f64) {
    if out_of_china(lon, lat) {
        return (lon, lat);
    }
    let d_lat = transform_lat(lon - 105.0, lat - 35.0);
    let d_lng = transform_lng(lon - 105.0, lat - 35.0);
    let rad_lat = lat / 180.0 * std::f64::consts::PI;
    let magic = 1.0 - ECCENTRICITY_SQUARED * rad_lat.sin().powi(2);
    let sqrt_magic = magic.sqrt();
    let d_lat = (d_lat * 180.0)
        / ((EARTH_RADIUS * (1.0 - ECCENTRICITY_SQUARED)) / (magic * sqrt_magic)
            * std::f64::consts::PI);
    let d_lng =
        (d_lng * 180.0) / (EARTH_RADIUS / sqrt_magic * rad_lat.cos() * std::f64::consts::PI);
    (lon + d_lng, lat + d_lat)
}

/// The classic approximate inverse: apply the forward transform once more
/// and reflect the offset. This is what every Chinese-web-map "coordtransform"
/// implementation actually ships (there is no closed-form inverse).
fn gcj02_to_wgs84(lon: f64, lat: f64) -> (f64, f64) {
    if out_of_china(lon, lat) {
        return (lon, lat);
    }
    let (mg_lng, mg_lat) = wgs84_to_gcj02(lon, lat);
    (lon * 2.0 - mg_lng, lat * 2.0 - mg_lat)
}

fn gcj02_to_bd09(lon: f64, lat: f64) -> (f64, f64) {
    let z = (lon * lon + lat * lat).sqrt() + 0.00002 * (lat * X_PI).sin();
    let theta = lat.atan2(lon) + 0.000003 * (lon * X_PI).cos();
    (z * theta.cos() + 0.0065, z * theta.sin() + 0.006)
}

fn bd09_to_gcj02(lon: f64, lat: f64) -> (f64, f64) {
    let x = lon - 0.0065;
    let y = lat - 0.006;
    let z = (x * x + y * y).sqrt() - 0.00002 * (y * X_PI).sin();
    let theta = y.atan2(x) - 0.000003 * (x * X_PI).cos();
    (z * theta.cos(), z * theta.sin())
}

fn wgs84_to_bd09(lon: f64, lat: f64) -> (f64, f64) {
    let (lon, lat) = wgs84_to_gcj02(lon, lat);
    gcj02_to_bd09(lon, lat)
}

fn bd09_to_wgs84(lon: f64, lat: f64) -> (f64, f64) {
    let (lon, lat) = bd09_to_gcj02(lon, lat);
    gcj02_to_wgs84(lon, lat)
}

fn wgs84_to_web_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = lon * std::f64::consts::PI / 180.0 * EARTH_RADIUS;
    let y = ((std::f64::consts::FRAC_PI_4) + lat * std::f64::consts::PI / 360.0)
        .tan()
        .ln()
        * EARTH_RADIUS;
    (x, y)
}

fn web_mercator_to_wgs84(x: f64, y: f64) -> (f64, f64) {
    let lon = x / EARTH_RADIUS * 180.0 / std::f64::consts::PI;
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2) * 180.0
        / std::f64::consts::PI;
    (lon, lat)
}

/// Correctly derived: BD-09 -> GCJ-02 -> WGS-84 -> Web Mercator.
///
/// The original implementation's `bd09_to_webMercator` instead computed
/// bd09 -> gcj02 -> bd09 again, never actually reaching Mercator space. We
/// compose the real chain instead of reproducing that bug.
fn bd09_to_web_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let (lon, lat) = bd09_to_gcj02(lon, lat);
    let (lon, lat) = gcj02_to_wgs84(lon, lat);
    wgs84_to_web_mercator(lon, lat)
}

fn web_mercator_to_bd09(x: f64, y: f64) -> (f64, f64) {
    let (lon, lat) = web_mercator_to_wgs84(x, y);
    let (lon, lat) = wgs84_to_gcj02(lon, lat);
    gcj02_to_bd09(lon, lat)
}

/// Round to six decimal places, the precision a [`crate::poi::PoiRecord`]'s
/// coordinates are always materialized at.
pub fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}

/// Latitude-band thresholds (descending) for
/// [`web_mercator_to_bd09_inline`]'s polynomial row selection. This is
/// Baidu's internal "BD09MC" grid used only to pack AOI ring coordinates —
/// a different projection from the standard spherical web-Mercator the
/// rest of this module converts.
const MC_BANDS: [f64; 6] = [
    12890594.86,
    8362377.87,
    5591021.0,
    3481989.83,
    1678043.12,
    0.0,
];

/// Per-band polynomial coefficients, one row per [`MC_BANDS`] entry; the
/// last column is the divisor applied to `|lat|` before evaluating the
/// latitude polynomial.
const MC2LL: [[f64; 10]; 6] = [
    [
        1.410526172116255e-8,
        0.00000898305509648872,
        -1.9939833816331,
        200.9824383106796,
        -187.2403703815547,
        91.6087516669843,
        -23.38765649603339,
        2.57121317296198,
        -0.03801003308653,
        17337981.2,
    ],
    [
        -7.435856389565537e-9,
        0.000008983055097726239,
        -0.78625201886289,
        96.32687599759846,
        -1.85204757529826,
        -59.36935905485877,
        47.40033549296737,
        -16.50741931063887,
        2.28786674699375,
        10260144.86,
    ],
    [
        -3.030883460898826e-8,
        0.00000898305509983578,
        0.30071316287616,
        59.74293618442277,
        7.357984074871,
        -25.38371002664745,
        13.45380521110908,
        -3.29883767235584,
        0.32710905363475,
        6856817.37,
    ],
    [
        -1.981981304930552e-8,
        0.000008983055099779535,
        0.03278182852591,
        40.31678527705744,
        0.65659298677277,
        -4.44255534477492,
        0.85341911805263,
        0.12923347998204,
        -0.04625736007561,
        4482777.06,
    ],
    [
        3.09191371068437e-9,
        0.000008983055096812155,
        0.00006995724062,
        23.10934304144901,
        -0.00023663490511,
        -0.6321817810242,
        -0.00663494467273,
        0.03430082397953,
        -0.00466043876332,
        2555164.4,
    ],
    [
        2.890871144776878e-9,
        0.000008983055095805407,
        -3.068298e-8,
        7.47137025468032,
        -0.00000353937994,
        -0.02145144861037,
        -0.00001234426596,
        0.00010322952773,
        -0.00000323890364,
        826088.5,
    ],
];

/// No [`MC_BANDS`] threshold was met by a latitude passed to
/// [`web_mercator_to_bd09_inline`].
#[derive(Debug, Error)]
#[error("no latitude band matches {lat}")]
pub struct NoBandError {
    lat: f64,
}

/// Convert a point from Baidu's internal Mercator grid ("BD09MC", the
/// projection AOI ring coordinates are packed in) to BD-09 directly, by
/// selecting a polynomial coefficient row from six latitude bands and
/// evaluating a 6th-degree polynomial per coordinate.
///
/// This is distinct from the generic `WebMercator <-> Bd09` pair in
/// [`transform`], which composes the standard spherical-Mercator inverse
/// with the GCJ-02/BD-09 offset polynomials; that pair is for generic
/// web-Mercator points, not AOI rings.
pub fn web_mercator_to_bd09_inline(lon: f64, lat: f64) -> Result<(f64, f64), NoBandError> {
    let row = MC_BANDS
        .iter()
        .position(|&band| lat >= band)
        .map(|idx| &MC2LL[idx])
        .ok_or(NoBandError { lat })?;

    let mut x = row[0] + row[1] * lon.abs();
    let i = lat.abs() / row[9];
    let mut y = row[2]
        + row[3] * i
        + row[4] * i * i
        + row[5] * i * i * i
        + row[6] * i * i * i * i
        + row[7] * i * i * i * i * i
        + row[8] * i * i * i * i * i * i;
    if lon < 0.0 {
        x *= -1.0;
    }
    if lat < 0.0 {
        y *= -1.0;
    }
    Ok((x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BEIJING_WGS84: (f64, f64) = (116.404, 39.915);

    #[test]
    fn identity_transform_is_a_no_op() {
        let (lon, lat) = BEIJING_WGS84;
        assert_eq!(transform(Projection::Wgs84, Projection::Wgs84, lon, lat), (lon, lat));
    }

    #[test]
    fn wgs84_gcj02_round_trip_is_close() {
        let (lon, lat) = BEIJING_WGS84;
        let (g_lon, g_lat) = transform(Projection::Wgs84, Projection::Gcj02, lon, lat);
        let (back_lon, back_lat) = transform(Projection::Gcj02, Projection::Wgs84, g_lon, g_lat);
        assert!((back_lon - lon).abs() < 1e-6, "{} vs {}", back_lon, lon);
        assert!((back_lat - lat).abs() < 1e-6, "{} vs {}", back_lat, lat);
    }

    #[test]
    fn gcj02_bd09_round_trip_is_exact_to_tolerance() {
        let (lon, lat) = BEIJING_WGS84;
        let (b_lon, b_lat) = transform(Projection::Gcj02, Projection::Bd09, lon, lat);
        let (back_lon, back_lat) = transform(Projection::Bd09, Projection::Gcj02, b_lon, b_lat);
        assert!((back_lon - lon).abs() < 1e-6);
        assert!((back_lat - lat).abs() < 1e-6);
    }

    #[test]
    fn out_of_china_points_pass_through_gcj02_unchanged() {
        let (lon, lat) = (-122.4194, 37.7749); // San Francisco
        assert_eq!(transform(Projection::Wgs84, Projection::Gcj02, lon, lat), (lon, lat));
    }

    #[test]
    fn bd09_web_mercator_round_trip_actually_reaches_mercator_space() {
        // Regression test for the corrected `bd09_to_web_mercator`: unlike
        // the original's buggy version, this must land far from the
        // original lon/lat scale, in meter-scale Mercator coordinates.
        let (lon, lat) = BEIJING_WGS84;
        let (b_lon, b_lat) = transform(Projection::Wgs84, Projection::Bd09, lon, lat);
        let (mx, my) = transform(Projection::Bd09, Projection::WebMercator, b_lon, b_lat);
        assert!(mx.abs() > 1000.0, "expected meter-scale x, got {}", mx);
        assert!(my.abs() > 1000.0, "expected meter-scale y, got {}", my);

        let (back_lon, back_lat) = transform(Projection::WebMercator, Projection::Bd09, mx, my);
        assert!((back_lon - b_lon).abs() < 1e-4);
        assert!((back_lat - b_lat).abs() < 1e-4);
    }

    #[test]
    fn web_mercator_wgs84_round_trip() {
        let (lon, lat) = BEIJING_WGS84;
        let (x, y) = transform(Projection::Wgs84, Projection::WebMercator, lon, lat);
        let (back_lon, back_lat) = transform(Projection::WebMercator, Projection::Wgs84, x, y);
        assert!((back_lon - lon).abs() < 1e-6);
        assert!((back_lat - lat).abs() < 1e-6);
    }

    #[test]
    fn web_mercator_to_bd09_inline_at_zero_uses_the_lowest_band() {
        // lat = 0 only clears the last (0.0) band, whose row is
        // [2.890871144776878e-9, ..., -3.068298e-8, 7.47137025468032, ...].
        // With lon = lat = 0, the polynomial terms beyond the constants
        // vanish (i = 0/826088.5 = 0), leaving just the row's first two
        // constants.
        let (x, y) = web_mercator_to_bd09_inline(0.0, 0.0).unwrap();
        assert!((x - 2.890871144776878e-9).abs() < 1e-12, "{}", x);
        assert!((y - (-3.068298e-8)).abs() < 1e-12, "{}", y);
    }

    #[test]
    fn web_mercator_to_bd09_inline_flips_sign_with_input_sign() {
        let (x, y) = web_mercator_to_bd09_inline(100.0, 100.0).unwrap();
        let (neg_x, neg_y) = web_mercator_to_bd09_inline(-100.0, -100.0).unwrap();
        assert!((neg_x + x).abs() < 1e-9);
        assert!((neg_y + y).abs() < 1e-9);
    }

    #[test]
    fn web_mercator_to_bd09_inline_selects_a_higher_band_past_its_threshold() {
        let just_below = web_mercator_to_bd09_inline(0.0, 1678043.11).unwrap();
        let just_above = web_mercator_to_bd09_inline(0.0, 1678043.12).unwrap();
        assert!((just_below.1 - just_above.1).abs() > 1e-9);
    }

    #[test]
    fn web_mercator_to_bd09_inline_fails_below_all_bands() {
        assert!(web_mercator_to_bd09_inline(100.0, -1.0).is_err());
    }
}
