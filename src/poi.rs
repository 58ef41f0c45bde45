//! The point-of-interest record: its fields, tag normalization, and the
//! self-describing textual format pushed onto the result queue.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::DataSource;
use crate::coords::round6;

/// Tag substrings that mark a POI as worth an extra detail-endpoint round
/// trip: tourism, medical, and higher education.
const DETAIL_TAG_MARKERS: &[&str] = &["旅游景点", "医疗", "高等院校"];

/// Whether a (already-normalized) `tag` is worth a detail-endpoint call.
pub fn wants_detail(tag: &str) -> bool {
    DETAIL_TAG_MARKERS.iter().any(|marker| tag.contains(marker))
}

/// A single collected point of interest.
///
/// Mirrors the original `__parse_poi_info` dict, but with every field typed
/// and the wire field names matching the Poi-table column names exactly, as
/// the result-queue format requires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoiRecord {
    /// The upstream-assigned unique id. Never empty — enforced by
    /// [`PoiRecord::new`].
    pub uid: String,
    /// WGS-84 point, `POINT ( lon lat )` text, six-decimal rounded.
    pub poi: String,
    pub name: String,
    /// An 8-character geohash of `(lat, lon)`, used to shard spatial
    /// queries over the Poi table.
    pub geohash: String,
    pub province: String,
    pub area: String,
    pub district: String,
    /// Normalized as `CATEGORY;RAW` when a category is resolvable, else
    /// `RAW` unchanged.
    pub tag: String,
    pub telephone: String,
    /// WKT polygon in WGS-84, decoded via the AOI pipeline and projected
    /// through C1. Null when the upstream has no AOI for this POI.
    pub aoi: Option<String>,
    /// Extra category-specific detail (opening hours, ticket price, school
    /// tier, ...), only populated for categories [`wants_detail`] flags.
    pub attribute: String,
}

/// Which upstream this record came from, serialized the same way the
/// config's `data_source` key is spelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    Baidu,
    Gaode,
}

impl RecordSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordSource::Baidu => "baidu",
            RecordSource::Gaode => "gaode",
        }
    }
}

impl From<DataSource> for RecordSource {
    fn from(value: DataSource) -> Self {
        match value {
            DataSource::Baidu => RecordSource::Baidu,
            DataSource::Gaode => RecordSource::Gaode,
        }
    }
}

impl PoiRecord {
    /// Build a record, normalizing `raw_tag` against `categories` and
    /// computing its geohash. `lon`/`lat` must already be projected to
    /// WGS-84 by the caller.
    ///
    /// # Invariants
    /// - `uid` must be non-empty (I1).
    /// - `lon`/`lat` must be finite (I2).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        uid: String,
        name: String,
        lon: f64,
        lat: f64,
        raw_tag: String,
        telephone: String,
        province: String,
        area: String,
        district: String,
        attribute: Option<String>,
        aoi: Option<String>,
        categories: &HashMap<String, String>,
    ) -> Option<Self> {
        if uid.is_empty() || !lon.is_finite() || !lat.is_finite() {
            return None;
        }
        let lon = round6(lon);
        let lat = round6(lat);
        let tag = normalize_tag(&raw_tag, categories);
        let geohash = crate::geohash::encode(lat, lon, 8);
        let poi = format!("POINT ( {:.6} {:.6} )", lon, lat);
        let attribute = if wants_detail(&tag) {
            attribute.unwrap_or_default()
        } else {
            String::new()
        };
        Some(PoiRecord {
            uid,
            poi,
            name,
            geohash,
            province,
            area,
            district,
            tag,
            telephone,
            aoi,
            attribute,
        })
    }

    /// Serialize to the self-describing textual format pushed onto the
    /// result queue: one JSON object per record.
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).expect("PoiRecord always serializes")
    }

    /// Parse a record previously produced by [`PoiRecord::to_wire`].
    pub fn from_wire(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Normalize a raw upstream tag string against the configured category map.
///
/// Matches the original `__fix_tag`: a tag that is already a `;`-separated
/// hierarchy is passed through unchanged. Otherwise the *whole* raw tag is
/// looked up verbatim in the category map; the resolved category (or an
/// empty string if unresolved) is prefixed, and any leading/trailing `;`
/// left over from a missing half is stripped.
pub fn normalize_tag(raw_tag: &str, categories: &HashMap<String, String>) -> String {
    if raw_tag.contains(';') {
        return raw_tag.to_owned();
    }
    let category = categories.get(raw_tag).map(String::as_str).unwrap_or("");
    format!("{};{}", category, raw_tag)
        .trim_matches(';')
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("医疗".to_owned(), "medical".to_owned());
        m.insert("旅游景点".to_owned(), "tourism".to_owned());
        m
    }

    #[test]
    fn normalizes_a_bare_tag_found_in_the_category_map() {
        assert_eq!(normalize_tag("医疗", &categories()), "medical;医疗");
    }

    #[test]
    fn passes_through_a_tag_that_already_has_a_separator() {
        assert_eq!(normalize_tag("美食;中餐厅", &categories()), "美食;中餐厅");
    }

    #[test]
    fn falls_back_to_the_bare_tag_when_unresolvable() {
        assert_eq!(normalize_tag("美食", &categories()), "美食");
    }

    #[test]
    fn wants_detail_matches_on_any_sensitivity_marker() {
        assert!(wants_detail("medical;医疗"));
        assert!(wants_detail("tourism;旅游景点"));
        assert!(!wants_detail("美食;中餐厅"));
    }

    #[test]
    fn attribute_only_kept_for_tags_with_a_sensitivity_marker() {
        let record = PoiRecord::new(
            "uid1".to_owned(),
            "name".to_owned(),
            116.4,
            39.9,
            "美食;中餐厅".to_owned(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            Some("ignored".to_owned()),
            None,
            &categories(),
        )
        .unwrap();
        assert!(record.attribute.is_empty());

        let record = PoiRecord::new(
            "uid2".to_owned(),
            "name".to_owned(),
            116.4,
            39.9,
            "医疗".to_owned(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            Some("kept".to_owned()),
            None,
            &categories(),
        )
        .unwrap();
        assert_eq!(record.attribute, "kept");
    }

    #[test]
    fn rejects_empty_uid_or_non_finite_coordinates() {
        assert!(PoiRecord::new(
            String::new(),
            "n".to_owned(),
            0.0,
            0.0,
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            None,
            None,
            &categories()
        )
        .is_none());

        assert!(PoiRecord::new(
            "uid".to_owned(),
            "n".to_owned(),
            f64::NAN,
            0.0,
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            None,
            None,
            &categories()
        )
        .is_none());
    }

    #[test]
    fn poi_text_is_six_decimal_wkt_point() {
        let record = PoiRecord::new(
            "uid3".to_owned(),
            "Name".to_owned(),
            116.4041234,
            39.9151234,
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            None,
            None,
            &categories(),
        )
        .unwrap();
        assert_eq!(record.poi, "POINT ( 116.404123 39.915123 )");
    }

    #[test]
    fn wire_round_trip_preserves_fields() {
        let record = PoiRecord::new(
            "uid4".to_owned(),
            "Name".to_owned(),
            116.404,
            39.915,
            "医疗".to_owned(),
            "010-12345678".to_owned(),
            "北京市".to_owned(),
            "北京市".to_owned(),
            "东城区".to_owned(),
            None,
            Some("POLYGON ((0 0, 1 0, 1 1, 0 1, 0 0))".to_owned()),
            &categories(),
        )
        .unwrap();
        let wire = record.to_wire();
        let parsed = PoiRecord::from_wire(&wire).unwrap();
        assert_eq!(parsed, record);
    }
}
