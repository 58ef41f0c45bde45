//! Client for the gaode-style (Amap) place-search API.

use std::sync::Arc;

use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::Client;
use hyper_rustls::HttpsConnector;
use serde_json::Value;
use tracing::instrument;
use url::Url;

use crate::Result;

use super::proxy::ProxyPool;
use super::{get_json, Action, RawPoi, RegionRef, SearchPage, UpstreamClient};

const RESULT_CAP: u64 = 1000;
const PAGE_SIZE: u64 = 25;

pub struct GaodeClient {
    http: Arc<Client<HttpsConnector<HttpConnector>>>,
    proxy: Option<Arc<dyn ProxyPool>>,
}

impl GaodeClient {
    pub fn new(http: Arc<Client<HttpsConnector<HttpConnector>>>) -> Self {
        GaodeClient { http, proxy: None }
    }

    pub fn with_proxy(
        http: Arc<Client<HttpsConnector<HttpConnector>>>,
        proxy: Arc<dyn ProxyPool>,
    ) -> Self {
        GaodeClient {
            http,
            proxy: Some(proxy),
        }
    }

    fn search_url(&self, keyword: &str, region: &RegionRef, page: u64, credential: &str) -> Url {
        let mut url = Url::parse("http://restapi.amap.com/v3/place/text").unwrap();
        let region_name = match region {
            RegionRef::Name(name) => name.clone(),
            // Gaode's text-search endpoint takes a city name, not a
            // bounding box; a subdivided quadrant is searched by its
            // enclosing city instead.
            RegionRef::BBox { .. } => String::new(),
        };
        url.query_pairs_mut()
            .append_pair("key", credential)
            .append_pair("types", keyword)
            .append_pair("city", &region_name)
            .append_pair("offset", &PAGE_SIZE.to_string())
            .append_pair("page", &(page + 1).to_string());
        url
    }

    async fn get_json(&self, url: Url) -> Result<Value> {
        get_json(&self.http, self.proxy.as_deref(), &url).await
    }
}

fn action_for_infocode(infocode: &str) -> Action {
    match infocode {
        "10000" => Action::Success,
        "10003" => Action::QuotaExhausted,
        "10005" => Action::IpRejected,
        "10002" => Action::BadRequest,
        "10014" => Action::RateLimited,
        other => Action::Unknown(other.to_owned()),
    }
}

fn parse_pois(value: &Value) -> Vec<RawPoi> {
    value
        .get("pois")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|poi| {
            let uid = poi.get("id")?.as_str()?.to_owned();
            let name = poi.get("name").and_then(Value::as_str).unwrap_or("").to_owned();
            let location = poi.get("location")?.as_str()?;
            let (lon_str, lat_str) = location.split_once(',')?;
            let lon: f64 = lon_str.parse().ok()?;
            let lat: f64 = lat_str.parse().ok()?;
            let tag = poi.get("type").and_then(Value::as_str).unwrap_or("").to_owned();
            let telephone = poi.get("tel").and_then(Value::as_str).unwrap_or("").to_owned();
            let province = poi.get("pname").and_then(Value::as_str).unwrap_or("").to_owned();
            let area = poi.get("cityname").and_then(Value::as_str).unwrap_or("").to_owned();
            let district = poi.get("adname").and_then(Value::as_str).unwrap_or("").to_owned();
            Some(RawPoi {
                uid,
                name,
                lon,
                lat,
                tag,
                telephone,
                province,
                area,
                district,
            })
        })
        .collect()
}

#[async_trait]
impl UpstreamClient for GaodeClient {
    fn result_cap(&self) -> u64 {
        RESULT_CAP
    }

    fn page_size(&self) -> u64 {
        PAGE_SIZE
    }

    #[instrument(name = "GaodeClient::search", level = "debug", skip(self, credential))]
    async fn search(
        &self,
        keyword: &str,
        region: &RegionRef,
        page: u64,
        credential: &str,
    ) -> Result<SearchPage> {
        let url = self.search_url(keyword, region, page, credential);
        let body = self.get_json(url).await?;
        let infocode = body
            .get("infocode")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_owned();
        let action = action_for_infocode(&infocode);
        let total = body
            .get("count")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok());
        let pois = if action == Action::Success {
            parse_pois(&body)
        } else {
            Vec::new()
        };
        Ok(SearchPage { action, total, pois })
    }

    #[instrument(name = "GaodeClient::aoi", level = "debug", skip(self, _credential))]
    async fn aoi(&self, _uid: &str, _credential: &str) -> Result<Option<String>> {
        // Amap's place-text API does not expose a packed AOI string the
        // way baidu's internal map endpoint does.
        Ok(None)
    }

    async fn detail(&self, _uid: &str, _credential: &str) -> Result<Option<String>> {
        // Not part of the original gaode integration this crate was
        // grounded on; the basic search listing is all that's available.
        Ok(None)
    }
}
