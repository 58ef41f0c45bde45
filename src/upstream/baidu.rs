//! Client for the baidu-style place-search API.

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

const RESULT_CAP: u64 = 400;
const PAGE_SIZE: u64 = 20;

pub struct BaiduClient {
    http: Arc<Client<HttpsConnector<HttpConnector>>>,
    proxy: Option<Arc<dyn ProxyPool>>,
}

impl BaiduClient {
    pub fn new(http: Arc<Client<HttpsConnector<HttpConnector>>>) -> Self {
        BaiduClient { http, proxy: None }
    }

    pub fn with_proxy(
        http: Arc<Client<HttpsConnector<HttpConnector>>>,
        proxy: Arc<dyn ProxyPool>,
    ) -> Self {
        BaiduClient {
            http,
            proxy: Some(proxy),
        }
    }

    fn search_url(&self, keyword: &str, region: &RegionRef, page: u64, credential: &str) -> Url {
        let mut url = match region {
            RegionRef::Name(_) => {
                Url::parse("http://api.map.baidu.com/place/v2/search").unwrap()
            }
            RegionRef::BBox { .. } => {
                Url::parse("http://api.map.baidu.com/place/v2/search").unwrap()
            }
        };
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("query", keyword)
                .append_pair("scope", "2")
                .append_pair("output", "json")
                .append_pair("ak", credential)
                .append_pair("page_size", &PAGE_SIZE.to_string())
                .append_pair("page_num", &page.to_string());
            match region {
                RegionRef::Name(name) => {
                    pairs.append_pair("city_limit", "true").append_pair("region", name);
                }
                RegionRef::BBox {
                    min_lat,
                    min_lon,
                    max_lat,
                    max_lon,
                } => {
                    pairs.append_pair("coord_type", "1").append_pair(
                        "bounds",
                        &format!("{},{},{},{}", min_lat, min_lon, max_lat, max_lon),
                    );
                }
            }
        }
        url
    }

    fn detail_url(&self, uid: &str, credential: &str) -> Url {
        let mut url = Url::parse("http://api.map.baidu.com/place/v2/detail").unwrap();
        url.query_pairs_mut()
            .append_pair("uid", uid)
            .append_pair("output", "json")
            .append_pair("scope", "2")
            .append_pair("ak", credential);
        url
    }

    fn aoi_url(&self, uid: &str) -> Url {
        let mut url = Url::parse("http://map.baidu.com/").unwrap();
        url.query_pairs_mut()
            .append_pair("reqflag", "pcmap")
            .append_pair("coord_type", "1")
            .append_pair("from", "webmap")
            .append_pair("qt", "ext")
            .append_pair("ext_ver", "new")
            .append_pair("l", "18")
            .append_pair("uid", uid);
        url
    }

    async fn get_json(&self, url: Url) -> Result<Value> {
        get_json(&self.http, self.proxy.as_deref(), &url).await
    }
}

fn action_for_status(status: i64) -> Action {
    match status {
        0 => Action::Success,
        302 => Action::QuotaExhausted,
        210 => Action::IpRejected,
        2 => Action::BadRequest,
        401 => Action::RateLimited,
        other => Action::Unknown(other.to_string()),
    }
}

fn parse_pois(value: &Value) -> Vec<RawPoi> {
    value
        .get("results")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|poi| {
            let uid = poi.get("uid")?.as_str()?.to_owned();
            let name = poi.get("name").and_then(Value::as_str).unwrap_or("").to_owned();
            let location = poi.get("location")?;
            let lon = location.get("lng")?.as_f64()?;
            let lat = location.get("lat")?.as_f64()?;
            let tag = poi
                .get("detail_info")
                .and_then(|d| d.get("tag"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_owned();
            let telephone = poi.get("telephone").and_then(Value::as_str).unwrap_or("").to_owned();
            let province = poi.get("province").and_then(Value::as_str).unwrap_or("").to_owned();
            // Upstream's "city" key becomes our `area`; its separate "area"
            // key becomes our `district` — the original's field crossover,
            // preserved verbatim.
            let area = poi.get("city").and_then(Value::as_str).unwrap_or("").to_owned();
            let district = poi.get("area").and_then(Value::as_str).unwrap_or("").to_owned();
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
impl UpstreamClient for BaiduClient {
    fn result_cap(&self) -> u64 {
        RESULT_CAP
    }

    fn page_size(&self) -> u64 {
        PAGE_SIZE
    }

    #[instrument(name = "BaiduClient::search", level = "debug", skip(self, credential))]
    async fn search(
        &self,
        keyword: &str,
        region: &RegionRef,
        page: u64,
        credential: &str,
    ) -> Result<SearchPage> {
        let url = self.search_url(keyword, region, page, credential);
        let body = self.get_json(url).await?;
        let status = body.get("status").and_then(Value::as_i64).unwrap_or(-1);
        let action = action_for_status(status);
        let total = body.get("total").and_then(Value::as_u64);
        let pois = if action == Action::Success {
            parse_pois(&body)
        } else {
            Vec::new()
        };
        Ok(SearchPage { action, total, pois })
    }

    #[instrument(name = "BaiduClient::aoi", level = "debug", skip(self, _credential))]
    async fn aoi(&self, uid: &str, _credential: &str) -> Result<Option<String>> {
        let url = self.aoi_url(uid);
        let body = self.get_json(url).await?;
        Ok(body
            .get("content")
            .and_then(|c| c.get("geo"))
            .and_then(Value::as_str)
            .map(str::to_owned))
    }

    #[instrument(name = "BaiduClient::detail", level = "debug", skip(self, credential))]
    async fn detail(&self, uid: &str, credential: &str) -> Result<Option<String>> {
        let url = self.detail_url(uid, credential);
        let body = self.get_json(url).await?;
        let Some(detail_info) = body
            .get("result")
            .and_then(|r| r.get("detail_info"))
            .filter(|v| v.is_object())
        else {
            return Ok(None);
        };
        let tag = detail_info.get("tag").and_then(Value::as_str).unwrap_or("");
        let attribute = if tag.contains("旅游景点") {
            detail_info.get("scope_grade").and_then(Value::as_str)
        } else if tag.contains("医疗") || tag.contains("高等院校") {
            detail_info.get("content_tag").and_then(Value::as_str)
        } else {
            None
        };
        Ok(attribute.map(str::to_owned).filter(|s| !s.is_empty()))
    }
}
