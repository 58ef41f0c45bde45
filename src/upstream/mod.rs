//! Clients for the upstream map-provider search APIs (baidu-style and
//! gaode-style), behind one trait so the crawler worker never branches on
//! which provider it's talking to.

pub mod baidu;
pub mod gaode;
pub mod proxy;

use anyhow::Context;
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::warn;
use url::Url;

use crate::upstream::proxy::ProxyPool;
use crate::Result;

/// Build a single HTTPS client shared by every upstream request in this
/// process, exactly as the teacher's `shared_http_client` does for its
/// geocoder clients.
pub fn shared_http_client() -> Arc<Client<HttpsConnector<HttpConnector>>> {
    let https = HttpsConnectorBuilder::new()
        .with_native_roots()
        .https_only()
        .enable_http1()
        .enable_http2()
        .build();
    Arc::new(Client::builder().build(https))
}

/// GET `url` as JSON, routed through `proxy` when given (spec: "if a
/// configured proxy pool is enabled, fetch a proxy URL from it and route
/// the request through it; else direct").
pub async fn get_json(
    http: &Client<HttpsConnector<HttpConnector>>,
    proxy: Option<&(dyn ProxyPool)>,
    url: &Url,
) -> Result<serde_json::Value> {
    let bytes = match proxy {
        Some(pool) => get_via_proxy(pool, url).await?,
        None => {
            let req = hyper::Request::builder()
                .uri(url.as_str())
                .body(Body::empty())
                .context("could not build upstream request")?;
            let resp = http.request(req).await.context("upstream request failed")?;
            hyper::body::to_bytes(resp.into_body())
                .await
                .context("could not read upstream response body")?
                .to_vec()
        }
    };
    serde_json::from_slice(&bytes).context("upstream response was not valid JSON")
}

/// Forward-proxy a single GET: connect to the rotated proxy address, then
/// send `url` in absolute-form, the way a forward HTTP proxy expects.
async fn get_via_proxy(pool: &dyn ProxyPool, url: &Url) -> Result<Vec<u8>> {
    let proxy_addr = pool.next_proxy().await?;
    let stream = TcpStream::connect(&proxy_addr)
        .await
        .with_context(|| format!("could not connect to proxy {}", proxy_addr))?;
    let (mut sender, conn) = hyper::client::conn::Builder::new()
        .handshake(stream)
        .await
        .context("could not complete proxy handshake")?;
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            warn!(error = %err, "proxy connection closed with error");
        }
    });

    let host_header = match url.port() {
        Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
        None => url.host_str().unwrap_or_default().to_owned(),
    };
    let req = hyper::Request::builder()
        .uri(url.as_str())
        .header("Host", host_header)
        .body(Body::empty())
        .context("could not build proxied upstream request")?;
    let resp = sender
        .send_request(req)
        .await
        .context("proxied upstream request failed")?;
    Ok(hyper::body::to_bytes(resp.into_body())
        .await
        .context("could not read proxied upstream response body")?
        .to_vec())
}

/// A region to search: either a named administrative region, or an
/// explicit bounding box (used when subdividing an oversized region).
#[derive(Clone, Debug, PartialEq)]
pub enum RegionRef {
    Name(String),
    BBox {
        min_lat: f64,
        min_lon: f64,
        max_lat: f64,
        max_lon: f64,
    },
}

impl RegionRef {
    /// Parse the `region#query` task format's region half: either a plain
    /// name, or `minLat,minLon,maxLat,maxLon`.
    pub fn parse(region: &str) -> Self {
        let parts: Vec<&str> = region.split(',').collect();
        if parts.len() == 4 {
            if let (Ok(min_lat), Ok(min_lon), Ok(max_lat), Ok(max_lon)) = (
                parts[0].parse(),
                parts[1].parse(),
                parts[2].parse(),
                parts[3].parse(),
            ) {
                return RegionRef::BBox {
                    min_lat,
                    min_lon,
                    max_lat,
                    max_lon,
                };
            }
        }
        RegionRef::Name(region.to_owned())
    }

    pub fn to_task_string(&self) -> String {
        match self {
            RegionRef::Name(name) => name.clone(),
            RegionRef::BBox {
                min_lat,
                min_lon,
                max_lat,
                max_lon,
            } => format!("{},{},{},{}", min_lat, min_lon, max_lat, max_lon),
        }
    }

    /// Split a bbox region into four equal quadrants. Panics if called on a
    /// named region.
    pub fn subdivide(&self) -> [RegionRef; 4] {
        match self {
            RegionRef::BBox {
                min_lat,
                min_lon,
                max_lat,
                max_lon,
            } => {
                let mid_lat = (min_lat + max_lat) / 2.0;
                let mid_lon = (min_lon + max_lon) / 2.0;
                [
                    RegionRef::BBox {
                        min_lat: *min_lat,
                        min_lon: *min_lon,
                        max_lat: mid_lat,
                        max_lon: mid_lon,
                    },
                    RegionRef::BBox {
                        min_lat: *min_lat,
                        min_lon: mid_lon,
                        max_lat: mid_lat,
                        max_lon: *max_lon,
                    },
                    RegionRef::BBox {
                        min_lat: mid_lat,
                        min_lon: *min_lon,
                        max_lat: *max_lat,
                        max_lon: mid_lon,
                    },
                    RegionRef::BBox {
                        min_lat: mid_lat,
                        min_lon: mid_lon,
                        max_lat: *max_lat,
                        max_lon: *max_lon,
                    },
                ]
            }
            RegionRef::Name(_) => panic!("cannot subdivide a named region"),
        }
    }
}

/// A single point of interest as returned by a search page, before
/// projection and normalization into a [`crate::poi::PoiRecord`].
///
/// `lon`/`lat` are in the upstream's native projection (BD-09 for baidu,
/// GCJ-02 for gaode); the crawler worker projects them to WGS-84.
#[derive(Clone, Debug, PartialEq)]
pub struct RawPoi {
    pub uid: String,
    pub name: String,
    pub lon: f64,
    pub lat: f64,
    /// The already-hierarchical (or bare) tag string, normalized by the
    /// crawler worker via [`crate::poi::normalize_tag`].
    pub tag: String,
    pub telephone: String,
    pub province: String,
    /// Upstream's "city" field — note this becomes [`crate::poi::PoiRecord::area`],
    /// not `province`'s sibling, per the original's field crossover.
    pub area: String,
    /// Upstream's "area" field — becomes [`crate::poi::PoiRecord::district`].
    pub district: String,
}

/// The abstract action the crawler worker must take after a search request,
/// unifying baidu's `status` and gaode's `infocode` vocabularies (spec
/// §4.6/§7).
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Request succeeded; `results` (on [`SearchPage`]) is meaningful.
    Success,
    /// The credential's quota is exhausted; remove it and retry with
    /// another.
    QuotaExhausted,
    /// The crawler's IP was rejected; remove the credential and retry.
    IpRejected,
    /// The request was malformed; drop the task, nothing to retry.
    BadRequest,
    /// Too many requests too quickly; retry the same credential later.
    RateLimited,
    /// An upstream code we don't have a mapping for.
    Unknown(String),
}

/// One page of search results.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchPage {
    pub action: Action,
    pub total: Option<u64>,
    pub pois: Vec<RawPoi>,
}

/// A client for one upstream map-provider search API.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// The total-result cap beyond which a region must be subdivided
    /// instead of paginated further (400 for baidu, 1000 for gaode).
    fn result_cap(&self) -> u64;
    /// Results per page.
    fn page_size(&self) -> u64;

    /// Search `region` for `keyword`, returning page `page` (0-indexed).
    async fn search(
        &self,
        keyword: &str,
        region: &RegionRef,
        page: u64,
        credential: &str,
    ) -> Result<SearchPage>;

    /// Fetch the packed AOI string for `uid`, if the upstream has one.
    async fn aoi(&self, uid: &str, credential: &str) -> Result<Option<String>>;

    /// Fetch extra detail-endpoint data for `uid` and extract the one
    /// attribute subfield (`scope_grade` for tourism, `content_tag` for
    /// medical/higher-education) that populates
    /// [`crate::poi::PoiRecord::attribute`].
    async fn detail(&self, uid: &str, credential: &str) -> Result<Option<String>>;
}
