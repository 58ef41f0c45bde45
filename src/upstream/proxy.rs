//! An optional rotating proxy pool, used when `common.proxy` is enabled in
//! the config.
//!
//! The original `__request_url` fetched a fresh proxy address from a local
//! rotation service before every upstream request when `proxy_flag` was
//! set. We keep that as a small collaborator behind a trait rather than
//! baking proxy selection into the upstream clients themselves, so it can
//! be swapped or disabled independently.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::{Body, Client};
use hyper_rustls::HttpsConnector;
use url::Url;

use crate::Result;

/// A source of rotating proxy addresses.
#[async_trait]
pub trait ProxyPool: Send + Sync {
    /// Fetch one proxy address (`host:port`) to use for the next request.
    async fn next_proxy(&self) -> Result<String>;
}

/// Fetches a proxy address from a local HTTP proxy-rotation service.
pub struct HttpProxyPool {
    http: Arc<Client<HttpsConnector<HttpConnector>>>,
    endpoint: Url,
}

impl HttpProxyPool {
    pub fn new(http: Arc<Client<HttpsConnector<HttpConnector>>>, endpoint: Url) -> Self {
        HttpProxyPool { http, endpoint }
    }
}

#[async_trait]
impl ProxyPool for HttpProxyPool {
    async fn next_proxy(&self) -> Result<String> {
        let req = hyper::Request::builder()
            .uri(self.endpoint.as_str())
            .body(Body::empty())
            .context("could not build proxy-pool request")?;
        let resp = self
            .http
            .request(req)
            .await
            .context("proxy-pool request failed")?;
        let bytes = hyper::body::to_bytes(resp.into_body())
            .await
            .context("could not read proxy-pool response")?;
        let text = String::from_utf8(bytes.to_vec())
            .context("proxy-pool response was not valid UTF-8")?;
        Ok(text.trim().to_owned())
    }
}
