use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;
use tracing::trace;

use crate::resource::{CacheRequest, CacheResponse};

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("network is offline")]
    Offline,
    #[error("invalid request URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request for {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },
    #[error("request for {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("request for {url} returned status {status}")]
    Status { url: String, status: u16 },
}

/// Network access used on cache misses and refreshes.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &CacheRequest) -> Result<CacheResponse, FetchError>;

    /// Whether a fetch is worth attempting at all.
    fn is_online(&self) -> bool {
        true
    }
}

/// `reqwest`-backed fetcher. Relative request URLs are resolved against
/// `base_url`; the response keeps the URL the caller asked for.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: Option<Url>,
    offline: bool,
}

impl HttpFetcher {
    pub fn new(base_url: Option<&str>, user_agent: &str, offline: bool) -> Result<Self> {
        let base_url = base_url
            .map(|raw| Url::parse(raw).with_context(|| format!("invalid base URL {raw:?}")))
            .transpose()?;
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url,
            offline,
        })
    }

    fn resolve(&self, url: &str) -> Result<Url, FetchError> {
        let parsed = match &self.base_url {
            Some(base) => base.join(url),
            None => Url::parse(url),
        };
        parsed.map_err(|err| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &CacheRequest) -> Result<CacheResponse, FetchError> {
        if self.offline {
            return Err(FetchError::Offline);
        }
        let target = self.resolve(&request.url)?;
        trace!(url = %target, method = %request.method, "fetching from network");

        let transport = |err: reqwest::Error| FetchError::Transport {
            url: request.url.clone(),
            reason: err.to_string(),
        };
        let response = self
            .client
            .request(request.method.clone(), target)
            .headers(request.headers.clone())
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(transport)?;

        Ok(CacheResponse {
            url: request.url.clone(),
            status,
            headers,
            body,
        })
    }

    fn is_online(&self) -> bool {
        !self.offline
    }
}
