//! JSON message protocol for driving a [`CacheClient`] from another process.
//!
//! Each command is one JSON object tagged by `type`; each reply likewise.
//! `serve_lines` runs the protocol over newline-delimited JSON.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::client::CacheClient;
use crate::error::{CacheError, CacheResult};
use crate::orchestrator::MissStrategy;
use crate::resource::{CacheRequest, CacheResponse, QueryOptions, RequestRef};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheCommand {
    PopulateCache {
        cache: String,
        requests: Vec<WireRequest>,
    },
    RespondFromCache {
        cache: String,
        request: WireRequest,
        #[serde(default)]
        strategy: MissStrategy,
    },
    HasCacheEntry {
        cache: String,
        request: WireRequest,
    },
    RefreshCacheEntry {
        cache: String,
        request: WireRequest,
        #[serde(default)]
        force: bool,
    },
    PutCacheEntry {
        cache: String,
        request: WireRequest,
        response: WireResponse,
    },
    DeleteCacheEntry {
        cache: String,
        request: WireRequest,
        #[serde(default)]
        options: QueryOptions,
    },
    DeleteAllCaches,
    /// Cache names, or the entry keys of one cache.
    Keys {
        #[serde(default)]
        cache: Option<String>,
    },
}

impl CacheCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PopulateCache { .. } => "populate_cache",
            Self::RespondFromCache { .. } => "respond_from_cache",
            Self::HasCacheEntry { .. } => "has_cache_entry",
            Self::RefreshCacheEntry { .. } => "refresh_cache_entry",
            Self::PutCacheEntry { .. } => "put_cache_entry",
            Self::DeleteCacheEntry { .. } => "delete_cache_entry",
            Self::DeleteAllCaches => "delete_all_caches",
            Self::Keys { .. } => "keys",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheReply {
    Populated { ok: bool },
    Response { response: WireResponse },
    Present { present: bool },
    Stored { stored: bool },
    Deleted { deleted: bool },
    CachesDeleted { results: BTreeMap<String, bool> },
    Keys { keys: Vec<String> },
    Error { kind: String, message: String },
}

impl From<&CacheError> for CacheReply {
    fn from(err: &CacheError) -> Self {
        Self::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// A request on the wire: either a bare URL string or an object with an
/// optional method and headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireRequest {
    Url(String),
    Full {
        #[serde(default = "default_method")]
        method: String,
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

fn default_method() -> String {
    Method::GET.to_string()
}

impl WireRequest {
    pub fn into_request_ref(self) -> CacheResult<RequestRef> {
        match self {
            Self::Url(url) => Ok(RequestRef::Url(url)),
            Self::Full {
                method,
                url,
                headers,
            } => {
                let method = Method::from_bytes(method.as_bytes()).map_err(|_| {
                    CacheError::invalid(format!("invalid request method {method:?}"))
                })?;
                let mut request = CacheRequest::new(method, url);
                request.headers = to_header_map(headers)?;
                Ok(RequestRef::Request(request))
            }
        }
    }
}

impl From<&str> for WireRequest {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

/// A response on the wire. Repeated headers are joined with `", "` and the
/// body travels as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl From<&CacheResponse> for WireResponse {
    fn from(response: &CacheResponse) -> Self {
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in &response.headers {
            let value = String::from_utf8_lossy(value.as_bytes());
            headers
                .entry(name.as_str().to_string())
                .and_modify(|joined| {
                    joined.push_str(", ");
                    joined.push_str(&value);
                })
                .or_insert_with(|| value.into_owned());
        }
        Self {
            url: response.url.clone(),
            status: response.status.as_u16(),
            headers,
            body: String::from_utf8_lossy(&response.body).into_owned(),
        }
    }
}

impl WireResponse {
    pub fn into_response(self) -> CacheResult<CacheResponse> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|_| CacheError::invalid(format!("invalid status code {}", self.status)))?;
        Ok(CacheResponse {
            url: self.url,
            status,
            headers: to_header_map(self.headers)?,
            body: self.body.into(),
        })
    }
}

fn to_header_map(headers: BTreeMap<String, String>) -> CacheResult<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| CacheError::invalid(format!("invalid header name {name:?}")))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|_| CacheError::invalid(format!("invalid value for header {name}")))?;
        map.append(header, value);
    }
    Ok(map)
}

/// Answer newline-delimited JSON commands from `reader` until it is
/// exhausted. Undecodable lines get an `invalid_argument` error reply.
pub async fn serve_lines<R, W>(client: &CacheClient, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut handled = 0usize;
    while let Some(line) = lines.next_line().await.context("failed to read command")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<CacheCommand>(line) {
            Ok(command) => {
                debug!(command = command.name(), "handling command");
                client.handle(command).await
            }
            Err(err) => CacheReply::Error {
                kind: "invalid_argument".to_string(),
                message: format!("malformed command: {err}"),
            },
        };
        let mut encoded = serde_json::to_vec(&reply).context("failed to encode reply")?;
        encoded.push(b'\n');
        writer
            .write_all(&encoded)
            .await
            .context("failed to write reply")?;
        writer.flush().await.context("failed to flush reply")?;
        handled += 1;
    }
    info!(handled, "command stream closed");
    Ok(())
}
