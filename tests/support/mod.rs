#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use http::HeaderValue;
use http::header::{CACHE_CONTROL, DATE, EXPIRES};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use offline_cache::{
    CacheClient, CacheRequest, CacheResponse,
    backend::{CacheHandle, MemoryBackend, NamedCacheBackend},
    fetch::{FetchError, Fetcher},
};

mod logging;

pub use logging::LogCapture;

/// Network stand-in. Unknown URLs answer 200 with a body naming the URL.
#[derive(Default)]
pub struct MockFetcher {
    responses: Mutex<HashMap<String, CacheResponse>>,
    calls: AtomicUsize,
    offline: AtomicBool,
    failing: AtomicBool,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, url: &str, response: CacheResponse) {
        self.responses.lock().insert(url.to_string(), response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Offline fetchers report `is_online() == false` and refuse every fetch.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Online, but every fetch fails in transport.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &CacheRequest) -> Result<CacheResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Offline);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Transport {
                url: request.url.clone(),
                reason: "connection reset".to_string(),
            });
        }
        if let Some(response) = self.responses.lock().get(&request.url) {
            return Ok(response.clone());
        }
        Ok(CacheResponse::ok(request.url.clone()).body(format!("body of {}", request.url)))
    }

    fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}

/// Memory backend that counts opens, can hold opens at a gate and can fail
/// a number of them.
pub struct CountingBackend {
    inner: MemoryBackend,
    opens: AtomicUsize,
    failures_left: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl CountingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// Opens block until a permit is added to the returned semaphore.
    pub fn gated() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (Arc::new(Self::build(Some(gate.clone()))), gate)
    }

    fn build(gate: Option<Arc<Semaphore>>) -> Self {
        Self {
            inner: MemoryBackend::new(),
            opens: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            gate,
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn fail_next_opens(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl NamedCacheBackend for CountingBackend {
    async fn open(&self, name: &str) -> Result<CacheHandle> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.context("open gate closed")?;
        }
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if should_fail {
            bail!("simulated open failure for {name}");
        }
        self.inner.open(name).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys().await
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        self.inner.delete(name).await
    }
}

pub fn client(backend: Arc<dyn NamedCacheBackend>, fetcher: Arc<MockFetcher>) -> CacheClient {
    CacheClient::with_backend(backend, fetcher, None)
}

pub fn memory_client(fetcher: Arc<MockFetcher>) -> CacheClient {
    client(Arc::new(MemoryBackend::new()), fetcher)
}

fn http_date(at: SystemTime) -> HeaderValue {
    HeaderValue::from_str(&httpdate::fmt_http_date(at)).expect("http date is a valid header")
}

/// Cacheable response that stays fresh for an hour.
pub fn fresh_response(url: &str, body: &str) -> CacheResponse {
    CacheResponse::ok(url)
        .header(CACHE_CONTROL, HeaderValue::from_static("max-age=3600"))
        .header(DATE, http_date(SystemTime::now()))
        .body(body.to_string())
}

/// Cacheable response whose `max-age` lapsed an hour ago.
pub fn stale_response(url: &str, body: &str) -> CacheResponse {
    CacheResponse::ok(url)
        .header(CACHE_CONTROL, HeaderValue::from_static("max-age=60"))
        .header(DATE, http_date(SystemTime::now() - Duration::from_secs(7200)))
        .body(body.to_string())
}

/// Cacheable response that expired an hour ago.
pub fn expired_response(url: &str, body: &str) -> CacheResponse {
    CacheResponse::ok(url)
        .header(EXPIRES, http_date(SystemTime::now() - Duration::from_secs(3600)))
        .body(body.to_string())
}
