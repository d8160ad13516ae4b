use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use http::Method;
use tracing::{debug, info, trace, warn};

use crate::backend::CacheHandle;
use crate::cache_control::{request_is_cacheable, response_is_cacheable};
use crate::error::CacheResult;
use crate::fetch::{FetchError, Fetcher};
use crate::registry::CacheHandleRegistry;
use crate::resource::{CacheRequest, CacheResponse, CachedEntry, QueryOptions, RequestRef};
use crate::util::fetch_with_timeout;

/// Operations on one named cache at a time, with header policy enforced on
/// every write.
pub struct CacheStore {
    registry: Arc<CacheHandleRegistry>,
    fetcher: Arc<dyn Fetcher>,
    fetch_timeout: Option<Duration>,
}

impl CacheStore {
    pub fn new(registry: Arc<CacheHandleRegistry>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            registry,
            fetcher,
            fetch_timeout: None,
        }
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Option<Duration>) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub fn registry(&self) -> &Arc<CacheHandleRegistry> {
        &self.registry
    }

    pub fn is_online(&self) -> bool {
        self.fetcher.is_online()
    }

    async fn open(&self, cache_name: &str) -> CacheResult<CacheHandle> {
        self.registry.open(cache_name).await
    }

    pub(crate) async fn fetch(&self, request: &CacheRequest) -> Result<CacheResponse, FetchError> {
        let result =
            fetch_with_timeout(self.fetch_timeout, &request.url, self.fetcher.fetch(request)).await;
        crate::metrics::record_network_fetch(result.is_ok());
        result
    }

    /// Fetch every request and store all responses, or store nothing.
    /// Failures are logged and reported as `false`.
    pub async fn populate(&self, requests: &[RequestRef], cache_name: &str) -> bool {
        let _ticket = self.registry.begin_population(cache_name).await;
        match self.try_populate(requests, cache_name).await {
            Ok(()) => {
                crate::metrics::record_population(true);
                info!(
                    cache = cache_name,
                    count = requests.len(),
                    "populated cache"
                );
                true
            }
            Err(err) => {
                crate::metrics::record_population(false);
                warn!(
                    cache = cache_name,
                    count = requests.len(),
                    error = %err,
                    "failed to populate cache"
                );
                false
            }
        }
    }

    async fn try_populate(&self, requests: &[RequestRef], cache_name: &str) -> CacheResult<()> {
        let cache = self.open(cache_name).await?;
        let requests: Vec<CacheRequest> = requests.iter().map(RequestRef::to_request).collect();
        let responses =
            try_join_all(requests.iter().map(|request| self.fetch_for_population(request)))
                .await?;
        cache
            .add_all(requests.into_iter().zip(responses).collect())
            .await?;
        Ok(())
    }

    async fn fetch_for_population(&self, request: &CacheRequest) -> CacheResult<CacheResponse> {
        let response = self.fetch(request).await?;
        if !response.is_success() {
            return Err(FetchError::Status {
                url: request.url.clone(),
                status: response.status.as_u16(),
            }
            .into());
        }
        Ok(response)
    }

    /// A miss is `Ok(None)`, never an error.
    pub async fn lookup(
        &self,
        request: &RequestRef,
        cache_name: &str,
    ) -> CacheResult<Option<CachedEntry>> {
        let cache = self.open(cache_name).await?;
        let entry = cache
            .match_request(&request.to_request(), &QueryOptions::default())
            .await?;
        crate::metrics::record_cache_lookup(entry.is_some());
        trace!(
            cache = cache_name,
            url = request.url(),
            hit = entry.is_some(),
            "cache lookup"
        );
        Ok(entry)
    }

    /// Store a copy of `response` when both sides allow caching. A refusal is
    /// `Ok(false)` and leaves the cache untouched.
    pub async fn put(
        &self,
        request: &RequestRef,
        response: &CacheResponse,
        cache_name: &str,
    ) -> CacheResult<bool> {
        let refusal = match request_refusal(request)? {
            Some(reason) => Some(reason),
            None => response_refusal(response)?,
        };
        self.put_unless_refused(request, response, cache_name, refusal)
            .await
    }

    /// [`put`](Self::put) for a response the fetcher returned. The caller did
    /// not write its headers, so a header the policy cannot read refuses
    /// storage instead of failing.
    pub async fn put_fetched(
        &self,
        request: &RequestRef,
        response: &CacheResponse,
        cache_name: &str,
    ) -> CacheResult<bool> {
        let refusal = match request_refusal(request)? {
            Some(reason) => Some(reason),
            None => match response_refusal(response) {
                Ok(reason) => reason,
                Err(err) if err.is_policy_error() => {
                    warn!(
                        cache = cache_name,
                        url = request.url(),
                        error = %err,
                        "fetched response has unreadable caching headers"
                    );
                    Some("response caching headers are unreadable")
                }
                Err(err) => return Err(err),
            },
        };
        self.put_unless_refused(request, response, cache_name, refusal)
            .await
    }

    async fn put_unless_refused(
        &self,
        request: &RequestRef,
        response: &CacheResponse,
        cache_name: &str,
        refusal: Option<&'static str>,
    ) -> CacheResult<bool> {
        if let Some(reason) = refusal {
            debug!(
                cache = cache_name,
                url = request.url(),
                reason,
                "caching forbidden"
            );
            crate::metrics::record_cache_store(false);
            return Ok(false);
        }

        let cache = self.open(cache_name).await?;
        if let Err(err) = cache.put(&request.to_request(), response.clone()).await {
            crate::metrics::record_cache_store_error();
            return Err(err.into());
        }
        crate::metrics::record_cache_store(true);
        trace!(cache = cache_name, url = request.url(), "stored response");
        Ok(true)
    }

    pub async fn remove(
        &self,
        request: &RequestRef,
        cache_name: &str,
        options: &QueryOptions,
    ) -> CacheResult<bool> {
        let cache = self.open(cache_name).await?;
        let removed = cache.delete(&request.to_request(), options).await?;
        trace!(cache = cache_name, url = request.url(), removed, "removed entry");
        Ok(removed)
    }

    /// Delete the whole cache from the backend and forget its handle.
    pub async fn delete_named(&self, cache_name: &str) -> CacheResult<bool> {
        let deleted = self.registry.backend().delete(cache_name).await?;
        self.registry.invalidate(cache_name);
        debug!(cache = cache_name, deleted, "deleted named cache");
        Ok(deleted)
    }

    /// Every cache name the backend knows about.
    pub async fn cache_names(&self) -> CacheResult<Vec<String>> {
        Ok(self.registry.backend().keys().await?)
    }

    pub async fn entry_keys(&self, cache_name: &str) -> CacheResult<Vec<String>> {
        let cache = self.open(cache_name).await?;
        Ok(cache.keys().await?)
    }
}

fn request_refusal(request: &RequestRef) -> CacheResult<Option<&'static str>> {
    if let RequestRef::Request(request) = request {
        if request.method != Method::GET {
            return Ok(Some("only GET requests can be cached"));
        }
        if !request_is_cacheable(request)? {
            return Ok(Some("request forbids storing"));
        }
    }
    Ok(None)
}

fn response_refusal(response: &CacheResponse) -> CacheResult<Option<&'static str>> {
    if !response_is_cacheable(response)? {
        return Ok(Some("response forbids storing"));
    }
    Ok(None)
}
