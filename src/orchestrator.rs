use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};
use crate::freshness::is_stale;
use crate::logging::CacheEventBuilder;
use crate::resource::{CacheResponse, RequestRef};
use crate::store::CacheStore;

/// What `respond_from_cache` does when the cache has no entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissStrategy {
    /// Fetch from the network without storing the result.
    #[default]
    #[serde(rename = "", alias = "fetch")]
    Fetch,
    /// Fail with [`CacheError::NotFound`].
    #[serde(rename = "throw")]
    Fail,
    /// Fetch from the network and store the result.
    #[serde(rename = "store")]
    Store,
}

impl MissStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "",
            Self::Fail => "throw",
            Self::Store => "store",
        }
    }
}

impl fmt::Display for MissStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MissStrategy {
    type Err = CacheError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "" | "fetch" => Ok(Self::Fetch),
            "throw" => Ok(Self::Fail),
            "store" => Ok(Self::Store),
            other => Err(CacheError::invalid(format!(
                "unknown cache strategy {other:?}"
            ))),
        }
    }
}

struct Outcome {
    response: CacheResponse,
    lookup: &'static str,
    store: Option<&'static str>,
    source: &'static str,
}

impl Outcome {
    fn new(response: CacheResponse, lookup: &'static str, source: &'static str) -> Self {
        Self {
            response,
            lookup,
            store: None,
            source,
        }
    }

    fn stored(mut self, store: &'static str) -> Self {
        self.store = Some(store);
        self
    }
}

/// The caller-facing strategies, composed from [`CacheStore`] and the
/// network.
pub struct CacheOrchestrator {
    store: CacheStore,
}

impl CacheOrchestrator {
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Serve from the cache; on a miss, act according to `strategy`.
    pub async fn respond_from_cache(
        &self,
        request: &RequestRef,
        cache_name: &str,
        strategy: MissStrategy,
    ) -> CacheResult<CacheResponse> {
        let started = Instant::now();
        let result = self.respond(request, cache_name, strategy).await;
        finish("respond", cache_name, request, started, result)
    }

    async fn respond(
        &self,
        request: &RequestRef,
        cache_name: &str,
        strategy: MissStrategy,
    ) -> CacheResult<Outcome> {
        if let Some(entry) = self.store.lookup(request, cache_name).await? {
            return Ok(Outcome::new(entry.response, "hit", "cache"));
        }

        match strategy {
            MissStrategy::Fail => Err(CacheError::NotFound {
                cache: cache_name.to_string(),
                url: request.url().to_string(),
            }),
            MissStrategy::Fetch => {
                let response = self.store.fetch(&request.to_request()).await?;
                Ok(Outcome::new(response, "miss", "network"))
            }
            MissStrategy::Store => {
                let response = self.store.fetch(&request.to_request()).await?;
                let stored = self.store_best_effort(request, &response, cache_name).await?;
                Ok(Outcome::new(response, "miss", "network").stored(stored))
            }
        }
    }

    /// Re-fetch an existing entry when it is stale or `force` is set. When
    /// the network is unreachable the cached response is served instead.
    pub async fn refresh_cache_entry(
        &self,
        request: &RequestRef,
        cache_name: &str,
        force: bool,
    ) -> CacheResult<CacheResponse> {
        let started = Instant::now();
        let result = self.refresh(request, cache_name, force).await;
        finish("refresh", cache_name, request, started, result)
    }

    async fn refresh(
        &self,
        request: &RequestRef,
        cache_name: &str,
        force: bool,
    ) -> CacheResult<Outcome> {
        let entry = self
            .store
            .lookup(request, cache_name)
            .await?
            .ok_or_else(|| CacheError::NotFound {
                cache: cache_name.to_string(),
                url: request.url().to_string(),
            })?;

        if !force && !is_stale(&entry.response)? {
            return Ok(Outcome::new(entry.response, "fresh", "cache"));
        }
        let lookup = if force { "forced" } else { "stale" };

        if !self.store.is_online() {
            debug!(
                cache = cache_name,
                url = request.url(),
                "offline; serving cached response"
            );
            crate::metrics::record_stale_served();
            return Ok(Outcome::new(entry.response, lookup, "stale"));
        }

        match self.store.fetch(&request.to_request()).await {
            Ok(response) => {
                let stored = self.store_best_effort(request, &response, cache_name).await?;
                Ok(Outcome::new(response, lookup, "network").stored(stored))
            }
            Err(err) => {
                warn!(
                    cache = cache_name,
                    url = request.url(),
                    error = %err,
                    "refresh failed; serving cached response"
                );
                crate::metrics::record_stale_served();
                Ok(Outcome::new(entry.response, lookup, "stale"))
            }
        }
    }

    /// Storage failures are logged and reported in the outcome label. Policy
    /// errors in the caller's request still propagate.
    async fn store_best_effort(
        &self,
        request: &RequestRef,
        response: &CacheResponse,
        cache_name: &str,
    ) -> CacheResult<&'static str> {
        match self.store.put_fetched(request, response, cache_name).await {
            Ok(true) => Ok("stored"),
            Ok(false) => Ok("refused"),
            Err(err) if err.is_policy_error() => Err(err),
            Err(err) => {
                warn!(
                    cache = cache_name,
                    url = request.url(),
                    error = %err,
                    "failed to store fetched response"
                );
                Ok("error")
            }
        }
    }

    pub async fn populate_cache(&self, requests: &[RequestRef], cache_name: &str) -> bool {
        self.store.populate(requests, cache_name).await
    }

    /// Delete every cache the backend knows about, not only the ones opened
    /// through this process.
    pub async fn delete_all_caches(&self) -> CacheResult<BTreeMap<String, bool>> {
        let names = self.store.cache_names().await?;
        let deletions = names.iter().map(|name| async move {
            let deleted = match self.store.delete_named(name).await {
                Ok(deleted) => deleted,
                Err(err) => {
                    warn!(cache = %name, error = %err, "failed to delete cache");
                    false
                }
            };
            (name.clone(), deleted)
        });
        Ok(join_all(deletions).await.into_iter().collect())
    }
}

fn finish(
    operation: &'static str,
    cache_name: &str,
    request: &RequestRef,
    started: Instant,
    result: CacheResult<Outcome>,
) -> CacheResult<CacheResponse> {
    let event = CacheEventBuilder::new(operation, cache_name, request.url()).elapsed(started.elapsed());
    match result {
        Ok(outcome) => {
            let mut event = event.lookup(outcome.lookup).source(outcome.source);
            if let Some(store) = outcome.store {
                event = event.store(store);
            }
            event.log();
            Ok(outcome.response)
        }
        Err(err) => {
            event.error(err.kind(), err.to_string()).log();
            Err(err)
        }
    }
}
