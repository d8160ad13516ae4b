use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::NamedCacheBackend;
use crate::command::{CacheCommand, CacheReply, WireRequest, WireResponse};
use crate::error::CacheResult;
use crate::fetch::Fetcher;
use crate::orchestrator::{CacheOrchestrator, MissStrategy};
use crate::registry::CacheHandleRegistry;
use crate::resource::{CacheResponse, QueryOptions, RequestRef};
use crate::store::CacheStore;

/// Entry point for callers. Every operation is a thin delegation to the
/// orchestrator or the store underneath it.
pub struct CacheClient {
    orchestrator: CacheOrchestrator,
}

impl CacheClient {
    pub fn new(orchestrator: CacheOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Wire a client over `backend` and `fetcher` with a fresh registry.
    pub fn with_backend(
        backend: Arc<dyn NamedCacheBackend>,
        fetcher: Arc<dyn Fetcher>,
        fetch_timeout: Option<Duration>,
    ) -> Self {
        let registry = Arc::new(CacheHandleRegistry::new(backend));
        let store = CacheStore::new(registry, fetcher).with_fetch_timeout(fetch_timeout);
        Self::new(CacheOrchestrator::new(store))
    }

    pub fn orchestrator(&self) -> &CacheOrchestrator {
        &self.orchestrator
    }

    fn store(&self) -> &CacheStore {
        self.orchestrator.store()
    }

    pub async fn populate_cache(&self, requests: &[RequestRef], cache_name: &str) -> bool {
        self.orchestrator.populate_cache(requests, cache_name).await
    }

    pub async fn respond_from_cache(
        &self,
        request: impl Into<RequestRef>,
        cache_name: &str,
        strategy: MissStrategy,
    ) -> CacheResult<CacheResponse> {
        self.orchestrator
            .respond_from_cache(&request.into(), cache_name, strategy)
            .await
    }

    pub async fn has_cache_entry(
        &self,
        request: impl Into<RequestRef>,
        cache_name: &str,
    ) -> CacheResult<bool> {
        let entry = self.store().lookup(&request.into(), cache_name).await?;
        Ok(entry.is_some())
    }

    pub async fn refresh_cache_entry(
        &self,
        request: impl Into<RequestRef>,
        cache_name: &str,
        force: bool,
    ) -> CacheResult<CacheResponse> {
        self.orchestrator
            .refresh_cache_entry(&request.into(), cache_name, force)
            .await
    }

    pub async fn put_cache_entry(
        &self,
        request: impl Into<RequestRef>,
        response: &CacheResponse,
        cache_name: &str,
    ) -> CacheResult<bool> {
        self.store().put(&request.into(), response, cache_name).await
    }

    pub async fn delete_cache_entry(
        &self,
        request: impl Into<RequestRef>,
        cache_name: &str,
        options: QueryOptions,
    ) -> CacheResult<bool> {
        self.store()
            .remove(&request.into(), cache_name, &options)
            .await
    }

    pub async fn delete_all_caches(&self) -> CacheResult<BTreeMap<String, bool>> {
        self.orchestrator.delete_all_caches().await
    }

    pub async fn cache_names(&self) -> CacheResult<Vec<String>> {
        self.store().cache_names().await
    }

    pub async fn entry_keys(&self, cache_name: &str) -> CacheResult<Vec<String>> {
        self.store().entry_keys(cache_name).await
    }

    /// Run one protocol command. Failures become [`CacheReply::Error`].
    pub async fn handle(&self, command: CacheCommand) -> CacheReply {
        match self.dispatch(command).await {
            Ok(reply) => reply,
            Err(err) => CacheReply::from(&err),
        }
    }

    async fn dispatch(&self, command: CacheCommand) -> CacheResult<CacheReply> {
        let reply = match command {
            CacheCommand::PopulateCache { cache, requests } => {
                let requests = requests
                    .into_iter()
                    .map(WireRequest::into_request_ref)
                    .collect::<CacheResult<Vec<_>>>()?;
                CacheReply::Populated {
                    ok: self.populate_cache(&requests, &cache).await,
                }
            }
            CacheCommand::RespondFromCache {
                cache,
                request,
                strategy,
            } => {
                let response = self
                    .respond_from_cache(request.into_request_ref()?, &cache, strategy)
                    .await?;
                CacheReply::Response {
                    response: WireResponse::from(&response),
                }
            }
            CacheCommand::HasCacheEntry { cache, request } => CacheReply::Present {
                present: self
                    .has_cache_entry(request.into_request_ref()?, &cache)
                    .await?,
            },
            CacheCommand::RefreshCacheEntry {
                cache,
                request,
                force,
            } => {
                let response = self
                    .refresh_cache_entry(request.into_request_ref()?, &cache, force)
                    .await?;
                CacheReply::Response {
                    response: WireResponse::from(&response),
                }
            }
            CacheCommand::PutCacheEntry {
                cache,
                request,
                response,
            } => {
                let response = response.into_response()?;
                CacheReply::Stored {
                    stored: self
                        .put_cache_entry(request.into_request_ref()?, &response, &cache)
                        .await?,
                }
            }
            CacheCommand::DeleteCacheEntry {
                cache,
                request,
                options,
            } => CacheReply::Deleted {
                deleted: self
                    .delete_cache_entry(request.into_request_ref()?, &cache, options)
                    .await?,
            },
            CacheCommand::DeleteAllCaches => CacheReply::CachesDeleted {
                results: self.delete_all_caches().await?,
            },
            CacheCommand::Keys { cache: None } => CacheReply::Keys {
                keys: self.cache_names().await?,
            },
            CacheCommand::Keys { cache: Some(cache) } => CacheReply::Keys {
                keys: self.entry_keys(&cache).await?,
            },
        };
        Ok(reply)
    }
}
