//! Memoized handles to named caches.
//!
//! Every cache name maps to at most one handle. Concurrent `open` calls for
//! a name that is not yet open share a single underlying open; a failed open
//! is reported to every waiter and then forgotten so the next call retries.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, trace, warn};

use crate::backend::{CacheHandle, NamedCacheBackend};
use crate::error::{CacheError, CacheResult};

type OpenFuture = Shared<BoxFuture<'static, Result<CacheHandle, Arc<anyhow::Error>>>>;

enum Slot {
    Opening { generation: u64, future: OpenFuture },
    Open(CacheHandle),
}

pub struct CacheHandleRegistry {
    backend: Arc<dyn NamedCacheBackend>,
    slots: Mutex<HashMap<String, Slot>>,
    populations: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    next_generation: AtomicU64,
}

impl CacheHandleRegistry {
    pub fn new(backend: Arc<dyn NamedCacheBackend>) -> Self {
        Self {
            backend,
            slots: Mutex::new(HashMap::new()),
            populations: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn backend(&self) -> &Arc<dyn NamedCacheBackend> {
        &self.backend
    }

    pub async fn open(&self, name: &str) -> CacheResult<CacheHandle> {
        let (generation, future) = {
            let mut slots = self.slots.lock();
            match slots.get(name) {
                Some(Slot::Open(handle)) => {
                    trace!(cache = name, "reusing open cache handle");
                    return Ok(handle.clone());
                }
                Some(Slot::Opening { generation, future }) => {
                    trace!(cache = name, "joining in-flight cache open");
                    (*generation, future.clone())
                }
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let future = self.open_future(name);
                    slots.insert(
                        name.to_string(),
                        Slot::Opening {
                            generation,
                            future: future.clone(),
                        },
                    );
                    (generation, future)
                }
            }
        };

        let result = future.await;

        let mut slots = self.slots.lock();
        let still_current = matches!(
            slots.get(name),
            Some(Slot::Opening { generation: current, .. }) if *current == generation
        );
        match result {
            Ok(handle) => {
                if still_current {
                    slots.insert(name.to_string(), Slot::Open(handle.clone()));
                }
                Ok(handle)
            }
            Err(cause) => {
                if still_current {
                    slots.remove(name);
                }
                Err(CacheError::Open {
                    name: name.to_string(),
                    cause,
                })
            }
        }
    }

    fn open_future(&self, name: &str) -> OpenFuture {
        let backend = self.backend.clone();
        let name = name.to_string();
        async move {
            debug!(cache = %name, "opening named cache");
            crate::metrics::record_cache_open();
            backend.open(&name).await.map_err(|err| {
                warn!(cache = %name, error = %err, "failed to open named cache");
                Arc::new(err)
            })
        }
        .boxed()
        .shared()
    }

    /// Forget the handle for `name`. An open still in flight completes for
    /// its waiters but is not memoized.
    pub fn invalidate(&self, name: &str) {
        if self.slots.lock().remove(name).is_some() {
            debug!(cache = name, "invalidated cache handle");
        }
    }

    pub fn list_known(&self) -> BTreeSet<String> {
        self.slots
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Open(_)))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Wait for this cache's turn to apply a population. Populations of the
    /// same cache run one after another in arrival order; the queue entry is
    /// dropped when the last ticket is released.
    pub async fn begin_population(&self, name: &str) -> PopulationTicket<'_> {
        let queue = {
            let mut populations = self.populations.lock();
            populations
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = queue.lock_owned().await;
        PopulationTicket {
            registry: self,
            name: name.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of caches with a population queued or running.
    pub fn in_flight_populations(&self) -> usize {
        self.populations.lock().len()
    }
}

pub struct PopulationTicket<'a> {
    registry: &'a CacheHandleRegistry,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PopulationTicket<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut populations = self.registry.populations.lock();
        let idle = populations
            .get(&self.name)
            .is_some_and(|queue| Arc::strong_count(queue) == 1);
        if idle {
            populations.remove(&self.name);
        }
    }
}
