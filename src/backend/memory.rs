use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CacheHandle, NamedCache, NamedCacheBackend};
use crate::resource::{CacheRequest, CacheResponse, CachedEntry, QueryOptions, request_key};

/// Process-local backend. Caches live as long as the backend value.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    caches: Arc<Mutex<BTreeMap<String, Arc<MemoryCache>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NamedCacheBackend for MemoryBackend {
    async fn open(&self, name: &str) -> Result<CacheHandle> {
        let mut caches = self.caches.lock();
        let cache = caches
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCache::new(name)))
            .clone();
        Ok(cache)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.caches.lock().keys().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.caches.lock().remove(name).is_some())
    }
}

#[derive(Debug)]
pub struct MemoryCache {
    name: String,
    entries: Mutex<HashMap<String, CachedEntry>>,
}

impl MemoryCache {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn matching_keys(
        entries: &HashMap<String, CachedEntry>,
        request: &CacheRequest,
        options: &QueryOptions,
    ) -> Vec<String> {
        if !options.method_allowed(&request.method) {
            return Vec::new();
        }
        let wanted = options.key_for(&request.url);
        if !options.ignore_search {
            return entries
                .contains_key(&wanted)
                .then_some(wanted)
                .into_iter()
                .collect();
        }
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| request_key(key, true) == wanted)
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl NamedCache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(
        &self,
        request: &CacheRequest,
        options: &QueryOptions,
    ) -> Result<Option<CachedEntry>> {
        let entries = self.entries.lock();
        let found = Self::matching_keys(&entries, request, options)
            .first()
            .and_then(|key| entries.get(key))
            .cloned();
        Ok(found)
    }

    async fn put(&self, request: &CacheRequest, response: CacheResponse) -> Result<()> {
        let key = request.key();
        let entry = CachedEntry {
            request_key: key.clone(),
            response,
            stored_at: SystemTime::now(),
        };
        self.entries.lock().insert(key, entry);
        Ok(())
    }

    async fn delete(&self, request: &CacheRequest, options: &QueryOptions) -> Result<bool> {
        let mut entries = self.entries.lock();
        let keys = Self::matching_keys(&entries, request, options);
        for key in &keys {
            entries.remove(key);
        }
        Ok(!keys.is_empty())
    }

    async fn add_all(&self, items: Vec<(CacheRequest, CacheResponse)>) -> Result<()> {
        let stored_at = SystemTime::now();
        let mut entries = self.entries.lock();
        for (request, response) in items {
            let key = request.key();
            entries.insert(
                key.clone(),
                CachedEntry {
                    request_key: key,
                    response,
                    stored_at,
                },
            );
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
