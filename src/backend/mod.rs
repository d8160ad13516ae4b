//! Storage backends for named caches.
//!
//! A backend owns the set of named caches; a [`NamedCache`] handle operates
//! on a single one. Handles are cheap to clone behind an `Arc` and are
//! memoized by [`crate::registry::CacheHandleRegistry`].

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::resource::{CacheRequest, CacheResponse, CachedEntry, QueryOptions};

mod disk;
mod memory;

pub use disk::DiskBackend;
pub use memory::MemoryBackend;

pub type CacheHandle = Arc<dyn NamedCache>;

#[async_trait]
pub trait NamedCacheBackend: Send + Sync {
    /// Open `name`, creating it if it does not exist.
    async fn open(&self, name: &str) -> Result<CacheHandle>;

    /// Names of every cache the backend holds, including ones created by
    /// other processes.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Delete a whole cache. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;
}

#[async_trait]
pub trait NamedCache: Send + Sync {
    fn name(&self) -> &str;

    async fn match_request(
        &self,
        request: &CacheRequest,
        options: &QueryOptions,
    ) -> Result<Option<CachedEntry>>;

    /// Store `response` under `request`, replacing any previous entry.
    async fn put(&self, request: &CacheRequest, response: CacheResponse) -> Result<()>;

    async fn delete(&self, request: &CacheRequest, options: &QueryOptions) -> Result<bool>;

    /// Store every pair or none of them.
    async fn add_all(&self, entries: Vec<(CacheRequest, CacheResponse)>) -> Result<()>;

    /// Keys of every stored entry.
    async fn keys(&self) -> Result<Vec<String>>;
}
