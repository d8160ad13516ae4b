use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tracing::{trace, warn};

use super::{CacheHandle, NamedCache, NamedCacheBackend};
use crate::resource::{CacheRequest, CacheResponse, CachedEntry, QueryOptions, request_key};

const NAME_FILE: &str = "NAME";
const META_EXTENSION: &str = "meta";
const TEMP_PREFIX: &str = "tmp_";

/// File-backed backend. Each named cache is a directory under `root` named
/// after the blake3 hash of the cache name; entries are sharded by the hash
/// of their key into `ab/cd/<hash>` with a JSON `.meta` sidecar.
#[derive(Debug, Clone)]
pub struct DiskBackend {
    root: PathBuf,
}

impl DiskBackend {
    pub async fn new(root: PathBuf) -> Result<Self> {
        async_fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to create cache root {}", root.display()))?;
        Ok(Self { root })
    }

    fn cache_dir(&self, name: &str) -> PathBuf {
        self.root.join(hash_hex(name))
    }
}

#[async_trait]
impl NamedCacheBackend for DiskBackend {
    async fn open(&self, name: &str) -> Result<CacheHandle> {
        let dir = self.cache_dir(name);
        async_fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create cache dir {}", dir.display()))?;
        let name_path = dir.join(NAME_FILE);
        if async_fs::metadata(&name_path).await.is_err() {
            write_file_async(&name_path, name.as_bytes()).await?;
        }
        let store = EntryStore::new(dir);
        store.remove_temp_files().await?;
        trace!(cache = name, dir = %store.dir.display(), "opened disk cache");
        Ok(Arc::new(DiskCache {
            name: name.to_string(),
            store,
        }))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dirs = async_fs::read_dir(&self.root)
            .await
            .with_context(|| format!("failed to list cache root {}", self.root.display()))?;
        while let Some(entry) = dirs.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match async_fs::read_to_string(entry.path().join(NAME_FILE)).await {
                Ok(name) => names.push(name),
                Err(err) => warn!(
                    error = %err,
                    dir = %entry.path().display(),
                    "cache directory without a readable name; skipping"
                ),
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let dir = self.cache_dir(name);
        match async_fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("failed to delete cache dir {}", dir.display()))
            }
        }
    }
}

#[derive(Debug)]
struct DiskCache {
    name: String,
    store: EntryStore,
}

#[async_trait]
impl NamedCache for DiskCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn match_request(
        &self,
        request: &CacheRequest,
        options: &QueryOptions,
    ) -> Result<Option<CachedEntry>> {
        for key in self.store.matching_keys(request, options).await? {
            if let Some(entry) = self.store.load(&key).await? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    async fn put(&self, request: &CacheRequest, response: CacheResponse) -> Result<()> {
        let staged = self.store.stage(request, &response).await?;
        self.store.commit(staged).await
    }

    async fn delete(&self, request: &CacheRequest, options: &QueryOptions) -> Result<bool> {
        let mut removed = false;
        for key in self.store.matching_keys(request, options).await? {
            removed |= self.store.remove(&entry_id_for_key(&key)).await;
        }
        Ok(removed)
    }

    async fn add_all(&self, items: Vec<(CacheRequest, CacheResponse)>) -> Result<()> {
        let mut staged = Vec::with_capacity(items.len());
        for (request, response) in &items {
            match self.store.stage(request, response).await {
                Ok(entry) => staged.push(entry),
                Err(err) => {
                    for entry in staged {
                        entry.discard().await;
                    }
                    return Err(err);
                }
            }
        }
        let mut committed = Vec::with_capacity(staged.len());
        let mut pending = staged.into_iter();
        while let Some(entry) = pending.next() {
            match self.store.commit_replacing(entry).await {
                Ok(replaced) => committed.push(replaced),
                Err(err) => {
                    for entry in pending {
                        entry.discard().await;
                    }
                    for replaced in committed.into_iter().rev() {
                        self.store.roll_back(replaced).await;
                    }
                    return Err(err);
                }
            }
        }
        for replaced in committed {
            replaced.discard().await;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .store
            .scan()
            .await?
            .into_iter()
            .map(|persisted| persisted.key)
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    key: String,
    method: String,
    url: String,
    status: u16,
    headers: Vec<(String, Vec<u8>)>,
    stored_at_ms: u64,
    content_hash: String,
    content_length: u64,
}

impl PersistedEntry {
    fn new(request: &CacheRequest, response: &CacheResponse) -> Self {
        Self {
            key: request.key(),
            method: request.method.to_string(),
            url: response.url.clone(),
            status: response.status.as_u16(),
            headers: headermap_to_vec(&response.headers),
            stored_at_ms: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            content_hash: blake3::hash(&response.body).to_hex().to_string(),
            content_length: response.body.len() as u64,
        }
    }

    fn into_entry(self, body: Bytes) -> CachedEntry {
        let response = CacheResponse {
            url: self.url,
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers: to_headermap(&self.headers),
            body,
        };
        CachedEntry {
            request_key: self.key,
            response,
            stored_at: SystemTime::UNIX_EPOCH + Duration::from_millis(self.stored_at_ms),
        }
    }
}

/// Files written to temp paths and waiting to be renamed into place.
struct StagedEntry {
    entry_id: String,
    body_temp: PathBuf,
    meta_temp: PathBuf,
}

impl StagedEntry {
    async fn discard(self) {
        let _ = async_fs::remove_file(&self.body_temp).await;
        let _ = async_fs::remove_file(&self.meta_temp).await;
    }
}

/// Files an entry held before a bulk add overwrote it, moved to temp paths
/// until the whole batch is in place.
struct ReplacedEntry {
    entry_id: String,
    body_backup: Option<PathBuf>,
    meta_backup: Option<PathBuf>,
}

impl ReplacedEntry {
    async fn discard(self) {
        for backup in [self.body_backup, self.meta_backup].into_iter().flatten() {
            let _ = async_fs::remove_file(backup).await;
        }
    }
}

#[derive(Debug, Clone)]
struct EntryStore {
    dir: PathBuf,
}

impl EntryStore {
    fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn body_path(&self, entry_id: &str) -> PathBuf {
        let (first, remainder) = entry_id.split_at(2);
        let (second, _) = remainder.split_at(2);
        self.dir.join(first).join(second).join(entry_id)
    }

    fn meta_path(&self, entry_id: &str) -> PathBuf {
        let mut path = self.body_path(entry_id);
        path.set_extension(META_EXTENSION);
        path
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!("{TEMP_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    async fn remove_temp_files(&self) -> Result<()> {
        let mut entries = async_fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let is_temp = entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with(TEMP_PREFIX))
                .unwrap_or(false);
            if is_temp && entry.file_type().await?.is_file() {
                let _ = async_fs::remove_file(entry.path()).await;
            }
        }
        Ok(())
    }

    async fn stage(&self, request: &CacheRequest, response: &CacheResponse) -> Result<StagedEntry> {
        let persisted = PersistedEntry::new(request, response);
        let entry_id = entry_id_for_key(&persisted.key);
        let staged = StagedEntry {
            entry_id,
            body_temp: self.temp_path(),
            meta_temp: self.temp_path(),
        };
        let meta = serde_json::to_vec(&persisted)?;
        let written = async {
            write_file_async(&staged.body_temp, &response.body).await?;
            write_file_async(&staged.meta_temp, &meta).await
        }
        .await;
        if let Err(err) = written {
            staged.discard().await;
            return Err(err);
        }
        Ok(staged)
    }

    async fn commit(&self, staged: StagedEntry) -> Result<()> {
        let moved = self.move_into_place(&staged).await;
        if moved.is_err() {
            staged.discard().await;
        }
        moved
    }

    async fn move_into_place(&self, staged: &StagedEntry) -> Result<()> {
        let body_path = self.body_path(&staged.entry_id);
        let meta_path = self.meta_path(&staged.entry_id);
        if let Some(parent) = body_path.parent() {
            async_fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create cache shard {}", parent.display()))?;
        }
        async_fs::rename(&staged.body_temp, &body_path)
            .await
            .with_context(|| format!("failed to move cache body {}", body_path.display()))?;
        async_fs::rename(&staged.meta_temp, &meta_path)
            .await
            .with_context(|| format!("failed to move cache metadata {}", meta_path.display()))?;
        Ok(())
    }

    /// Commit `staged`, keeping whatever it overwrites so the commit can be
    /// undone with [`roll_back`](Self::roll_back).
    async fn commit_replacing(&self, staged: StagedEntry) -> Result<ReplacedEntry> {
        let replaced = ReplacedEntry {
            body_backup: self.set_aside(&self.body_path(&staged.entry_id)).await,
            meta_backup: self.set_aside(&self.meta_path(&staged.entry_id)).await,
            entry_id: staged.entry_id.clone(),
        };
        if let Err(err) = self.commit(staged).await {
            self.roll_back(replaced).await;
            return Err(err);
        }
        Ok(replaced)
    }

    async fn set_aside(&self, path: &Path) -> Option<PathBuf> {
        let metadata = async_fs::symlink_metadata(path).await.ok()?;
        if !metadata.is_file() {
            return None;
        }
        let backup = self.temp_path();
        async_fs::rename(path, &backup).await.ok()?;
        Some(backup)
    }

    /// Remove what a bulk add wrote for an entry and put back what it replaced.
    async fn roll_back(&self, replaced: ReplacedEntry) {
        let body_path = self.body_path(&replaced.entry_id);
        let meta_path = self.meta_path(&replaced.entry_id);
        self.remove(&replaced.entry_id).await;
        for (backup, path) in [
            (replaced.body_backup, body_path),
            (replaced.meta_backup, meta_path),
        ] {
            let Some(backup) = backup else { continue };
            let restored = async {
                if let Some(parent) = path.parent() {
                    async_fs::create_dir_all(parent).await?;
                }
                async_fs::rename(&backup, &path).await
            }
            .await;
            if let Err(err) = restored {
                warn!(
                    error = %err,
                    path = %path.display(),
                    "failed to restore replaced cache file"
                );
                let _ = async_fs::remove_file(&backup).await;
            }
        }
    }

    async fn read_meta(&self, meta_path: &Path) -> Result<Option<PersistedEntry>> {
        let data = match async_fs::read(meta_path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", meta_path.display()));
            }
        };
        match serde_json::from_slice(&data) {
            Ok(persisted) => Ok(Some(persisted)),
            Err(err) => {
                warn!(
                    error = %err,
                    path = %meta_path.display(),
                    "failed to parse cache metadata; purging entry"
                );
                self.remove_files_from_meta(meta_path).await;
                Ok(None)
            }
        }
    }

    async fn load(&self, key: &str) -> Result<Option<CachedEntry>> {
        let entry_id = entry_id_for_key(key);
        let meta_path = self.meta_path(&entry_id);
        let Some(persisted) = self.read_meta(&meta_path).await? else {
            return Ok(None);
        };
        let body_path = self.body_path(&entry_id);
        let body = match async_fs::read(&body_path).await {
            Ok(body) => body,
            Err(err) => {
                warn!(
                    error = %err,
                    path = %body_path.display(),
                    "cache body missing on disk"
                );
                self.remove(&entry_id).await;
                return Ok(None);
            }
        };
        if blake3::hash(&body).to_hex().as_str() != persisted.content_hash {
            warn!(
                key,
                path = %body_path.display(),
                "cache body does not match metadata; purging entry"
            );
            self.remove(&entry_id).await;
            return Ok(None);
        }
        Ok(Some(persisted.into_entry(Bytes::from(body))))
    }

    async fn matching_keys(
        &self,
        request: &CacheRequest,
        options: &QueryOptions,
    ) -> Result<Vec<String>> {
        if !options.method_allowed(&request.method) {
            return Ok(Vec::new());
        }
        let wanted = options.key_for(&request.url);
        if !options.ignore_search {
            return Ok(vec![wanted]);
        }
        let mut keys: Vec<String> = self
            .scan()
            .await?
            .into_iter()
            .map(|persisted| persisted.key)
            .filter(|key| request_key(key, true) == wanted)
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Every readable metadata record under this cache.
    async fn scan(&self) -> Result<Vec<PersistedEntry>> {
        let mut found = Vec::new();
        for shard1 in list_dirs(&self.dir).await? {
            for shard2 in list_dirs(&shard1).await? {
                let mut files = async_fs::read_dir(&shard2).await?;
                while let Some(file) = files.next_entry().await? {
                    let path = file.path();
                    if path.extension().and_then(|ext| ext.to_str()) != Some(META_EXTENSION) {
                        continue;
                    }
                    if let Some(persisted) = self.read_meta(&path).await? {
                        found.push(persisted);
                    }
                }
            }
        }
        Ok(found)
    }

    async fn remove(&self, entry_id: &str) -> bool {
        let meta_removed = async_fs::remove_file(self.meta_path(entry_id)).await.is_ok();
        let body_removed = async_fs::remove_file(self.body_path(entry_id)).await.is_ok();
        self.prune_empty_shards(entry_id).await;
        meta_removed || body_removed
    }

    async fn remove_files_from_meta(&self, meta_path: &Path) {
        if let Some(stem) = meta_path.file_stem().and_then(|s| s.to_str()) {
            let _ = async_fs::remove_file(self.body_path(stem)).await;
            let _ = async_fs::remove_file(meta_path).await;
            self.prune_empty_shards(stem).await;
        } else {
            let _ = async_fs::remove_file(meta_path).await;
        }
    }

    async fn prune_empty_shards(&self, entry_id: &str) {
        let body_path = self.body_path(entry_id);
        let Some(shard2) = body_path.parent() else {
            return;
        };
        if dir_is_empty(shard2).await {
            let _ = async_fs::remove_dir(shard2).await;
        }
        let Some(shard1) = shard2.parent() else {
            return;
        };
        if shard1 != self.dir && dir_is_empty(shard1).await {
            let _ = async_fs::remove_dir(shard1).await;
        }
    }
}

fn hash_hex(value: &str) -> String {
    blake3::hash(value.as_bytes()).to_hex().to_string()
}

fn entry_id_for_key(key: &str) -> String {
    hash_hex(key)
}

async fn list_dirs(path: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let mut entries = async_fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

async fn dir_is_empty(path: &Path) -> bool {
    match async_fs::read_dir(path).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}

async fn write_file_async(path: &Path, data: &[u8]) -> Result<()> {
    let mut options = async_fs::OpenOptions::new();
    options.create(true).truncate(true).write(true);
    #[cfg(unix)]
    {
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    file.write_all(data).await?;
    file.flush().await?;
    Ok(())
}

fn to_headermap(items: &[(String, Vec<u8>)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in items {
        match (
            http::header::HeaderName::try_from(name.as_str()),
            http::HeaderValue::from_bytes(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => warn!(header = %name, "dropping unreadable stored header"),
        }
    }
    map
}

/// Values are kept as raw bytes; header values need not be UTF-8.
fn headermap_to_vec(map: &HeaderMap) -> Vec<(String, Vec<u8>)> {
    map.iter()
        .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use http::header::CACHE_CONTROL;
    use tempfile::TempDir;

    async fn backend() -> (TempDir, DiskBackend) {
        let temp = TempDir::new().unwrap();
        let backend = DiskBackend::new(temp.path().join("caches")).await.unwrap();
        (temp, backend)
    }

    #[tokio::test]
    async fn put_then_match_round_trips_response() {
        let (_temp, backend) = backend().await;
        let cache = backend.open("assets").await.unwrap();
        let response = CacheResponse::ok("/a.js")
            .header(CACHE_CONTROL, HeaderValue::from_static("max-age=60"))
            .body("console.log(1)");
        cache
            .put(&CacheRequest::get("/a.js"), response.clone())
            .await
            .unwrap();

        let entry = cache
            .match_request(&CacheRequest::get("/a.js"), &QueryOptions::default())
            .await
            .unwrap()
            .expect("stored entry");
        assert_eq!(entry.request_key, "/a.js");
        assert_eq!(entry.response, response);
    }

    #[tokio::test]
    async fn keys_survive_reopen() {
        let (temp, backend) = backend().await;
        backend.open("one").await.unwrap();
        backend.open("two").await.unwrap();

        let reopened = DiskBackend::new(temp.path().join("caches")).await.unwrap();
        assert_eq!(
            reopened.keys().await.unwrap(),
            vec!["one".to_string(), "two".to_string()]
        );
        assert!(reopened.delete("one").await.unwrap());
        assert!(!reopened.delete("one").await.unwrap());
        assert_eq!(reopened.keys().await.unwrap(), vec!["two".to_string()]);
    }

    #[tokio::test]
    async fn add_all_stores_every_entry() {
        let (_temp, backend) = backend().await;
        let cache = backend.open("bulk").await.unwrap();
        cache
            .add_all(vec![
                (CacheRequest::get("/a.js"), CacheResponse::ok("/a.js").body("a")),
                (CacheRequest::get("/b.js"), CacheResponse::ok("/b.js").body("b")),
            ])
            .await
            .unwrap();
        assert_eq!(
            cache.keys().await.unwrap(),
            vec!["/a.js".to_string(), "/b.js".to_string()]
        );
    }

    #[tokio::test]
    async fn delete_with_ignore_search_removes_all_variants() {
        let (_temp, backend) = backend().await;
        let cache = backend.open("c").await.unwrap();
        for url in ["/a.js?v=1", "/a.js?v=2", "/b.js"] {
            cache
                .put(&CacheRequest::get(url), CacheResponse::ok(url))
                .await
                .unwrap();
        }
        let options = QueryOptions {
            ignore_search: true,
            ..QueryOptions::default()
        };
        assert!(cache.delete(&CacheRequest::get("/a.js"), &options).await.unwrap());
        assert_eq!(cache.keys().await.unwrap(), vec!["/b.js".to_string()]);
        assert!(!cache.delete(&CacheRequest::get("/a.js"), &options).await.unwrap());
    }

    #[tokio::test]
    async fn open_removes_stale_temp_files() {
        let (_temp, backend) = backend().await;
        backend.open("c").await.unwrap();
        let leftover = backend.cache_dir("c").join("tmp_leftover");
        std::fs::write(&leftover, b"partial").unwrap();
        backend.open("c").await.unwrap();
        assert!(!leftover.exists());
    }

    #[tokio::test]
    async fn corrupted_body_is_a_miss() {
        let (_temp, backend) = backend().await;
        let cache = backend.open("c").await.unwrap();
        cache
            .put(&CacheRequest::get("/a.js"), CacheResponse::ok("/a.js").body("abc"))
            .await
            .unwrap();
        let store = EntryStore::new(backend.cache_dir("c"));
        std::fs::write(store.body_path(&entry_id_for_key("/a.js")), b"xyz").unwrap();
        assert!(
            cache
                .match_request(&CacheRequest::get("/a.js"), &QueryOptions::default())
                .await
                .unwrap()
                .is_none()
        );
        assert!(cache.keys().await.unwrap().is_empty());
        assert!(!store.meta_path(&entry_id_for_key("/a.js")).exists());
    }

    /// Puts a plain file where the shard directory for `key` would go.
    fn block_shard(store: &EntryStore, key: &str, neighbour: &str) -> PathBuf {
        let id = entry_id_for_key(key);
        let other = entry_id_for_key(neighbour);
        let blocker = if id[..2] == other[..2] {
            store.dir.join(&id[..2]).join(&id[2..4])
        } else {
            store.dir.join(&id[..2])
        };
        if let Some(parent) = blocker.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&blocker, b"not a directory").unwrap();
        blocker
    }

    fn temp_file_count(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
            .count()
    }

    #[tokio::test]
    async fn add_all_rolls_back_when_a_commit_fails() {
        let (_temp, backend) = backend().await;
        let cache = backend.open("bulk").await.unwrap();
        let store = EntryStore::new(backend.cache_dir("bulk"));
        let blocker = block_shard(&store, "/b.js", "/a.js");

        let result = cache
            .add_all(vec![
                (CacheRequest::get("/a.js"), CacheResponse::ok("/a.js").body("a")),
                (CacheRequest::get("/b.js"), CacheResponse::ok("/b.js").body("b")),
            ])
            .await;
        assert!(result.is_err());
        assert!(cache.keys().await.unwrap().is_empty());
        assert!(!store.body_path(&entry_id_for_key("/a.js")).exists());
        assert!(blocker.is_file());
        assert_eq!(temp_file_count(&store.dir), 0);
    }

    #[tokio::test]
    async fn failed_add_all_restores_replaced_entries() {
        let (_temp, backend) = backend().await;
        let cache = backend.open("bulk").await.unwrap();
        cache
            .put(&CacheRequest::get("/a.js"), CacheResponse::ok("/a.js").body("old"))
            .await
            .unwrap();
        let store = EntryStore::new(backend.cache_dir("bulk"));
        block_shard(&store, "/b.js", "/a.js");

        let result = cache
            .add_all(vec![
                (CacheRequest::get("/a.js"), CacheResponse::ok("/a.js").body("new")),
                (CacheRequest::get("/b.js"), CacheResponse::ok("/b.js").body("b")),
            ])
            .await;
        assert!(result.is_err());
        let entry = cache
            .match_request(&CacheRequest::get("/a.js"), &QueryOptions::default())
            .await
            .unwrap()
            .expect("original entry");
        assert_eq!(entry.response.body, Bytes::from_static(b"old"));
        assert_eq!(cache.keys().await.unwrap(), vec!["/a.js".to_string()]);
        assert_eq!(temp_file_count(&store.dir), 0);
    }

    #[tokio::test]
    async fn add_all_drops_replaced_files_on_success() {
        let (_temp, backend) = backend().await;
        let cache = backend.open("bulk").await.unwrap();
        cache
            .put(&CacheRequest::get("/a.js"), CacheResponse::ok("/a.js").body("old"))
            .await
            .unwrap();
        cache
            .add_all(vec![(
                CacheRequest::get("/a.js"),
                CacheResponse::ok("/a.js").body("new"),
            )])
            .await
            .unwrap();
        let entry = cache
            .match_request(&CacheRequest::get("/a.js"), &QueryOptions::default())
            .await
            .unwrap()
            .expect("replaced entry");
        assert_eq!(entry.response.body, Bytes::from_static(b"new"));
        assert_eq!(temp_file_count(&backend.cache_dir("bulk")), 0);
    }

    #[tokio::test]
    async fn non_ascii_header_values_survive_storage() {
        let (_temp, backend) = backend().await;
        let cache = backend.open("c").await.unwrap();
        let response = CacheResponse::ok("/a.js")
            .header(CACHE_CONTROL, HeaderValue::from_static("max-age=60"))
            .header(
                http::header::HeaderName::from_static("x-title"),
                HeaderValue::from_bytes(b"caf\xe9").unwrap(),
            )
            .body("a");
        cache
            .put(&CacheRequest::get("/a.js"), response.clone())
            .await
            .unwrap();

        let entry = cache
            .match_request(&CacheRequest::get("/a.js"), &QueryOptions::default())
            .await
            .unwrap()
            .expect("stored entry");
        assert_eq!(entry.response.headers["x-title"].as_bytes(), b"caf\xe9");
        assert_eq!(entry.response, response);
    }

    #[tokio::test]
    async fn delete_prunes_empty_shard_directories() {
        let (_temp, backend) = backend().await;
        let cache = backend.open("c").await.unwrap();
        cache
            .put(&CacheRequest::get("/a.js"), CacheResponse::ok("/a.js"))
            .await
            .unwrap();
        let store = EntryStore::new(backend.cache_dir("c"));
        let id = entry_id_for_key("/a.js");
        assert!(store.dir.join(&id[..2]).join(&id[2..4]).is_dir());

        assert!(
            cache
                .delete(&CacheRequest::get("/a.js"), &QueryOptions::default())
                .await
                .unwrap()
        );
        assert!(!store.dir.join(&id[..2]).exists());
        assert!(store.dir.join(NAME_FILE).is_file());
    }
}
