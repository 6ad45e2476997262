//! Per-worker LRU disk cache for design and measurement blobs.
//!
//! The index (`index.json`) lists resident entries least-recently-used first
//! and is rewritten atomically (temp file + rename) after every change. The
//! resident total is always recomputed from the entries, so a crash between
//! an index write and a file deletion can leave an orphan file but never a
//! wrong total. Orphans are swept on open.
//!
//! One instance per worker process; never shared across processes.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::keys::BlobKey;
use super::shared::SharedCache;
use crate::domain::{PipelineError, Result};

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct IndexEntry {
    name: String,
    size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LruIndex {
    /// Least-recently-used first.
    entries: Vec<IndexEntry>,
}

impl LruIndex {
    fn total(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    /// Move `name` to most-recently-used. Returns whether it was resident.
    fn touch(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(pos) => {
                let entry = self.entries.remove(pos);
                self.entries.push(entry);
                true
            }
            None => false,
        }
    }

    fn push(&mut self, name: &str, size: u64) {
        self.remove(name);
        self.entries.push(IndexEntry {
            name: name.to_string(),
            size,
        });
    }

    fn remove(&mut self, name: &str) -> Option<IndexEntry> {
        self.position(name).map(|pos| self.entries.remove(pos))
    }

    fn pop_lru(&mut self) -> Option<IndexEntry> {
        (!self.entries.is_empty()).then(|| self.entries.remove(0))
    }
}

pub struct LocalBlobCache {
    dir: PathBuf,
    ceiling: u64,
    index: Mutex<LruIndex>,
}

impl LocalBlobCache {
    /// Open (or create) a cache rooted at `dir` that keeps at most `ceiling` bytes.
    pub async fn open(dir: impl Into<PathBuf>, ceiling: u64) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut index = load_index(&dir).await?;
        let mut kept = Vec::with_capacity(index.entries.len());
        for entry in index.entries.drain(..) {
            if tokio::fs::try_exists(dir.join(&entry.name)).await? {
                kept.push(entry);
            } else {
                warn!(name = %entry.name, "dropping index entry without a file");
            }
        }
        index.entries = kept;
        sweep_orphans(&dir, &index).await?;

        let cache = Self {
            dir,
            ceiling,
            index: Mutex::new(index),
        };
        {
            let mut index = cache.index.lock().await;
            cache.persist(&index).await?;
            cache.evict(&mut index).await?;
            info!(
                dir = %cache.dir.display(),
                resident_bytes = index.total(),
                entries = index.entries.len(),
                "local blob cache opened"
            );
        }
        Ok(cache)
    }

    /// Return the blob for `key`, pulling it from the shared cache on a miss.
    ///
    /// A shared entry that is not READY yields `CacheMiss`; there is no
    /// waiting or silent retry here.
    pub async fn get(&self, key: &BlobKey, shared: &SharedCache) -> Result<Vec<u8>> {
        let name = key.data_key();
        let mut index = self.index.lock().await;

        if index.touch(&name) {
            match tokio::fs::read(self.dir.join(&name)).await {
                Ok(bytes) => {
                    self.persist(&index).await?;
                    debug!(name = %name, "local cache hit");
                    return Ok(bytes);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(name = %name, "resident entry lost its file; pulling again");
                    index.remove(&name);
                }
                Err(e) => return Err(e.into()),
            }
        }

        debug!(name = %name, "local cache miss");
        let bytes = shared.read(key).await?;
        self.insert_locked(&mut index, &name, &bytes).await?;
        Ok(bytes)
    }

    /// Store `bytes` under `name` as the most-recently-used entry, then evict.
    #[cfg(test)]
    pub(crate) async fn insert(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut index = self.index.lock().await;
        self.insert_locked(&mut index, name, bytes).await
    }

    pub async fn resident_bytes(&self) -> u64 {
        self.index.lock().await.total()
    }

    /// Resident names, least-recently-used first.
    pub async fn names(&self) -> Vec<String> {
        self.index
            .lock()
            .await
            .entries
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    async fn insert_locked(&self, index: &mut LruIndex, name: &str, bytes: &[u8]) -> Result<()> {
        if name == INDEX_FILE || name.contains(['/', '\\']) {
            return Err(PipelineError::Store(format!("invalid cache entry name {name:?}")));
        }
        write_atomic(&self.dir, name, bytes.to_vec()).await?;
        index.push(name, bytes.len() as u64);
        self.persist(index).await?;
        self.evict(index).await
    }

    async fn evict(&self, index: &mut LruIndex) -> Result<()> {
        while index.total() > self.ceiling {
            let Some(victim) = index.pop_lru() else {
                break;
            };
            // Index first: a crash now leaves an orphan file, not a phantom entry.
            self.persist(index).await?;
            match tokio::fs::remove_file(self.dir.join(&victim.name)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            debug!(name = %victim.name, size = victim.size, "evicted");
        }
        Ok(())
    }

    async fn persist(&self, index: &LruIndex) -> Result<()> {
        let bytes = serde_json::to_vec(index)?;
        write_atomic(&self.dir, INDEX_FILE, bytes).await
    }
}

/// A missing index is an empty cache. Anything else unreadable is an error:
/// starting empty would silently throw the resident set away.
async fn load_index(dir: &Path) -> Result<LruIndex> {
    let path = dir.join(INDEX_FILE);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LruIndex::default()),
        Err(e) => {
            error!(path = %path.display(), error = %e, "cannot read cache index");
            return Err(e.into());
        }
    };
    serde_json::from_slice(&bytes).map_err(|e| {
        error!(path = %path.display(), error = %e, "cannot parse cache index");
        PipelineError::Store(format!("corrupt cache index {}: {e}", path.display()))
    })
}

async fn sweep_orphans(dir: &Path, index: &LruIndex) -> Result<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == INDEX_FILE || index.position(&name).is_some() {
            continue;
        }
        if entry.file_type().await?.is_file() {
            debug!(name = %name, "removing orphan cache file");
            tokio::fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

/// Write `bytes` to `dir/name` via a temp file in the same directory and a rename.
async fn write_atomic(dir: &Path, name: &str, bytes: Vec<u8>) -> Result<()> {
    let dir = dir.to_path_buf();
    let target = dir.join(name);
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut temp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(&dir)?;
        temp.write_all(&bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(&target).map_err(|e| PipelineError::Io(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| PipelineError::Store(format!("cache write task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheTtls;
    use crate::impls::InMemoryKv;
    use crate::ports::{KeyValueStore, ManualClock};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn shared() -> SharedCache {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKv::new(clock));
        SharedCache::new(kv, CacheTtls::default())
    }

    #[tokio::test]
    async fn second_large_insert_evicts_the_first() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalBlobCache::open(dir.path(), 1000).await.unwrap();

        cache.insert("a", &[0u8; 600]).await.unwrap();
        cache.insert("b", &[1u8; 600]).await.unwrap();

        assert_eq!(cache.names().await, vec!["b".to_string()]);
        assert_eq!(cache.resident_bytes().await, 600);
        assert!(!dir.path().join("a").exists());
        assert!(dir.path().join("b").exists());
    }

    #[tokio::test]
    async fn get_promotes_to_most_recently_used() {
        let dir = tempfile::tempdir().unwrap();
        let shared = shared();
        let cache = LocalBlobCache::open(dir.path(), 1000).await.unwrap();
        let key_a = BlobKey::design("A.layout");
        let key_b = BlobKey::design("B.layout");
        let key_c = BlobKey::design("C.layout");
        for key in [&key_a, &key_b, &key_c] {
            shared
                .mark_ready(key, vec![7u8; 400], "true".into())
                .await
                .unwrap();
        }

        cache.get(&key_a, &shared).await.unwrap();
        cache.get(&key_b, &shared).await.unwrap();
        cache.get(&key_a, &shared).await.unwrap();
        cache.get(&key_c, &shared).await.unwrap();

        // b was least recently used when c pushed the total over the ceiling
        assert_eq!(
            cache.names().await,
            vec![key_a.data_key(), key_c.data_key()]
        );
        assert_eq!(cache.resident_bytes().await, 800);
    }

    #[tokio::test]
    async fn miss_against_unready_shared_entry_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let shared = shared();
        let cache = LocalBlobCache::open(dir.path(), 1000).await.unwrap();
        let key = BlobKey::design("A.layout");
        shared.claim(&key, "t").await.unwrap();

        let err = cache.get(&key, &shared).await.unwrap_err();

        assert!(matches!(err, PipelineError::CacheMiss { .. }));
        assert_eq!(cache.resident_bytes().await, 0);
    }

    #[tokio::test]
    async fn resident_hit_does_not_consult_shared_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalBlobCache::open(dir.path(), 1000).await.unwrap();
        let key = BlobKey::design("A.layout");
        cache.insert(&key.data_key(), b"local").await.unwrap();

        // shared entry expired long ago
        let bytes = cache.get(&key, &shared()).await.unwrap();
        assert_eq!(bytes, b"local");
    }

    #[tokio::test]
    async fn reopen_restores_order_and_total() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = LocalBlobCache::open(dir.path(), 1000).await.unwrap();
            cache.insert("a", &[0u8; 100]).await.unwrap();
            cache.insert("b", &[0u8; 200]).await.unwrap();
        }

        let cache = LocalBlobCache::open(dir.path(), 1000).await.unwrap();

        assert_eq!(cache.names().await, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(cache.resident_bytes().await, 300);
    }

    #[tokio::test]
    async fn reopen_repairs_orphans_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = LocalBlobCache::open(dir.path(), 1000).await.unwrap();
            cache.insert("a", &[0u8; 100]).await.unwrap();
            cache.insert("b", &[0u8; 200]).await.unwrap();
        }
        std::fs::remove_file(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("orphan"), b"left behind").unwrap();

        let cache = LocalBlobCache::open(dir.path(), 1000).await.unwrap();

        assert_eq!(cache.names().await, vec!["b".to_string()]);
        assert_eq!(cache.resident_bytes().await, 200);
        assert!(!dir.path().join("orphan").exists());
    }

    #[tokio::test]
    async fn reopen_with_lower_ceiling_evicts() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = LocalBlobCache::open(dir.path(), 1000).await.unwrap();
            cache.insert("a", &[0u8; 400]).await.unwrap();
            cache.insert("b", &[0u8; 400]).await.unwrap();
        }

        let cache = LocalBlobCache::open(dir.path(), 500).await.unwrap();

        assert_eq!(cache.names().await, vec!["b".to_string()]);
        assert!(cache.resident_bytes().await <= cache.ceiling());
    }

    #[tokio::test]
    async fn missing_index_opens_empty() {
        let dir = tempfile::tempdir().unwrap();

        let cache = LocalBlobCache::open(dir.path().join("fresh"), 1000)
            .await
            .unwrap();

        assert_eq!(cache.resident_bytes().await, 0);
        assert!(dir.path().join("fresh").join(INDEX_FILE).exists());
    }

    #[tokio::test]
    async fn corrupt_index_refuses_to_open() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(INDEX_FILE), b"{not json").unwrap();
        std::fs::write(dir.path().join("a"), b"kept").unwrap();

        let err = LocalBlobCache::open(dir.path(), 1000).await.err().unwrap();

        assert!(matches!(err, PipelineError::Store(_)));
        assert!(dir.path().join("a").exists());
    }

    #[tokio::test]
    async fn unreadable_index_refuses_to_open() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(INDEX_FILE)).unwrap();

        let err = LocalBlobCache::open(dir.path(), 1000).await.err().unwrap();

        assert!(matches!(err, PipelineError::Io(_)));
    }
}
