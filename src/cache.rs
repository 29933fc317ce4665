//! Response cache for provider calls.
//!
//! Entries are keyed by `sha256("{prompt}::{model}")` and remember the
//! content hash of every source file the response was derived from. A `get`
//! whose referenced files changed since the `set` is a miss and evicts the
//! entry on the spot.
//!
//! The cache is bounded by bytes (prompt + response length). When a new
//! entry would overflow the budget, entries are evicted in
//! least-recently-accessed order. The full state is rewritten to
//! `ai-cache.json` after every mutation; a failed write is logged and the
//! in-memory cache stays authoritative for this process.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use codectx_core::content_hash;
use codectx_core::models::CacheEntry;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::storage::{read_json, write_json_atomic, RepoPaths};

/// Hash recorded for a referenced file that does not exist.
const MISSING_FILE_HASH: &str = "missing";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheState {
    #[serde(default)]
    clock: u64,
    #[serde(default)]
    hits: u64,
    #[serde(default)]
    misses: u64,
    #[serde(default)]
    evictions: u64,
    #[serde(default)]
    entries: Vec<CacheEntry>,
}

#[derive(Debug, Default)]
struct Loaded {
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    entries: BTreeMap<String, CacheEntry>,
}

impl Loaded {
    fn total_bytes(&self) -> usize {
        self.entries.values().map(|e| e.size).sum()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_lru(&mut self) -> bool {
        let oldest = self
            .entries
            .values()
            .min_by_key(|e| e.last_access)
            .map(|e| e.key.clone());
        match oldest {
            Some(key) => {
                self.entries.remove(&key);
                self.evictions += 1;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_bytes: usize,
    pub max_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

pub struct AiCache {
    path: PathBuf,
    root: PathBuf,
    config: CacheConfig,
    state: Option<Loaded>,
}

pub fn cache_key(prompt: &str, model: &str) -> String {
    content_hash(&format!("{}::{}", prompt, model))
}

impl AiCache {
    /// `root` resolves the relative file paths passed to [`AiCache::set`].
    pub fn new(paths: &RepoPaths, root: impl Into<PathBuf>, config: CacheConfig) -> Self {
        Self {
            path: paths.cache(),
            root: root.into(),
            config,
            state: None,
        }
    }

    async fn state(&mut self) -> Result<&mut Loaded> {
        if self.state.is_none() {
            let mut loaded = Loaded::default();
            if let Some(state) = read_json::<CacheState>(&self.path).await? {
                loaded.clock = state.clock;
                loaded.hits = state.hits;
                loaded.misses = state.misses;
                loaded.evictions = state.evictions;
                for entry in state.entries {
                    loaded.clock = loaded.clock.max(entry.last_access);
                    loaded.entries.insert(entry.key.clone(), entry);
                }
            }
            self.state = Some(loaded);
        }
        Ok(self.state.get_or_insert_with(Loaded::default))
    }

    async fn persist(&mut self) {
        let Some(loaded) = &self.state else {
            return;
        };
        let state = CacheState {
            clock: loaded.clock,
            hits: loaded.hits,
            misses: loaded.misses,
            evictions: loaded.evictions,
            entries: loaded.entries.values().cloned().collect(),
        };
        if let Err(e) = write_json_atomic(&self.path, &state).await {
            warn!(error = %e, "failed to persist response cache");
        }
    }

    async fn live_hash(&self, rel: &str) -> String {
        match tokio::fs::read(self.root.join(rel)).await {
            Ok(bytes) => content_hash(&String::from_utf8_lossy(&bytes)),
            Err(_) => MISSING_FILE_HASH.to_string(),
        }
    }

    /// Cached response for `(prompt, model)`, or `None` on a miss. An entry
    /// whose referenced files changed is evicted and reported as a miss.
    pub async fn get(&mut self, prompt: &str, model: &str) -> Result<Option<String>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let key = cache_key(prompt, model);
        let recorded = self
            .state()
            .await?
            .entries
            .get(&key)
            .map(|entry| entry.files.clone());
        let Some(recorded) = recorded else {
            self.state().await?.misses += 1;
            self.persist().await;
            return Ok(None);
        };

        let mut stale = None;
        for (path, hash) in &recorded {
            if self.live_hash(path).await != *hash {
                stale = Some(path.clone());
                break;
            }
        }

        let state = self.state().await?;
        let response = match stale {
            Some(path) => {
                debug!(file = %path, "cached response invalidated by file change");
                state.entries.remove(&key);
                state.misses += 1;
                None
            }
            None => {
                let stamp = state.tick();
                state.hits += 1;
                state.entries.get_mut(&key).map(|entry| {
                    entry.last_access = stamp;
                    entry.response.clone()
                })
            }
        };
        self.persist().await;
        Ok(response)
    }

    /// Store a response derived from `files` (paths relative to the root).
    /// An entry larger than the whole byte budget is not stored.
    pub async fn set(
        &mut self,
        prompt: &str,
        model: &str,
        response: &str,
        files: &[String],
    ) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let key = cache_key(prompt, model);
        let size = prompt.len() + response.len();

        let mut hashes = BTreeMap::new();
        for path in files {
            hashes.insert(path.clone(), self.live_hash(path).await);
        }

        let max_bytes = self.config.max_bytes;
        let state = self.state().await?;
        state.entries.remove(&key);
        if size > max_bytes {
            debug!(size, max_bytes, "response larger than cache budget, not cached");
            self.persist().await;
            return Ok(());
        }
        while state.total_bytes() + size > max_bytes && state.evict_lru() {}

        let stamp = state.tick();
        state.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                prompt: prompt.to_string(),
                model: model.to_string(),
                response: response.to_string(),
                timestamp: Utc::now().timestamp_millis(),
                files: hashes,
                size,
                last_access: stamp,
            },
        );
        self.persist().await;
        Ok(())
    }

    /// Drop the entry for `(prompt, model)`. Returns whether one existed.
    pub async fn invalidate(&mut self, prompt: &str, model: &str) -> Result<bool> {
        let key = cache_key(prompt, model);
        let removed = self.state().await?.entries.remove(&key).is_some();
        if removed {
            self.persist().await;
        }
        Ok(removed)
    }

    /// Drop every entry that references `path`. Returns the number dropped.
    pub async fn invalidate_file(&mut self, path: &str) -> Result<usize> {
        let state = self.state().await?;
        let before = state.entries.len();
        state.entries.retain(|_, e| !e.files.contains_key(path));
        let removed = before - state.entries.len();
        if removed > 0 {
            self.persist().await;
        }
        Ok(removed)
    }

    pub async fn clear(&mut self) -> Result<()> {
        self.state = Some(Loaded::default());
        self.persist().await;
        Ok(())
    }

    pub async fn get_stats(&mut self) -> Result<CacheStats> {
        let max_bytes = self.config.max_bytes;
        let state = self.state().await?;
        let lookups = state.hits + state.misses;
        Ok(CacheStats {
            total_entries: state.entries.len(),
            total_bytes: state.total_bytes(),
            max_bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn cache_in(dir: &Path, max_bytes: usize) -> AiCache {
        let paths = RepoPaths::new(&dir.join(".codectx"), "repo");
        AiCache::new(
            &paths,
            dir,
            CacheConfig {
                enabled: true,
                max_bytes,
            },
        )
    }

    #[tokio::test]
    async fn test_hit_and_persisted_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = cache_in(dir.path(), 1024);
        cache.set("explain foo", "gpt", "it adds", &[]).await.unwrap();
        assert_eq!(
            cache.get("explain foo", "gpt").await.unwrap().as_deref(),
            Some("it adds")
        );
        assert_eq!(cache.get("explain foo", "other").await.unwrap(), None);

        let mut reopened = cache_in(dir.path(), 1024);
        assert_eq!(
            reopened.get("explain foo", "gpt").await.unwrap().as_deref(),
            Some("it adds")
        );
        let stats = reopened.get_stats().await.unwrap();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_file_change_invalidates_on_get() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.ts"), "export const a = 1;").unwrap();
        let mut cache = cache_in(dir.path(), 1024);
        cache
            .set("review", "m", "looks fine", &["f.ts".to_string()])
            .await
            .unwrap();
        cache.set("other", "m", "unrelated", &[]).await.unwrap();
        assert_eq!(cache.get_stats().await.unwrap().total_entries, 2);

        std::fs::write(dir.path().join("f.ts"), "export const a = 2;").unwrap();
        assert_eq!(cache.get("review", "m").await.unwrap(), None);
        assert_eq!(cache.get_stats().await.unwrap().total_entries, 1);
    }

    #[tokio::test]
    async fn test_lru_evicts_least_recently_accessed() {
        let dir = tempfile::tempdir().unwrap();
        // Each entry is 10 bytes; room for three.
        let mut cache = cache_in(dir.path(), 30);
        cache.set("p1", "m", "r1r1r1r1", &[]).await.unwrap();
        cache.set("p2", "m", "r2r2r2r2", &[]).await.unwrap();
        cache.set("p3", "m", "r3r3r3r3", &[]).await.unwrap();
        assert!(cache.get("p1", "m").await.unwrap().is_some());

        cache.set("p4", "m", "r4r4r4r4", &[]).await.unwrap();
        assert!(cache.get("p2", "m").await.unwrap().is_none());
        assert!(cache.get("p1", "m").await.unwrap().is_some());
        assert!(cache.get("p3", "m").await.unwrap().is_some());
        assert!(cache.get("p4", "m").await.unwrap().is_some());
        assert_eq!(cache.get_stats().await.unwrap().evictions, 1);
    }

    #[tokio::test]
    async fn test_oversized_entry_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = cache_in(dir.path(), 16);
        cache.set("small", "m", "ok", &[]).await.unwrap();
        cache.set("big", "m", &"x".repeat(64), &[]).await.unwrap();
        let stats = cache.get_stats().await.unwrap();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.evictions, 0);
    }

    #[tokio::test]
    async fn test_invalidate_file_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "a").unwrap();
        let mut cache = cache_in(dir.path(), 1024);
        cache.set("q1", "m", "r", &["a.ts".to_string()]).await.unwrap();
        cache.set("q2", "m", "r", &["a.ts".to_string(), "b.ts".to_string()]).await.unwrap();
        cache.set("q3", "m", "r", &[]).await.unwrap();
        assert_eq!(cache.invalidate_file("a.ts").await.unwrap(), 2);
        assert!(cache.invalidate("q3", "m").await.unwrap());
        assert!(!cache.invalidate("q3", "m").await.unwrap());
        cache.set("q4", "m", "r", &[]).await.unwrap();
        cache.clear().await.unwrap();
        assert_eq!(cache.get_stats().await.unwrap().total_entries, 0);
    }

    #[tokio::test]
    async fn test_corrupt_state_resets() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RepoPaths::new(&dir.path().join(".codectx"), "repo");
        std::fs::create_dir_all(&paths.dir).unwrap();
        std::fs::write(paths.cache(), "{ not json").unwrap();
        let mut cache = cache_in(dir.path(), 1024);
        assert_eq!(cache.get("q", "m").await.unwrap(), None);
        cache.set("q", "m", "r", &[]).await.unwrap();
        assert_eq!(cache.get("q", "m").await.unwrap().as_deref(), Some("r"));
    }

    #[tokio::test]
    async fn test_missing_referenced_file_stays_valid_until_created() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = cache_in(dir.path(), 1024);
        cache.set("q", "m", "r", &["new.ts".to_string()]).await.unwrap();
        assert!(cache.get("q", "m").await.unwrap().is_some());
        std::fs::write(dir.path().join("new.ts"), "x").unwrap();
        assert!(cache.get("q", "m").await.unwrap().is_none());
    }

    #[test]
    fn test_cache_key_is_stable() {
        assert_eq!(cache_key("a", "b"), content_hash("a::b"));
        assert_ne!(cache_key("a", "b"), cache_key("a:", ":b"));
    }
}
