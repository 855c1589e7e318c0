// src/store/cache.rs

//! Build cache: canonical input keys mapped to store hashes
//!
//! A cache key is the XXH128 of (component version, build target, transitive
//! dependency pins, source tree hash). The cached value is a store hash;
//! the tree itself always lives in the store. Entries expire by age at GC
//! time and can be invalidated explicitly by key or by component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::fsutil::atomic_write;
use crate::hash::xxh128;

use super::Store;

/// Compute the cache key for a component build.
///
/// `dep_pins` must already be in a canonical (sorted) order; the caller
/// passes transitive dependency identities so any upstream change misses.
pub fn cache_key(
    component: &str,
    version: &str,
    build_target: Option<&str>,
    dep_pins: &[String],
    source_hash: &str,
) -> String {
    let canonical = format!(
        "{component}|{version}|{}|{}|{source_hash}",
        build_target.unwrap_or(""),
        dep_pins.join(",")
    );
    xxh128(canonical.as_bytes())
}

/// One cache record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub component: String,
    pub store_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Aggregate cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub total_entries: usize,
    /// component -> entry count
    pub per_component: BTreeMap<String, usize>,
}

/// The on-disk cache index
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
}

impl Cache {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// Record `key -> store_hash`
    pub fn put(&self, key: &str, component: &str, store_hash: &str) -> Result<()> {
        let entry = CacheEntry {
            key: key.to_string(),
            component: component.to_string(),
            store_hash: store_hash.to_string(),
            created_at: Utc::now(),
        };
        atomic_write(&self.entry_path(key), serde_json::to_vec_pretty(&entry)?.as_slice())?;
        debug!("cached {component}: {key} -> {store_hash}");
        Ok(())
    }

    /// The store hash for `key`, or `CacheMiss`. The entry must still have
    /// a live store referent to count as a hit.
    pub fn lookup(&self, key: &str, store: &Store) -> Result<String> {
        let entry = self.read(key)?.ok_or_else(|| Error::CacheMiss(key.to_string()))?;
        if store.exists(&entry.store_hash) {
            Ok(entry.store_hash)
        } else {
            Err(Error::CacheMiss(key.to_string()))
        }
    }

    fn read(&self, key: &str) -> Result<Option<CacheEntry>> {
        match fs::read_to_string(self.entry_path(key)) {
            Ok(content) => Ok(serde_json::from_str(&content).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove one entry; returns whether it existed
    pub fn invalidate(&self, key: &str) -> Result<bool> {
        let path = self.entry_path(key);
        if path.exists() {
            fs::remove_file(&path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Remove every entry for a component; returns how many were removed
    pub fn invalidate_component(&self, component: &str) -> Result<usize> {
        let mut removed = 0;
        for entry in self.entries()? {
            if entry.component == component && self.invalidate(&entry.key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        if !self.root.is_dir() {
            return Ok(entries);
        }
        for file in fs::read_dir(&self.root)? {
            let path = file?.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Ok(content) = fs::read_to_string(&path) {
                    if let Ok(entry) = serde_json::from_str::<CacheEntry>(&content) {
                        entries.push(entry);
                    }
                }
            }
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let entries = self.entries()?;
        let mut per_component: BTreeMap<String, usize> = BTreeMap::new();
        for entry in &entries {
            *per_component.entry(entry.component.clone()).or_default() += 1;
        }
        Ok(CacheStats { total_entries: entries.len(), per_component })
    }

    /// Drop entries older than `ttl` or pointing at vanished store content.
    /// Returns how many were removed.
    pub fn prune(&self, store: &Store, ttl: chrono::Duration) -> Result<usize> {
        let cutoff = Utc::now() - ttl;
        let mut removed = 0;
        for entry in self.entries()? {
            if entry.created_at < cutoff || !store.exists(&entry.store_hash) {
                if self.invalidate(&entry.key)? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreInputs;

    fn store_with_entry() -> (tempfile::TempDir, Store, String) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("store")).unwrap();

        let tree = dir.path().join("tree");
        fs::create_dir_all(&tree).unwrap();
        fs::write(tree.join("out.bin"), "artifact").unwrap();
        let hash = store
            .add(
                &tree,
                &StoreInputs {
                    component: "api".to_string(),
                    version: Some("v1.0.0".to_string()),
                    inputs_digest: "api|v1.0.0|".to_string(),
                    references: Vec::new(),
                },
            )
            .unwrap();
        (dir, store, hash)
    }

    #[test]
    fn test_cache_key_sensitivity() {
        let base = cache_key("api", "v1.0.0", Some("//api:build"), &["core@abc".to_string()], "s1");
        assert_eq!(
            base,
            cache_key("api", "v1.0.0", Some("//api:build"), &["core@abc".to_string()], "s1")
        );
        assert_ne!(base, cache_key("api", "v1.0.1", Some("//api:build"), &["core@abc".to_string()], "s1"));
        assert_ne!(base, cache_key("api", "v1.0.0", None, &["core@abc".to_string()], "s1"));
        assert_ne!(base, cache_key("api", "v1.0.0", Some("//api:build"), &["core@def".to_string()], "s1"));
        assert_ne!(base, cache_key("api", "v1.0.0", Some("//api:build"), &["core@abc".to_string()], "s2"));
    }

    #[test]
    fn test_put_lookup_hit() {
        let (dir, store, hash) = store_with_entry();
        let cache = Cache::open(dir.path().join("cache")).unwrap();

        cache.put("k1", "api", &hash).unwrap();
        assert_eq!(cache.lookup("k1", &store).unwrap(), hash);
    }

    #[test]
    fn test_lookup_miss() {
        let (dir, store, _hash) = store_with_entry();
        let cache = Cache::open(dir.path().join("cache")).unwrap();
        assert!(matches!(cache.lookup("absent", &store), Err(Error::CacheMiss(_))));
    }

    #[test]
    fn test_lookup_misses_when_store_entry_gone() {
        let (dir, store, hash) = store_with_entry();
        let cache = Cache::open(dir.path().join("cache")).unwrap();

        cache.put("k1", "api", &hash).unwrap();
        store.remove(&hash).unwrap();
        assert!(matches!(cache.lookup("k1", &store), Err(Error::CacheMiss(_))));
    }

    #[test]
    fn test_invalidate_by_component() {
        let (dir, _store, hash) = store_with_entry();
        let cache = Cache::open(dir.path().join("cache")).unwrap();

        cache.put("k1", "api", &hash).unwrap();
        cache.put("k2", "api", &hash).unwrap();
        cache.put("k3", "web", &hash).unwrap();

        assert_eq!(cache.invalidate_component("api").unwrap(), 2);
        assert_eq!(cache.entries().unwrap().len(), 1);
    }

    #[test]
    fn test_stats() {
        let (dir, _store, hash) = store_with_entry();
        let cache = Cache::open(dir.path().join("cache")).unwrap();
        cache.put("k1", "api", &hash).unwrap();
        cache.put("k2", "web", &hash).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.per_component.get("api"), Some(&1));
    }

    #[test]
    fn test_prune_removes_dangling() {
        let (dir, store, hash) = store_with_entry();
        let cache = Cache::open(dir.path().join("cache")).unwrap();
        cache.put("live", "api", &hash).unwrap();
        cache.put("dangling", "api", &"0".repeat(64)).unwrap();

        let removed = cache.prune(&store, chrono::Duration::days(30)).unwrap();
        assert_eq!(removed, 1);
        assert!(cache.lookup("live", &store).is_ok());
    }
}
