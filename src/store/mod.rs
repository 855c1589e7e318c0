// src/store/mod.rs

//! Content-addressed artifact store
//!
//! Directory trees are stored under `.meta-store/<hh>/<hash>/` with a
//! sibling `<hash>.metadata.json`. The address is the canonical tree hash
//! combined with a caller-supplied inputs digest (component name, version,
//! dependency hashes), so identical trees built from different inputs get
//! distinct entries. Entries are immutable; re-adding existing content is a
//! no-op. Writes stage into a temp directory and rename, so readers never
//! observe partial entries.

mod cache;
mod gc;
mod remote;

pub use cache::{cache_key, Cache, CacheEntry, CacheStats};
pub use gc::{run_gc, GcReport};
pub use remote::{backend_from_url, pack_entry, unpack_entry, RemoteBackend, RemoteStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::fsutil::{atomic_write, copy_tree, replace_tree_atomic, CopyFilter};
use crate::hash::{combine_digests, hash_tree};

/// Declared inputs for a store entry
#[derive(Debug, Clone, Default)]
pub struct StoreInputs {
    pub component: String,
    /// Materialization identity: commit sha or semver
    pub version: Option<String>,
    pub inputs_digest: String,
    /// Store hashes of dependency entries
    pub references: Vec<String>,
}

/// Sidecar metadata for a store entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub hash: String,
    /// Canonical hash of the stored tree alone
    pub tree_hash: String,
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub inputs_digest: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
}

/// The content-addressed store
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn shard(&self, hash: &str) -> PathBuf {
        self.root.join(&hash[..2.min(hash.len())])
    }

    /// Directory holding the stored tree
    pub fn entry_dir(&self, hash: &str) -> PathBuf {
        self.shard(hash).join(hash)
    }

    fn metadata_path(&self, hash: &str) -> PathBuf {
        self.shard(hash).join(format!("{hash}.metadata.json"))
    }

    /// Add a tree to the store; returns its address.
    ///
    /// Idempotent: existing content is left untouched.
    pub fn add(&self, source: &Path, inputs: &StoreInputs) -> Result<String> {
        if !source.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("store source {} is not a directory", source.display()),
            )));
        }

        let tree_hash = hash_tree(source)?;
        let hash = combine_digests(&tree_hash, &inputs.inputs_digest);
        let entry_dir = self.entry_dir(&hash);

        if entry_dir.exists() {
            debug!("store entry {hash} already present");
            return Ok(hash);
        }

        let shard = self.shard(&hash);
        fs::create_dir_all(&shard)?;
        let staging = shard.join(format!(".{hash}.tmp"));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        copy_tree(source, &staging, &CopyFilter::none())?;
        fs::rename(&staging, &entry_dir)?;

        let metadata = StoreMetadata {
            hash: hash.clone(),
            tree_hash,
            component: inputs.component.clone(),
            version: inputs.version.clone(),
            inputs_digest: inputs.inputs_digest.clone(),
            created_at: Utc::now(),
            references: inputs.references.clone(),
        };
        atomic_write(&self.metadata_path(&hash), serde_json::to_vec_pretty(&metadata)?.as_slice())?;

        info!("stored {} as {hash}", inputs.component);
        Ok(hash)
    }

    /// Restore an entry's tree into `target`, atomically replacing any
    /// existing tree there
    pub fn get(&self, hash: &str, target: &Path) -> Result<()> {
        let entry_dir = self.entry_dir(hash);
        if !entry_dir.exists() {
            return Err(not_found(hash));
        }
        replace_tree_atomic(&entry_dir, target, &CopyFilter::none())
    }

    /// Entry metadata, or `None` for an unknown hash
    pub fn query(&self, hash: &str) -> Result<Option<StoreMetadata>> {
        match fs::read_to_string(self.metadata_path(hash)) {
            Ok(content) => Ok(Some(serde_json::from_str(&content).map_err(|e| {
                Error::Io(std::io::Error::other(format!("corrupt metadata for {hash}: {e}")))
            })?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, hash: &str) -> bool {
        self.entry_dir(hash).exists()
    }

    /// Recompute the stored tree's hash and compare against metadata
    pub fn verify(&self, hash: &str) -> Result<bool> {
        let Some(metadata) = self.query(hash)? else { return Err(not_found(hash)) };
        let actual = hash_tree(&self.entry_dir(hash))?;
        Ok(actual == metadata.tree_hash
            && combine_digests(&actual, &metadata.inputs_digest) == metadata.hash)
    }

    /// All entry metadata, sorted by hash
    pub fn list(&self) -> Result<Vec<StoreMetadata>> {
        let mut entries = Vec::new();
        if !self.root.is_dir() {
            return Ok(entries);
        }
        for shard in fs::read_dir(&self.root)? {
            let shard = shard?.path();
            if !shard.is_dir() {
                continue;
            }
            for file in fs::read_dir(&shard)? {
                let path = file?.path();
                let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
                if let Some(name) = name {
                    if let Some(hash) = name.strip_suffix(".metadata.json") {
                        if let Some(metadata) = self.query(hash)? {
                            entries.push(metadata);
                        }
                    }
                }
            }
        }
        entries.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(entries)
    }

    /// Delete an entry and its metadata. Used only by GC.
    pub fn remove(&self, hash: &str) -> Result<()> {
        let entry_dir = self.entry_dir(hash);
        if entry_dir.exists() {
            fs::remove_dir_all(&entry_dir)?;
        }
        let metadata = self.metadata_path(hash);
        if metadata.exists() {
            fs::remove_file(&metadata)?;
        }
        Ok(())
    }
}

fn not_found(hash: &str) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("store entry {hash} not found"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.py"), "print('hi')\n").unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/util.py"), "x = 1\n").unwrap();
        dir
    }

    fn inputs(component: &str, version: &str) -> StoreInputs {
        StoreInputs {
            component: component.to_string(),
            version: Some(version.to_string()),
            inputs_digest: format!("{component}|{version}|"),
            references: Vec::new(),
        }
    }

    #[test]
    fn test_add_get_roundtrip() {
        let store_dir = tempfile::tempdir().unwrap();
        let store = Store::open(store_dir.path()).unwrap();
        let source = sample_tree();

        let hash = store.add(source.path(), &inputs("api", "v1.0.0")).unwrap();
        assert!(store.exists(&hash));

        let target = tempfile::tempdir().unwrap();
        let restore_to = target.path().join("restored");
        store.get(&hash, &restore_to).unwrap();

        assert_eq!(fs::read_to_string(restore_to.join("main.py")).unwrap(), "print('hi')\n");
        assert_eq!(fs::read_to_string(restore_to.join("lib/util.py")).unwrap(), "x = 1\n");
    }

    #[test]
    fn test_readd_is_noop_with_same_hash() {
        let store_dir = tempfile::tempdir().unwrap();
        let store = Store::open(store_dir.path()).unwrap();
        let source = sample_tree();

        let first = store.add(source.path(), &inputs("api", "v1.0.0")).unwrap();
        let second = store.add(source.path(), &inputs("api", "v1.0.0")).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_inputs_digest_distinguishes_entries() {
        let store_dir = tempfile::tempdir().unwrap();
        let store = Store::open(store_dir.path()).unwrap();
        let source = sample_tree();

        let v1 = store.add(source.path(), &inputs("api", "v1.0.0")).unwrap();
        let v2 = store.add(source.path(), &inputs("api", "v2.0.0")).unwrap();
        assert_ne!(v1, v2);
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn test_query_metadata() {
        let store_dir = tempfile::tempdir().unwrap();
        let store = Store::open(store_dir.path()).unwrap();
        let source = sample_tree();

        let hash = store.add(source.path(), &inputs("api", "v1.0.0")).unwrap();
        let metadata = store.query(&hash).unwrap().unwrap();
        assert_eq!(metadata.hash, hash);
        assert_eq!(metadata.component, "api");
        assert_eq!(metadata.version.as_deref(), Some("v1.0.0"));

        assert!(store.query(&"0".repeat(64)).unwrap().is_none());
    }

    #[test]
    fn test_get_missing_entry_is_not_found() {
        let store_dir = tempfile::tempdir().unwrap();
        let store = Store::open(store_dir.path()).unwrap();
        let target = tempfile::tempdir().unwrap();

        let err = store.get(&"0".repeat(64), &target.path().join("x")).unwrap_err();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("expected Io/NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_detects_tampering() {
        let store_dir = tempfile::tempdir().unwrap();
        let store = Store::open(store_dir.path()).unwrap();
        let source = sample_tree();

        let hash = store.add(source.path(), &inputs("api", "v1.0.0")).unwrap();
        assert!(store.verify(&hash).unwrap());

        fs::write(store.entry_dir(&hash).join("main.py"), "tampered\n").unwrap();
        assert!(!store.verify(&hash).unwrap());
    }

    #[test]
    fn test_remove_deletes_entry_and_metadata() {
        let store_dir = tempfile::tempdir().unwrap();
        let store = Store::open(store_dir.path()).unwrap();
        let source = sample_tree();

        let hash = store.add(source.path(), &inputs("api", "v1.0.0")).unwrap();
        store.remove(&hash).unwrap();
        assert!(!store.exists(&hash));
        assert!(store.query(&hash).unwrap().is_none());
    }
}
