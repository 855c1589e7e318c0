// src/hash.rs

//! Content hashing for lock identity, store addressing, and cache keys
//!
//! Two algorithms are used, each where it fits:
//! - **SHA-256** for store addressing and lock identity, where the hash is
//!   persisted and verified later
//! - **XXH128** for build-cache keys, where only collision resistance within
//!   a workspace matters and speed does
//!
//! The canonical tree hash covers file mode, relative path, and content hash
//! per entry, over entries in sorted path order, so two trees with identical
//! contents always hash identically regardless of creation order.

use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use walkdir::WalkDir;
use xxhash_rust::xxh3::xxh3_128;

use crate::error::Result;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-256, persisted hashes (store entries, lock identity)
    #[default]
    Sha256,
    /// XXH128, ephemeral keys (build cache)
    Xxh128,
}

impl HashAlgorithm {
    /// Hex string length for this algorithm
    #[inline]
    pub const fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Xxh128 => 32,
        }
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Xxh128 => "xxh128",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Incremental hasher over either algorithm
pub struct Hasher {
    algorithm: HashAlgorithm,
    state: HasherState,
}

enum HasherState {
    Sha256(Sha256),
    // XXH3 has no incremental API here; buffer and hash at the end
    Xxh128(Vec<u8>),
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Xxh128 => HasherState::Xxh128(Vec::new()),
        };
        Self { algorithm, state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(h) => h.update(data),
            HasherState::Xxh128(buf) => buf.extend_from_slice(data),
        }
    }

    pub fn finalize(self) -> String {
        match self.state {
            HasherState::Sha256(h) => format!("{:x}", h.finalize()),
            HasherState::Xxh128(buf) => format!("{:032x}", xxh3_128(&buf)),
        }
    }

    #[inline]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}

/// Hash a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut h = Sha256::new();
            h.update(data);
            format!("{:x}", h.finalize())
        }
        HashAlgorithm::Xxh128 => format!("{:032x}", xxh3_128(data)),
    }
}

/// SHA-256 of a byte slice
#[inline]
pub fn sha256(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Sha256, data)
}

/// XXH128 of a byte slice
#[inline]
pub fn xxh128(data: &[u8]) -> String {
    hash_bytes(HashAlgorithm::Xxh128, data)
}

/// Hash a reader without loading it into memory
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<String> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; 8192];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize())
}

/// SHA-256 of a file's contents, streamed
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    Ok(hash_reader(HashAlgorithm::Sha256, &mut file)?)
}

/// Canonical SHA-256 over a directory tree.
///
/// Entries are visited in sorted relative-path order; each contributes a
/// line `mode|path|content-hash` (directories contribute `mode|path|dir`,
/// symlinks hash their target instead of following it). `.git` directories
/// are never part of a tree's identity.
pub fn hash_tree(root: &Path) -> Result<String> {
    let mut hasher = Hasher::new(HashAlgorithm::Sha256);
    let mut entries: Vec<_> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| io::Error::other(format!("walk {}: {e}", root.display())))?;
    entries.sort_by(|a, b| a.path().cmp(b.path()));

    for entry in entries {
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let meta = entry.path().symlink_metadata()?;
        let mode = meta.permissions().mode() & 0o7777;

        let content = if meta.file_type().is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            sha256(target.to_string_lossy().as_bytes())
        } else if meta.is_dir() {
            "dir".to_string()
        } else {
            hash_file(entry.path())?
        };

        hasher.update(format!("{:o}|{}|{}\n", mode, rel.display(), content).as_bytes());
    }

    Ok(hasher.finalize())
}

/// Combine a tree hash with a caller-supplied input digest into a store key
pub fn combine_digests(tree_hash: &str, inputs_digest: &str) -> String {
    sha256(format!("{tree_hash}\n{inputs_digest}").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256(b"Hello, World!"),
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[test]
    fn test_xxh128_length() {
        assert_eq!(xxh128(b"Hello, World!").len(), 32);
    }

    #[test]
    fn test_hasher_incremental_matches_oneshot() {
        let mut hasher = Hasher::new(HashAlgorithm::Sha256);
        hasher.update(b"Hello, ");
        hasher.update(b"World!");
        assert_eq!(hasher.finalize(), sha256(b"Hello, World!"));
    }

    #[test]
    fn test_hash_reader() {
        let data = b"some streamed content";
        let mut cursor = io::Cursor::new(&data[..]);
        let streamed = hash_reader(HashAlgorithm::Sha256, &mut cursor).unwrap();
        assert_eq!(streamed, sha256(data));
    }

    #[test]
    fn test_tree_hash_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        fs::write(dir.path().join("sub/b.txt"), "beta").unwrap();

        let h1 = hash_tree(dir.path()).unwrap();
        let h2 = hash_tree(dir.path()).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_tree_hash_sensitive_to_content_and_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        let original = hash_tree(dir.path()).unwrap();

        fs::write(dir.path().join("a.txt"), "changed").unwrap();
        let edited = hash_tree(dir.path()).unwrap();
        assert_ne!(original, edited);

        fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        fs::rename(dir.path().join("a.txt"), dir.path().join("b.txt")).unwrap();
        let renamed = hash_tree(dir.path()).unwrap();
        assert_ne!(original, renamed);
    }

    #[test]
    fn test_tree_hash_ignores_git_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        let before = hash_tree(dir.path()).unwrap();

        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        let after = hash_tree(dir.path()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_combine_digests_changes_key() {
        let tree = sha256(b"tree");
        let a = combine_digests(&tree, "api|v1.0.0|");
        let b = combine_digests(&tree, "api|v1.1.0|");
        assert_ne!(a, b);
    }
}
