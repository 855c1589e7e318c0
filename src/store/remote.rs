// src/store/remote.rs

//! Remote object-storage mirror for the store
//!
//! The backend is selected by URL prefix: `s3://bucket/prefix` or
//! `gs://bucket/prefix`. Entries travel as tar.gz archives of the stored
//! tree plus its metadata sidecar. Authentication comes from the host
//! environment; nothing is ever persisted in manifests.
//!
//! Remote failures are always recoverable: callers log them and continue on
//! the local store alone.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::fsutil::atomic_write;

use super::{Store, StoreMetadata};

/// HTTP timeout for blob transfers
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Bearer-token environment variables consulted, in order
const TOKEN_VARS: [&str; 3] =
    ["META_REMOTE_TOKEN", "GOOGLE_OAUTH_ACCESS_TOKEN", "AWS_SESSION_TOKEN"];

/// A remote blob backend keyed by store hash
pub trait RemoteBackend: Send + Sync {
    /// Upload an archive; overwriting an identical key is benign
    fn put(&self, hash: &str, archive: &[u8]) -> Result<()>;

    /// Download an archive, or `None` when the key is absent
    fn get(&self, hash: &str) -> Result<Option<Vec<u8>>>;

    fn exists(&self, hash: &str) -> Result<bool>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// HTTPS object-storage backend (S3- and GCS-style endpoints)
struct HttpBackend {
    endpoint: String,
    scheme_name: &'static str,
    client: reqwest::blocking::Client,
}

impl HttpBackend {
    fn new(endpoint: String, scheme_name: &'static str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::RemoteBackend(format!("http client: {e}")))?;
        Ok(Self { endpoint, scheme_name, client })
    }

    fn object_url(&self, hash: &str) -> String {
        format!("{}/{hash}.tar.gz", self.endpoint)
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        for var in TOKEN_VARS {
            if let Ok(token) = std::env::var(var) {
                if !token.is_empty() {
                    return request.bearer_auth(token);
                }
            }
        }
        request
    }
}

impl RemoteBackend for HttpBackend {
    fn put(&self, hash: &str, archive: &[u8]) -> Result<()> {
        let url = self.object_url(hash);
        let response = self
            .authorize(self.client.put(&url))
            .body(archive.to_vec())
            .send()
            .map_err(|e| Error::RemoteBackend(format!("put {url}: {e}")))?;
        if response.status().is_success() {
            debug!("uploaded {hash} to {}", self.describe());
            Ok(())
        } else {
            Err(Error::RemoteBackend(format!("put {url}: HTTP {}", response.status())))
        }
    }

    fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        let url = self.object_url(hash);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .map_err(|e| Error::RemoteBackend(format!("get {url}: {e}")))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::RemoteBackend(format!("get {url}: HTTP {}", response.status())));
        }
        let bytes = response
            .bytes()
            .map_err(|e| Error::RemoteBackend(format!("get {url}: {e}")))?;
        Ok(Some(bytes.to_vec()))
    }

    fn exists(&self, hash: &str) -> Result<bool> {
        let url = self.object_url(hash);
        let response = self
            .authorize(self.client.head(&url))
            .send()
            .map_err(|e| Error::RemoteBackend(format!("head {url}: {e}")))?;
        Ok(response.status().is_success())
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.scheme_name, self.endpoint)
    }
}

/// Build a backend from an `s3://` or `gs://` URL
pub fn backend_from_url(url: &str) -> Result<Box<dyn RemoteBackend>> {
    let (scheme_name, rest) = if let Some(rest) = url.strip_prefix("s3://") {
        ("s3", rest)
    } else if let Some(rest) = url.strip_prefix("gs://") {
        ("gs", rest)
    } else {
        return Err(Error::RemoteBackend(format!(
            "unsupported remote URL '{url}' (expected s3:// or gs://)"
        )));
    };

    let rest = rest.trim_end_matches('/');
    let (bucket, prefix) = match rest.split_once('/') {
        Some((bucket, prefix)) => (bucket, Some(prefix)),
        None => (rest, None),
    };
    if bucket.is_empty() {
        return Err(Error::RemoteBackend(format!("remote URL '{url}' has no bucket")));
    }

    let base = match scheme_name {
        "s3" => format!("https://{bucket}.s3.amazonaws.com"),
        _ => format!("https://storage.googleapis.com/{bucket}"),
    };
    let endpoint = match prefix {
        Some(prefix) => format!("{base}/{prefix}"),
        None => base,
    };

    Ok(Box::new(HttpBackend::new(endpoint, scheme_name)?))
}

/// Archive a store entry (tree + metadata) into a tar.gz blob
pub fn pack_entry(store: &Store, hash: &str) -> Result<Vec<u8>> {
    let entry_dir = store.entry_dir(hash);
    let metadata = store.query(hash)?.ok_or_else(|| {
        Error::RemoteBackend(format!("cannot pack unknown store entry {hash}"))
    })?;

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    builder
        .append_dir_all("tree", &entry_dir)
        .map_err(|e| Error::RemoteBackend(format!("pack {hash}: {e}")))?;

    let metadata_bytes = serde_json::to_vec_pretty(&metadata)?;
    let mut header = tar::Header::new_gnu();
    header.set_size(metadata_bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "metadata.json", metadata_bytes.as_slice())
        .map_err(|e| Error::RemoteBackend(format!("pack {hash}: {e}")))?;

    let encoder = builder
        .into_inner()
        .map_err(|e| Error::RemoteBackend(format!("pack {hash}: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::RemoteBackend(format!("pack {hash}: {e}")))
}

/// Unpack a blob into the local store under its recorded hash
pub fn unpack_entry(store: &Store, archive: &[u8]) -> Result<StoreMetadata> {
    let staging = tempfile::tempdir_in(store.root())?;
    let mut tar = tar::Archive::new(GzDecoder::new(archive));
    tar.unpack(staging.path())
        .map_err(|e| Error::RemoteBackend(format!("unpack: {e}")))?;

    let metadata_path = staging.path().join("metadata.json");
    let mut content = String::new();
    fs::File::open(&metadata_path)
        .and_then(|mut f| f.read_to_string(&mut content))
        .map_err(|e| Error::RemoteBackend(format!("unpack: missing metadata.json: {e}")))?;
    let metadata: StoreMetadata = serde_json::from_str(&content)
        .map_err(|e| Error::RemoteBackend(format!("unpack: corrupt metadata.json: {e}")))?;

    let entry_dir = store.entry_dir(&metadata.hash);
    if !entry_dir.exists() {
        if let Some(parent) = entry_dir.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(staging.path().join("tree"), &entry_dir)?;
        let sidecar = entry_dir
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{}.metadata.json", metadata.hash));
        atomic_write(&sidecar, serde_json::to_vec_pretty(&metadata)?.as_slice())?;
    }
    Ok(metadata)
}

/// Local store with an optional remote mirror
pub struct RemoteStore {
    store: Store,
    backend: Option<Box<dyn RemoteBackend>>,
}

impl RemoteStore {
    pub fn new(store: Store, remote_url: Option<&str>) -> Self {
        let backend = remote_url.and_then(|url| match backend_from_url(url) {
            Ok(backend) => Some(backend),
            Err(e) => {
                warn!("remote store disabled: {e}");
                None
            }
        });
        Self { store, backend }
    }

    pub fn local(&self) -> &Store {
        &self.store
    }

    /// Mirror an entry to the remote. Failures are logged, never fatal.
    pub fn push(&self, hash: &str) {
        let Some(backend) = &self.backend else { return };
        let result = pack_entry(&self.store, hash).and_then(|blob| backend.put(hash, &blob));
        if let Err(e) = result {
            warn!("remote push of {hash} failed, continuing with local store: {e}");
        }
    }

    /// Ensure an entry exists locally, pulling from the remote if needed.
    /// Returns whether the entry is now present.
    pub fn ensure_local(&self, hash: &str) -> bool {
        if self.store.exists(hash) {
            return true;
        }
        let Some(backend) = &self.backend else { return false };
        match backend.get(hash).and_then(|blob| match blob {
            Some(blob) => unpack_entry(&self.store, &blob).map(Some),
            None => Ok(None),
        }) {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                warn!("remote pull of {hash} failed, continuing with local store: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreInputs;

    #[test]
    fn test_backend_url_parsing() {
        assert!(backend_from_url("s3://artifacts/meta").is_ok());
        assert!(backend_from_url("gs://artifacts").is_ok());
        assert!(backend_from_url("ftp://artifacts").is_err());
        assert!(backend_from_url("s3://").is_err());
    }

    #[test]
    fn test_backend_describe_endpoints() {
        let s3 = backend_from_url("s3://bucket/pre").unwrap();
        assert!(s3.describe().contains("bucket.s3.amazonaws.com/pre"));
        let gs = backend_from_url("gs://bucket/pre").unwrap();
        assert!(gs.describe().contains("storage.googleapis.com/bucket/pre"));
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let source_store = Store::open(dir.path().join("src-store")).unwrap();
        let target_store = Store::open(dir.path().join("dst-store")).unwrap();

        let tree = dir.path().join("tree");
        fs::create_dir_all(&tree).unwrap();
        fs::write(tree.join("artifact.txt"), "payload").unwrap();
        let hash = source_store
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

        let blob = pack_entry(&source_store, &hash).unwrap();
        let metadata = unpack_entry(&target_store, &blob).unwrap();

        assert_eq!(metadata.hash, hash);
        assert!(target_store.exists(&hash));
        assert!(target_store.verify(&hash).unwrap());
    }

    #[test]
    fn test_remote_store_without_backend_is_local_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("store")).unwrap();
        let remote = RemoteStore::new(store, None);

        remote.push(&"0".repeat(64));
        assert!(!remote.ensure_local(&"0".repeat(64)));
    }
}
