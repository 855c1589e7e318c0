// src/workspace.rs

//! Workspace discovery, path layout, and the invocation-level mutex
//!
//! A workspace is the directory tree that composes the components. Every
//! state file the tool owns lives at a stable path below the root:
//!
//! ```text
//! manifests/                      components/environments/features YAML
//! manifests/components.lock.<env>.yaml
//! components/<name>/              working trees or vendored trees
//! .meta/config.yaml               project configuration
//! .meta/changesets/               changeset records + index
//! .meta/backups/<timestamp>/      conversion backups
//! .meta/conversion-checkpoints/   conversion transaction logs
//! .meta/snapshots/                pin-map snapshots
//! .meta-store/<hh>/<hash>/        content-addressed store
//! .meta-cache/                    build cache index
//! ```

use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Marker files that identify a workspace root
const ROOT_MARKERS: [&str; 2] = ["manifests/components.yaml", ".meta"];

/// Resolved workspace paths
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    manifests_dir: String,
}

impl Workspace {
    /// Open a workspace at an explicit root
    pub fn at(root: impl Into<PathBuf>, manifests_dir: &str) -> Self {
        Self { root: root.into(), manifests_dir: manifests_dir.to_string() }
    }

    /// Walk upward from `start` until a workspace marker is found
    pub fn discover(start: &Path, manifests_dir: &str) -> Result<Self> {
        let mut dir = start.to_path_buf();
        loop {
            if ROOT_MARKERS.iter().any(|m| dir.join(m).exists())
                || dir.join(manifests_dir).join("components.yaml").exists()
            {
                debug!("workspace root: {}", dir.display());
                return Ok(Self::at(dir, manifests_dir));
            }
            if !dir.pop() {
                return Err(Error::Manifest(format!(
                    "no workspace found above {} (missing {}/components.yaml)",
                    start.display(),
                    manifests_dir
                )));
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join(&self.manifests_dir)
    }

    pub fn components_manifest(&self) -> PathBuf {
        self.manifests_dir().join("components.yaml")
    }

    pub fn environments_manifest(&self) -> PathBuf {
        self.manifests_dir().join("environments.yaml")
    }

    pub fn features_manifest(&self) -> PathBuf {
        self.manifests_dir().join("features.yaml")
    }

    pub fn component_dir(&self, name: &str) -> PathBuf {
        self.root.join("components").join(name)
    }

    pub fn components_dir(&self) -> PathBuf {
        self.root.join("components")
    }

    pub fn lock_path(&self, env: &str) -> PathBuf {
        self.manifests_dir().join(format!("components.lock.{env}.yaml"))
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(".meta")
    }

    pub fn config_file(&self) -> PathBuf {
        self.meta_dir().join("config.yaml")
    }

    pub fn changesets_dir(&self) -> PathBuf {
        self.meta_dir().join("changesets")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.meta_dir().join("backups")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.meta_dir().join("conversion-checkpoints")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.meta_dir().join("snapshots")
    }

    pub fn plans_dir(&self) -> PathBuf {
        self.meta_dir().join("plans")
    }

    pub fn store_dir(&self) -> PathBuf {
        self.root.join(".meta-store")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(".meta-cache")
    }

    fn lock_file_path(&self) -> PathBuf {
        self.meta_dir().join("workspace.lock")
    }

    /// List lock-file environments present on disk
    pub fn lock_envs(&self) -> Result<Vec<String>> {
        let mut envs = Vec::new();
        let dir = self.manifests_dir();
        if !dir.is_dir() {
            return Ok(envs);
        }
        for entry in fs::read_dir(dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(env) = name
                .strip_prefix("components.lock.")
                .and_then(|rest| rest.strip_suffix(".yaml"))
            {
                envs.push(env.to_string());
            }
        }
        envs.sort();
        Ok(envs)
    }

    /// Acquire the exclusive workspace mutex.
    ///
    /// `wait` blocks until the lock is free; otherwise a held lock fails
    /// immediately with `WorkspaceBusy`.
    pub fn acquire_lock(&self, wait: bool) -> Result<WorkspaceLock> {
        fs::create_dir_all(self.meta_dir())?;
        let path = self.lock_file_path();
        let file = File::create(&path)?;

        if wait {
            file.lock_exclusive()?;
        } else {
            file.try_lock_exclusive().map_err(|_| {
                Error::WorkspaceBusy(format!(
                    "another invocation holds {}",
                    path.display()
                ))
            })?;
        }
        debug!("acquired workspace lock at {}", path.display());
        Ok(WorkspaceLock { file })
    }
}

/// Held workspace mutex; released on drop
pub struct WorkspaceLock {
    file: File,
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("manifests")).unwrap();
        fs::write(dir.path().join("manifests/components.yaml"), "components: {}\n").unwrap();
        let ws = Workspace::at(dir.path(), "manifests");
        (dir, ws)
    }

    #[test]
    fn test_discover_from_subdirectory() {
        let (dir, _) = scratch_workspace();
        let nested = dir.path().join("components/api/src");
        fs::create_dir_all(&nested).unwrap();

        let ws = Workspace::discover(&nested, "manifests").unwrap();
        assert_eq!(ws.root(), dir.path());
    }

    #[test]
    fn test_discover_fails_outside_workspace() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Workspace::discover(dir.path(), "manifests").is_err());
    }

    #[test]
    fn test_lock_paths_are_per_environment() {
        let (_dir, ws) = scratch_workspace();
        assert!(ws.lock_path("dev").ends_with("manifests/components.lock.dev.yaml"));
        assert_ne!(ws.lock_path("dev"), ws.lock_path("prod"));
    }

    #[test]
    fn test_lock_envs_listing() {
        let (dir, ws) = scratch_workspace();
        fs::write(dir.path().join("manifests/components.lock.dev.yaml"), "x: 1\n").unwrap();
        fs::write(dir.path().join("manifests/components.lock.prod.yaml"), "x: 1\n").unwrap();
        assert_eq!(ws.lock_envs().unwrap(), vec!["dev".to_string(), "prod".to_string()]);
    }

    #[test]
    fn test_workspace_mutex_excludes_second_holder() {
        let (_dir, ws) = scratch_workspace();
        let held = ws.acquire_lock(false).unwrap();
        let second = ws.acquire_lock(false);
        assert!(matches!(second, Err(Error::WorkspaceBusy(_))));
        drop(held);
        assert!(ws.acquire_lock(false).is_ok());
    }
}
