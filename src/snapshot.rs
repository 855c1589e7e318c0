// src/snapshot.rs

//! Pin-map snapshots for whole-workspace rollback
//!
//! A snapshot is nothing more than the serialized pin map plus the
//! workspace mode and a timestamp. Restoring one delegates to the apply
//! orchestrator with the recorded pins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::Context;
use crate::error::{Error, Result};
use crate::fsutil::atomic_write;
use crate::git::GitDriver;
use crate::manifest::{Manifest, WorkspaceMode};
use crate::vendor::provenance::Provenance;

/// A captured pin map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub created_at: DateTime<Utc>,
    pub mode: WorkspaceMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// component -> pin (commit sha in reference mode, semver in vendored)
    pub pins: BTreeMap<String, String>,
}

/// Capture the current on-disk state of every manifest component.
///
/// A reference-mode working tree contributes its checked-out commit, a
/// vendored tree its recorded semver; components not yet materialized fall
/// back to their manifest pin.
pub fn capture(
    ctx: &Context,
    manifest: &Manifest,
    git: &GitDriver,
    env: Option<&str>,
) -> Result<Snapshot> {
    let mut pins = BTreeMap::new();
    for component in manifest.components.values() {
        let dir = ctx.workspace.component_dir(&component.name);
        let pin = match manifest.mode {
            WorkspaceMode::Reference if dir.join(".git").exists() => git.commit_sha(&dir)?,
            WorkspaceMode::Vendored => match Provenance::read(&dir)? {
                Some(provenance) => provenance.version,
                None => component.version.clone(),
            },
            _ => match env {
                Some(env) => manifest.pin_for(&component.name, env)?,
                None => component.version.clone(),
            },
        };
        pins.insert(component.name.clone(), pin);
    }

    Ok(Snapshot {
        created_at: Utc::now(),
        mode: manifest.mode,
        environment: env.map(str::to_string),
        pins,
    })
}

/// Write a snapshot under `.meta/snapshots/`; the name defaults to the
/// creation timestamp
pub fn save(ctx: &Context, snapshot: &Snapshot, name: Option<&str>) -> Result<PathBuf> {
    let dir = ctx.workspace.snapshots_dir();
    fs::create_dir_all(&dir)?;

    let name = match name {
        Some(name) => name.to_string(),
        None => snapshot.created_at.format("%Y%m%d-%H%M%S").to_string(),
    };
    let path = dir.join(format!("{name}.yaml"));
    atomic_write(&path, serde_yaml::to_string(snapshot)?.as_bytes())?;
    info!("snapshot written to {}", path.display());
    Ok(path)
}

/// Load a snapshot by path or by bare name
pub fn load(ctx: &Context, reference: &str) -> Result<Snapshot> {
    let direct = Path::new(reference);
    let path = if direct.exists() {
        direct.to_path_buf()
    } else {
        ctx.workspace.snapshots_dir().join(format!("{reference}.yaml"))
    };

    let content = fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::Manifest(format!("snapshot '{reference}' not found"))
        } else {
            e.into()
        }
    })?;
    Ok(serde_yaml::from_str(&content)?)
}

/// All snapshots, newest first
pub fn list(ctx: &Context) -> Result<Vec<(PathBuf, Snapshot)>> {
    let dir = ctx.workspace.snapshots_dir();
    let mut snapshots = Vec::new();
    if !dir.is_dir() {
        return Ok(snapshots);
    }
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|e| e == "yaml") {
            if let Ok(content) = fs::read_to_string(&path) {
                if let Ok(snapshot) = serde_yaml::from_str::<Snapshot>(&content) {
                    snapshots.push((path, snapshot));
                }
            }
        }
    }
    snapshots.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));
    Ok(snapshots)
}
