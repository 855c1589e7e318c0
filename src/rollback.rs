// src/rollback.rs

//! Rollback engine: recover prior state from any recorded identity
//!
//! A rollback target can be a version string, a commit sha, a lock file,
//! a store hash, a snapshot, or a changeset. Every target resolves to a
//! `{component -> pin}` map which is handed to the apply orchestrator;
//! changesets are the exception and roll back by reverting their recorded
//! commits.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::apply::{self, ApplyOptions, ApplySummary};
use crate::changeset::{ChangesetLog, ChangesetStatus};
use crate::config::Context;
use crate::error::{Error, Result};
use crate::git::GitDriver;
use crate::lockfile;
use crate::manifest::{Manifest, WorkspaceMode};
use crate::snapshot;
use crate::store::Store;

/// What to roll back to
#[derive(Debug, Clone)]
pub enum RollbackTarget {
    /// One component at a version or commit
    Component { name: String, pin: String },
    /// Environment name or lock file path
    Lock { reference: String },
    /// A content-addressed store entry
    StoreHash { hash: String },
    /// A named snapshot or snapshot file path
    Snapshot { reference: String },
    /// A committed changeset, rolled back by reverting its commits
    Changeset { id: String },
}

/// A rollback target resolved to concrete pins
#[derive(Debug, Clone)]
pub struct ResolvedRollback {
    pub label: String,
    pub pins: BTreeMap<String, String>,
}

/// Resolve a target into the pin map apply will materialize
pub fn resolve(ctx: &Context, manifest: &Manifest, target: &RollbackTarget) -> Result<ResolvedRollback> {
    match target {
        RollbackTarget::Component { name, pin } => {
            manifest.component(name)?;
            Ok(ResolvedRollback {
                label: format!("{name}@{pin}"),
                pins: [(name.clone(), pin.clone())].into_iter().collect(),
            })
        }

        RollbackTarget::Lock { reference } => {
            let lock = if Path::new(reference).exists() {
                let content = std::fs::read_to_string(reference)?;
                serde_yaml::from_str(&content)?
            } else {
                lockfile::load(ctx, reference)?
            };
            let pins = lock_pins(&lock, manifest.mode);
            Ok(ResolvedRollback { label: format!("lock:{}", lock.environment), pins })
        }

        RollbackTarget::StoreHash { hash } => {
            let store = Store::open(ctx.workspace.store_dir())?;
            let metadata = store.query(hash)?.ok_or_else(|| {
                Error::Manifest(format!("store entry '{hash}' not found"))
            })?;
            let version = metadata.version.ok_or_else(|| {
                Error::Manifest(format!("store entry '{hash}' records no version"))
            })?;
            manifest.component(&metadata.component)?;
            Ok(ResolvedRollback {
                label: format!("store:{}", &hash[..8.min(hash.len())]),
                pins: [(metadata.component, version)].into_iter().collect(),
            })
        }

        RollbackTarget::Snapshot { reference } => {
            let snapshot = snapshot::load(ctx, reference)?;
            if snapshot.mode != manifest.mode {
                return Err(Error::Manifest(format!(
                    "snapshot is {} mode but workspace is {} mode",
                    snapshot.mode, manifest.mode
                )));
            }
            Ok(ResolvedRollback { label: format!("snapshot:{reference}"), pins: snapshot.pins })
        }

        RollbackTarget::Changeset { .. } => Err(Error::Manifest(
            "changeset targets roll back by revert, not by pin map".to_string(),
        )),
    }
}

/// Run a rollback end to end
pub fn execute(
    ctx: &Context,
    target: &RollbackTarget,
    options: &ApplyOptions,
) -> Result<Option<ApplySummary>> {
    let manifest = Manifest::load(&ctx.workspace)?;

    if let RollbackTarget::Changeset { id } = target {
        let log = ChangesetLog::open(ctx)?;
        let git = GitDriver::new(ctx.cancel.clone());
        log.rollback(ctx, &manifest, &git, id)?;
        return Ok(None);
    }

    let resolved = resolve(ctx, &manifest, target)?;
    info!("rolling back to {} ({} component(s))", resolved.label, resolved.pins.len());
    let summary = apply::run_pins(ctx, &resolved.label, &resolved.pins, options)?;
    Ok(Some(summary))
}

fn lock_pins(lock: &lockfile::LockFile, mode: WorkspaceMode) -> BTreeMap<String, String> {
    lock.components
        .iter()
        .map(|(name, locked)| {
            let pin = match mode {
                WorkspaceMode::Reference => {
                    locked.commit.clone().unwrap_or_else(|| locked.version.clone())
                }
                WorkspaceMode::Vendored => locked.version.clone(),
            };
            (name.clone(), pin)
        })
        .collect()
}

/// One available rollback point
#[derive(Debug, Clone)]
pub struct RollbackCandidate {
    pub kind: &'static str,
    pub reference: String,
    pub detail: String,
}

/// Enumerate everything the workspace can roll back to: locks, snapshots,
/// store entries with component tags, and committed changesets
pub fn list_targets(ctx: &Context) -> Result<Vec<RollbackCandidate>> {
    let mut candidates = Vec::new();

    for env in ctx.workspace.lock_envs()? {
        let lock = lockfile::load(ctx, &env)?;
        candidates.push(RollbackCandidate {
            kind: "lock",
            reference: env.clone(),
            detail: format!("{} component(s), generated {}", lock.components.len(), lock.generated_at),
        });
    }

    for (path, snapshot) in snapshot::list(ctx)? {
        candidates.push(RollbackCandidate {
            kind: "snapshot",
            reference: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            detail: format!("{} pin(s), created {}", snapshot.pins.len(), snapshot.created_at),
        });
    }

    let store = Store::open(ctx.workspace.store_dir())?;
    for entry in store.list()? {
        candidates.push(RollbackCandidate {
            kind: "store",
            reference: entry.hash.clone(),
            detail: format!(
                "{}@{}",
                entry.component,
                entry.version.as_deref().unwrap_or("?")
            ),
        });
    }

    let log = ChangesetLog::open(ctx)?;
    for changeset in log.list(Some(ChangesetStatus::Committed))? {
        candidates.push(RollbackCandidate {
            kind: "changeset",
            reference: changeset.id.clone(),
            detail: changeset.description.clone(),
        });
    }

    Ok(candidates)
}
