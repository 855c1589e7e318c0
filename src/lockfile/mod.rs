// src/lockfile/mod.rs

//! Per-environment lock files
//!
//! A lock binds every manifest component to an immortal identity for one
//! environment: a commit sha in reference mode, a validated semver plus
//! vendoring timestamp in vendored mode. Locks live at
//! `manifests/components.lock.<env>.yaml` and are written atomically.
//!
//! Generation is deterministic: at a fixed upstream state two runs produce
//! byte-identical output apart from `generated_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::config::Context;
use crate::error::{Error, Result};
use crate::fsutil::atomic_write;
use crate::git::GitDriver;
use crate::manifest::{ComponentType, Manifest, WorkspaceMode};
use crate::vendor::provenance::Provenance;
use crate::version::Pin;

/// One locked component entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockedComponent {
    pub version: String,
    /// Reference mode only: the resolved commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    pub repo: String,
    #[serde(rename = "type")]
    pub kind: ComponentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_target: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Vendored mode only: when the tree was vendored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendored_at: Option<DateTime<Utc>>,
}

/// A generated lock file for one environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockFile {
    pub generated_at: DateTime<Utc>,
    pub environment: String,
    pub mode: WorkspaceMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_at: Option<DateTime<Utc>>,
    pub components: BTreeMap<String, LockedComponent>,
}

/// A disagreement between manifest and lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discrepancy {
    /// In the manifest but not the lock
    Missing(String),
    /// In the lock but no longer in the manifest
    Extra(String),
    /// Identity drift between lock and manifest or working tree
    ShaMismatch { component: String, expected: String, actual: String },
    /// Lock was generated under the other storage mode
    ModeMismatch { lock: WorkspaceMode, workspace: WorkspaceMode },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(name) => write!(f, "missing: '{name}' is not locked"),
            Self::Extra(name) => write!(f, "extra: '{name}' is locked but not in the manifest"),
            Self::ShaMismatch { component, expected, actual } => {
                write!(f, "sha-mismatch: '{component}' expected {expected}, got {actual}")
            }
            Self::ModeMismatch { lock, workspace } => {
                write!(f, "mode-mismatch: lock is {lock}, workspace is {workspace}")
            }
        }
    }
}

/// Differences between two environment locks
#[derive(Debug, Clone, Default)]
pub struct LockDiff {
    pub only_in_left: Vec<String>,
    pub only_in_right: Vec<String>,
    /// component -> (left version, right version)
    pub version_diffs: BTreeMap<String, (String, String)>,
    /// component -> (left commit, right commit)
    pub commit_diffs: BTreeMap<String, (String, String)>,
}

impl LockDiff {
    pub fn is_empty(&self) -> bool {
        self.only_in_left.is_empty()
            && self.only_in_right.is_empty()
            && self.version_diffs.is_empty()
            && self.commit_diffs.is_empty()
    }
}

/// Generate the lock for `env` and write it atomically.
///
/// Reference mode resolves every pin to a commit sha: an existing working
/// tree wins (its checked-out commit is the truth), otherwise the pin is
/// resolved against the upstream remote. Vendored mode records the semver
/// and vendoring timestamp from each provenance record.
pub fn generate(ctx: &Context, manifest: &Manifest, env: &str, git: &GitDriver) -> Result<LockFile> {
    manifest.environment(env)?;
    info!("generating lock for environment '{env}' ({} mode)", manifest.mode);

    let mut components = BTreeMap::new();
    for component in manifest.components.values() {
        ctx.cancel.check()?;
        let pin = manifest.pin_for(&component.name, env)?;

        let locked = match manifest.mode {
            WorkspaceMode::Reference => {
                let commit = resolve_commit(ctx, git, &component.name, &component.repo, &pin)?;
                debug!("  {}: {} -> {}", component.name, pin, &commit[..commit.len().min(8)]);
                LockedComponent {
                    version: pin,
                    commit: Some(commit),
                    repo: component.repo.clone(),
                    kind: component.kind,
                    build_target: component.build_target.clone(),
                    depends_on: component.depends_on.clone(),
                    vendored_at: None,
                }
            }
            WorkspaceMode::Vendored => {
                let dir = ctx.workspace.component_dir(&component.name);
                let provenance = Provenance::require(&dir, &component.name)?;
                let version = Pin::parse(&provenance.version)?;
                if version.as_semver().is_none() {
                    return Err(Error::Vendor {
                        component: component.name.clone(),
                        message: format!(
                            "vendored version '{}' is not a semver tag",
                            provenance.version
                        ),
                    });
                }
                LockedComponent {
                    version: provenance.version.clone(),
                    commit: None,
                    repo: component.repo.clone(),
                    kind: component.kind,
                    build_target: component.build_target.clone(),
                    depends_on: component.depends_on.clone(),
                    vendored_at: Some(provenance.vendored_at),
                }
            }
        };
        components.insert(component.name.clone(), locked);
    }

    let lock = LockFile {
        generated_at: Utc::now(),
        environment: env.to_string(),
        mode: manifest.mode,
        promoted_from: None,
        promoted_at: None,
        components,
    };
    write(ctx, &lock)?;
    Ok(lock)
}

fn resolve_commit(
    ctx: &Context,
    git: &GitDriver,
    component: &str,
    repo: &str,
    pin: &str,
) -> Result<String> {
    let pin = Pin::parse(pin)?;
    if let Pin::Commit(sha) = &pin {
        return Ok(sha.clone());
    }

    let dir = ctx.workspace.component_dir(component);
    if dir.join(".git").exists() {
        return git.commit_sha(&dir);
    }
    git.resolve_remote_sha(repo, &pin.canonical())
}

/// Write a lock to its stable path
pub fn write(ctx: &Context, lock: &LockFile) -> Result<()> {
    let path = ctx.workspace.lock_path(&lock.environment);
    atomic_write(&path, serde_yaml::to_string(lock)?.as_bytes())?;
    info!("wrote {}", path.display());
    Ok(())
}

/// Load the lock for an environment
pub fn load(ctx: &Context, env: &str) -> Result<LockFile> {
    let path = ctx.workspace.lock_path(env);
    let content = fs::read_to_string(&path).map_err(|e| {
        Error::LockMismatch {
            environment: env.to_string(),
            discrepancies: vec![format!("lock file {} unreadable: {e}", path.display())],
        }
    })?;
    serde_yaml::from_str(&content)
        .map_err(|e| Error::Manifest(format!("{}: {e}", path.display())))
}

/// Compare a lock against the manifest (and on-disk trees where present).
///
/// An empty result means the lock validates.
pub fn validate(ctx: &Context, manifest: &Manifest, lock: &LockFile) -> Result<Vec<Discrepancy>> {
    let mut discrepancies = Vec::new();

    if lock.mode != manifest.mode {
        discrepancies.push(Discrepancy::ModeMismatch { lock: lock.mode, workspace: manifest.mode });
    }

    for name in manifest.components.keys() {
        if !lock.components.contains_key(name) {
            discrepancies.push(Discrepancy::Missing(name.clone()));
        }
    }
    for name in lock.components.keys() {
        if !manifest.components.contains_key(name) {
            discrepancies.push(Discrepancy::Extra(name.clone()));
        }
    }

    let git = GitDriver::new(ctx.cancel.clone());
    for (name, locked) in &lock.components {
        let Some(component) = manifest.components.get(name) else { continue };

        // Pin drift between manifest and lock
        let manifest_pin = manifest.pin_for(name, &lock.environment)?;
        if let Pin::Commit(sha) = Pin::parse(&manifest_pin)? {
            if locked.commit.as_deref() != Some(sha.as_str()) {
                discrepancies.push(Discrepancy::ShaMismatch {
                    component: name.clone(),
                    expected: sha,
                    actual: locked.commit.clone().unwrap_or_default(),
                });
                continue;
            }
        } else if manifest_pin != locked.version {
            discrepancies.push(Discrepancy::ShaMismatch {
                component: name.clone(),
                expected: manifest_pin,
                actual: locked.version.clone(),
            });
            continue;
        }

        // Working-tree drift, reference mode only
        if manifest.mode == WorkspaceMode::Reference {
            let dir = ctx.workspace.component_dir(&component.name);
            if dir.join(".git").exists() {
                if let (Some(expected), Ok(actual)) = (&locked.commit, git.commit_sha(&dir)) {
                    if *expected != actual {
                        discrepancies.push(Discrepancy::ShaMismatch {
                            component: name.clone(),
                            expected: expected.clone(),
                            actual,
                        });
                    }
                }
            }
        }
    }

    Ok(discrepancies)
}

/// Validate and turn discrepancies into a `LockMismatch` error
pub fn validate_strict(ctx: &Context, manifest: &Manifest, env: &str) -> Result<LockFile> {
    let lock = load(ctx, env)?;
    let discrepancies = validate(ctx, manifest, &lock)?;
    if discrepancies.is_empty() {
        Ok(lock)
    } else {
        Err(Error::LockMismatch {
            environment: env.to_string(),
            discrepancies: discrepancies.iter().map(|d| d.to_string()).collect(),
        })
    }
}

/// Copy the `src` environment lock onto `dst`, rewriting the embedded
/// environment and recording the promotion. Fails if the lock names a
/// component the manifest no longer declares.
pub fn promote(ctx: &Context, manifest: &Manifest, src: &str, dst: &str) -> Result<LockFile> {
    manifest.environment(dst)?;
    let source = load(ctx, src)?;

    for name in source.components.keys() {
        if !manifest.components.contains_key(name) {
            return Err(Error::LockMismatch {
                environment: dst.to_string(),
                discrepancies: vec![format!(
                    "cannot promote: '{name}' is locked in {src} but absent from the manifest"
                )],
            });
        }
    }

    let promoted = LockFile {
        generated_at: Utc::now(),
        environment: dst.to_string(),
        mode: source.mode,
        promoted_from: Some(src.to_string()),
        promoted_at: Some(Utc::now()),
        components: source.components,
    };
    write(ctx, &promoted)?;
    info!("promoted lock {src} -> {dst}");
    Ok(promoted)
}

/// Symmetric diff of two environment locks
pub fn compare(left: &LockFile, right: &LockFile) -> LockDiff {
    let mut diff = LockDiff::default();

    for (name, locked) in &left.components {
        match right.components.get(name) {
            None => diff.only_in_left.push(name.clone()),
            Some(other) => {
                if locked.version != other.version {
                    diff.version_diffs
                        .insert(name.clone(), (locked.version.clone(), other.version.clone()));
                }
                if locked.commit != other.commit {
                    diff.commit_diffs.insert(
                        name.clone(),
                        (
                            locked.commit.clone().unwrap_or_default(),
                            other.commit.clone().unwrap_or_default(),
                        ),
                    );
                }
            }
        }
    }
    for name in right.components.keys() {
        if !left.components.contains_key(name) {
            diff.only_in_right.push(name.clone());
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::workspace::Workspace;

    fn fixture(mode: &str) -> (tempfile::TempDir, Context, Manifest) {
        let dir = tempfile::tempdir().unwrap();
        let manifests = dir.path().join("manifests");
        fs::create_dir_all(&manifests).unwrap();
        fs::write(
            manifests.join("components.yaml"),
            format!(
                "meta:\n  mode: {mode}\ncomponents:\n  api:\n    repo: https://example.com/api.git\n    version: v1.0.0\n    type: python\n    depends_on: [core]\n  core:\n    repo: https://example.com/core.git\n    version: v1.0.0\n    type: generic\n"
            ),
        )
        .unwrap();

        let workspace = Workspace::at(dir.path(), "manifests");
        let ctx = Context::new(workspace, Config::default());
        let manifest = Manifest::load(&ctx.workspace).unwrap();
        (dir, ctx, manifest)
    }

    fn locked(version: &str, commit: Option<&str>) -> LockedComponent {
        LockedComponent {
            version: version.to_string(),
            commit: commit.map(str::to_string),
            repo: "https://example.com/x.git".to_string(),
            kind: ComponentType::Generic,
            build_target: None,
            depends_on: Vec::new(),
            vendored_at: None,
        }
    }

    fn lock_with(env: &str, entries: &[(&str, LockedComponent)]) -> LockFile {
        LockFile {
            generated_at: Utc::now(),
            environment: env.to_string(),
            mode: WorkspaceMode::Reference,
            promoted_from: None,
            promoted_at: None,
            components: entries.iter().map(|(n, c)| (n.to_string(), c.clone())).collect(),
        }
    }

    #[test]
    fn test_validate_clean_lock() {
        let (_dir, ctx, manifest) = fixture("reference");
        let lock = lock_with(
            "dev",
            &[
                ("api", locked("v1.0.0", Some(&"a".repeat(40)))),
                ("core", locked("v1.0.0", Some(&"b".repeat(40)))),
            ],
        );
        assert!(validate(&ctx, &manifest, &lock).unwrap().is_empty());
    }

    #[test]
    fn test_validate_missing_and_extra() {
        let (_dir, ctx, manifest) = fixture("reference");
        let lock = lock_with(
            "dev",
            &[
                ("core", locked("v1.0.0", Some(&"b".repeat(40)))),
                ("ghost", locked("v1.0.0", Some(&"c".repeat(40)))),
            ],
        );
        let discrepancies = validate(&ctx, &manifest, &lock).unwrap();
        assert!(discrepancies.contains(&Discrepancy::Missing("api".to_string())));
        assert!(discrepancies.contains(&Discrepancy::Extra("ghost".to_string())));
    }

    #[test]
    fn test_validate_mode_mismatch() {
        let (_dir, ctx, manifest) = fixture("vendored");
        let mut lock = lock_with("dev", &[]);
        lock.mode = WorkspaceMode::Reference;
        let discrepancies = validate(&ctx, &manifest, &lock).unwrap();
        assert!(discrepancies
            .iter()
            .any(|d| matches!(d, Discrepancy::ModeMismatch { .. })));
    }

    #[test]
    fn test_validate_version_drift() {
        let (_dir, ctx, manifest) = fixture("reference");
        let lock = lock_with(
            "dev",
            &[
                ("api", locked("v0.9.0", Some(&"a".repeat(40)))),
                ("core", locked("v1.0.0", Some(&"b".repeat(40)))),
            ],
        );
        let discrepancies = validate(&ctx, &manifest, &lock).unwrap();
        assert!(discrepancies.iter().any(|d| matches!(
            d,
            Discrepancy::ShaMismatch { component, .. } if component == "api"
        )));
    }

    #[test]
    fn test_promote_rewrites_environment() {
        let (_dir, ctx, manifest) = fixture("reference");
        let lock = lock_with(
            "dev",
            &[
                ("api", locked("v1.0.0", Some(&"a".repeat(40)))),
                ("core", locked("v1.0.0", Some(&"b".repeat(40)))),
            ],
        );
        write(&ctx, &lock).unwrap();

        let promoted = promote(&ctx, &manifest, "dev", "staging").unwrap();
        assert_eq!(promoted.environment, "staging");
        assert_eq!(promoted.promoted_from.as_deref(), Some("dev"));
        assert_eq!(promoted.components, lock.components);

        let reloaded = load(&ctx, "staging").unwrap();
        assert_eq!(reloaded.environment, "staging");
    }

    #[test]
    fn test_compare_reports_field_diffs() {
        let left = lock_with(
            "dev",
            &[
                ("api", locked("v1.1.0", Some(&"a".repeat(40)))),
                ("core", locked("v1.0.0", Some(&"b".repeat(40)))),
                ("only-dev", locked("v1.0.0", None)),
            ],
        );
        let right = lock_with(
            "staging",
            &[
                ("api", locked("v1.0.0", Some(&"c".repeat(40)))),
                ("core", locked("v1.0.0", Some(&"b".repeat(40)))),
            ],
        );

        let diff = compare(&left, &right);
        assert_eq!(diff.only_in_left, vec!["only-dev".to_string()]);
        assert!(diff.only_in_right.is_empty());
        assert_eq!(
            diff.version_diffs.get("api"),
            Some(&("v1.1.0".to_string(), "v1.0.0".to_string()))
        );
        assert!(diff.commit_diffs.contains_key("api"));
        assert!(!diff.version_diffs.contains_key("core"));
    }

    #[test]
    fn test_lock_yaml_roundtrip_and_determinism() {
        let lock = lock_with(
            "dev",
            &[
                ("api", locked("v1.0.0", Some(&"a".repeat(40)))),
                ("core", locked("v1.0.0", None)),
            ],
        );
        let first = serde_yaml::to_string(&lock).unwrap();
        let second = serde_yaml::to_string(&lock).unwrap();
        assert_eq!(first, second);

        let parsed: LockFile = serde_yaml::from_str(&first).unwrap();
        assert_eq!(parsed.components, lock.components);
        // Reference entries carry commits, never vendoring timestamps
        assert!(first.contains("commit"));
        assert!(!first.contains("vendored_at"));
    }
}
