// src/health.rs

//! Pre-apply invariant checks and post-apply component verification

use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::changeset::ChangesetLog;
use crate::config::Context;
use crate::error::{Error, Result};
use crate::git::GitDriver;
use crate::lockfile::{self, LockFile};
use crate::manifest::{ComponentType, Manifest, WorkspaceMode};
use crate::resolver::DependencyGraph;
use crate::subprocess::{self, CommandSpec};
use crate::vendor::provenance::Provenance;
use crate::version::Pin;

/// Health classification of one component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    /// Present but at the wrong identity
    Mismatch,
    /// Not materialized at all
    Missing,
    /// Present but failing builds, tests, or missing dependencies
    Broken,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Healthy => "healthy",
            Self::Mismatch => "mismatch",
            Self::Missing => "missing",
            Self::Broken => "broken",
        };
        write!(f, "{name}")
    }
}

/// One component's verdict with supporting detail
#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub component: String,
    pub state: HealthState,
    pub details: Vec<String>,
}

/// Extra verification passes
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthOptions {
    pub run_build: bool,
    pub run_tests: bool,
}

/// Invariants that must hold before apply mutates anything.
///
/// The dependency graph must be acyclic with no missing dependencies, the
/// lock must validate when `--locked`, and no in-progress changeset may be
/// holding the workspace.
pub fn pre_apply(ctx: &Context, manifest: &Manifest, env: &str, locked: bool) -> Result<()> {
    let graph = DependencyGraph::from_manifest(manifest);
    graph.topo_order()?;
    manifest.environment(env)?;

    if locked {
        lockfile::validate_strict(ctx, manifest, env)?;
    }

    if let Some(current) = ChangesetLog::open(ctx)?.current()? {
        return Err(Error::WorkspaceBusy(format!(
            "changeset '{}' is in progress; finalize or fail it before applying",
            current.id
        )));
    }

    Ok(())
}

/// Verify one component against its expected identity
pub fn check_component(
    ctx: &Context,
    manifest: &Manifest,
    lock: Option<&LockFile>,
    env: &str,
    name: &str,
    options: &HealthOptions,
) -> Result<ComponentHealth> {
    let component = manifest.component(name)?;
    let dir = ctx.workspace.component_dir(name);
    let mut details = Vec::new();

    if !dir.exists() {
        return Ok(ComponentHealth {
            component: name.to_string(),
            state: HealthState::Missing,
            details: vec![format!("{} does not exist", dir.display())],
        });
    }

    // Identity check against lock first, manifest pin otherwise
    let mut state = HealthState::Healthy;
    match manifest.mode {
        WorkspaceMode::Reference => {
            if !dir.join(".git").exists() {
                state = HealthState::Broken;
                details.push("present but not a working tree".to_string());
            } else {
                let git = GitDriver::new(ctx.cancel.clone());
                let current = git.commit_sha(&dir)?;
                let expected_commit =
                    lock.and_then(|l| l.components.get(name)).and_then(|c| c.commit.clone());
                match expected_commit {
                    Some(expected) if expected != current => {
                        state = HealthState::Mismatch;
                        details.push(format!(
                            "commit {} does not match locked {}",
                            &current[..8.min(current.len())],
                            &expected[..8.min(expected.len())]
                        ));
                    }
                    None => {
                        if let Ok(Pin::Commit(expected)) =
                            Pin::parse(&manifest.pin_for(name, env)?)
                        {
                            if expected != current {
                                state = HealthState::Mismatch;
                                details.push("commit does not match manifest pin".to_string());
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        WorkspaceMode::Vendored => match Provenance::read(&dir)? {
            None => {
                state = HealthState::Broken;
                details.push("present but has no provenance record".to_string());
            }
            Some(record) => {
                let expected = manifest.pin_for(name, env)?;
                match (Pin::parse(&record.version), Pin::parse(&expected)) {
                    (Ok(actual), Ok(wanted)) if actual != wanted => {
                        state = HealthState::Mismatch;
                        details
                            .push(format!("vendored {} but pinned {expected}", record.version));
                    }
                    _ => {}
                }
            }
        },
    }

    // Dependencies must be materialized too
    for dep in &component.depends_on {
        if !ctx.workspace.component_dir(dep).exists() {
            state = HealthState::Broken;
            details.push(format!("dependency '{dep}' is not materialized"));
        }
    }

    if state == HealthState::Healthy && options.run_build {
        if let Some(problem) = run_check(ctx, component.kind, &dir, component.build_target.as_deref(), false)? {
            state = HealthState::Broken;
            details.push(problem);
        }
    }
    if state == HealthState::Healthy && options.run_tests {
        if let Some(problem) = run_check(ctx, component.kind, &dir, component.build_target.as_deref(), true)? {
            state = HealthState::Broken;
            details.push(problem);
        }
    }

    Ok(ComponentHealth { component: name.to_string(), state, details })
}

/// Optional build/test subprocess for a component kind
fn run_check(
    ctx: &Context,
    kind: ComponentType,
    dir: &std::path::Path,
    build_target: Option<&str>,
    tests: bool,
) -> Result<Option<String>> {
    let spec = match (kind, tests) {
        (ComponentType::Bazel, false) => {
            Some(CommandSpec::new("bazel", &["build", build_target.unwrap_or("//...")]))
        }
        (ComponentType::Bazel, true) => {
            Some(CommandSpec::new("bazel", &["test", build_target.unwrap_or("//...")]))
        }
        (ComponentType::Npm, false) => Some(CommandSpec::new("npm", &["run", "build", "--if-present"])),
        (ComponentType::Npm, true) => Some(CommandSpec::new("npm", &["test", "--if-present"])),
        (ComponentType::Python, true) => Some(CommandSpec::new("python3", &["-m", "pytest", "-q"])),
        _ => None,
    };

    let Some(spec) = spec else {
        debug!("no {} check for {kind}", if tests { "test" } else { "build" });
        return Ok(None);
    };

    let spec = spec.current_dir(dir).timeout(Duration::from_secs(1800));
    let output = subprocess::run(&spec, &ctx.cancel)?;
    if output.success() {
        Ok(None)
    } else {
        Ok(Some(format!(
            "{} failed: {}",
            if tests { "tests" } else { "build" },
            output.combined().lines().last().unwrap_or("").trim()
        )))
    }
}

/// Check every component (or a single one); the boolean is the aggregate
/// "all healthy" verdict
pub fn check_all(
    ctx: &Context,
    manifest: &Manifest,
    env: &str,
    component: Option<&str>,
    options: &HealthOptions,
) -> Result<(Vec<ComponentHealth>, bool)> {
    let lock = lockfile::load(ctx, env).ok();
    let names: Vec<String> = match component {
        Some(name) => vec![name.to_string()],
        None => manifest.component_names(),
    };

    let mut results = Vec::new();
    for name in names {
        results.push(check_component(ctx, manifest, lock.as_ref(), env, &name, options)?);
    }
    let healthy = results.iter().all(|r| r.state == HealthState::Healthy);
    Ok((results, healthy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::workspace::Workspace;
    use std::fs;

    fn fixture(mode: &str) -> (tempfile::TempDir, Context, Manifest) {
        let dir = tempfile::tempdir().unwrap();
        let manifests = dir.path().join("manifests");
        fs::create_dir_all(&manifests).unwrap();
        fs::write(
            manifests.join("components.yaml"),
            format!(
                "meta:\n  mode: {mode}\ncomponents:\n  api:\n    repo: r\n    version: v1.0.0\n    type: python\n    depends_on: [core]\n  core:\n    repo: r\n    version: v1.0.0\n    type: generic\n"
            ),
        )
        .unwrap();
        let ctx = Context::new(Workspace::at(dir.path(), "manifests"), Config::default());
        let manifest = Manifest::load(&ctx.workspace).unwrap();
        (dir, ctx, manifest)
    }

    #[test]
    fn test_pre_apply_passes_on_clean_workspace() {
        let (_dir, ctx, manifest) = fixture("reference");
        pre_apply(&ctx, &manifest, "dev", false).unwrap();
    }

    #[test]
    fn test_pre_apply_blocks_on_in_progress_changeset() {
        let (_dir, ctx, manifest) = fixture("reference");
        let log = ChangesetLog::open(&ctx).unwrap();
        log.create("wip", None).unwrap();

        let err = pre_apply(&ctx, &manifest, "dev", false).unwrap_err();
        assert!(matches!(err, Error::WorkspaceBusy(_)));
    }

    #[test]
    fn test_pre_apply_unknown_environment() {
        let (_dir, ctx, manifest) = fixture("reference");
        assert!(pre_apply(&ctx, &manifest, "nonexistent", false).is_err());
    }

    #[test]
    fn test_missing_component() {
        let (_dir, ctx, manifest) = fixture("vendored");
        let health = check_component(
            &ctx,
            &manifest,
            None,
            "dev",
            "core",
            &HealthOptions::default(),
        )
        .unwrap();
        assert_eq!(health.state, HealthState::Missing);
    }

    #[test]
    fn test_vendored_health_states() {
        let (dir, ctx, manifest) = fixture("vendored");
        let core = dir.path().join("components/core");
        fs::create_dir_all(&core).unwrap();

        // Present but no provenance
        let health =
            check_component(&ctx, &manifest, None, "dev", "core", &HealthOptions::default())
                .unwrap();
        assert_eq!(health.state, HealthState::Broken);

        // Healthy
        Provenance::new("core", "r", "v1.0.0").write(&core).unwrap();
        let health =
            check_component(&ctx, &manifest, None, "dev", "core", &HealthOptions::default())
                .unwrap();
        assert_eq!(health.state, HealthState::Healthy);

        // Version drift
        Provenance::new("core", "r", "v0.9.0").write(&core).unwrap();
        let health =
            check_component(&ctx, &manifest, None, "dev", "core", &HealthOptions::default())
                .unwrap();
        assert_eq!(health.state, HealthState::Mismatch);
    }

    #[test]
    fn test_missing_dependency_breaks_component() {
        let (dir, ctx, manifest) = fixture("vendored");
        let api = dir.path().join("components/api");
        fs::create_dir_all(&api).unwrap();
        Provenance::new("api", "r", "v1.0.0").write(&api).unwrap();

        let health =
            check_component(&ctx, &manifest, None, "dev", "api", &HealthOptions::default())
                .unwrap();
        assert_eq!(health.state, HealthState::Broken);
        assert!(health.details.iter().any(|d| d.contains("core")));
    }

    #[test]
    fn test_check_all_aggregates() {
        let (dir, ctx, manifest) = fixture("vendored");
        let (results, healthy) =
            check_all(&ctx, &manifest, "dev", None, &HealthOptions::default()).unwrap();
        assert_eq!(results.len(), 2);
        assert!(!healthy);

        for name in ["api", "core"] {
            let comp = dir.path().join("components").join(name);
            fs::create_dir_all(&comp).unwrap();
            Provenance::new(name, "r", "v1.0.0").write(&comp).unwrap();
        }
        let (_, healthy) =
            check_all(&ctx, &manifest, "dev", None, &HealthOptions::default()).unwrap();
        assert!(healthy);
    }
}
