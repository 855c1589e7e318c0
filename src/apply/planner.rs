// src/apply/planner.rs

//! Apply planning: diff desired pins against on-disk state
//!
//! A plan is a pure function of the manifest, the environment, the lock
//! file when `--locked`, and the current on-disk state. Actions come out in
//! topological order, alphabetical within a level, so identical inputs
//! always produce identical plans.

use serde::Serialize;
use std::fmt;

use crate::config::Context;
use crate::error::Result;
use crate::git::GitDriver;
use crate::lockfile;
use crate::manifest::{Manifest, WorkspaceMode};
use crate::resolver::DependencyGraph;
use crate::store::{Cache, Store};
use crate::vendor::provenance::Provenance;
use crate::version::Pin;

/// What apply will do for one component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    /// Already at the desired identity with installed dependencies
    Noop,
    /// No working tree yet
    Clone,
    /// Working tree exists at another identity
    Checkout,
    /// Vendored tree absent or at another version
    VendorImport,
    /// Tree matches but dependencies were never installed
    UpdateDepsOnly,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Noop => "noop",
            Self::Clone => "clone",
            Self::Checkout => "checkout",
            Self::VendorImport => "vendor-import",
            Self::UpdateDepsOnly => "update-deps-only",
        };
        write!(f, "{name}")
    }
}

/// One planned step with its expected before and after state
#[derive(Debug, Clone, Serialize)]
pub struct PlannedAction {
    pub component: String,
    pub action: ActionKind,
    /// Desired pin as written (lock or manifest)
    pub pin: String,
    /// Immortal identity to materialize: commit sha or semver
    pub identity: String,
    /// Identity currently on disk, if any
    pub before: Option<String>,
}

/// The full ordered plan
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub environment: String,
    pub mode: WorkspaceMode,
    pub locked: bool,
    pub actions: Vec<PlannedAction>,
}

impl Plan {
    pub fn is_all_noop(&self) -> bool {
        self.actions.iter().all(|a| a.action == ActionKind::Noop)
    }

    pub fn action_for(&self, component: &str) -> Option<&PlannedAction> {
        self.actions.iter().find(|a| a.component == component)
    }
}

/// Inputs that influence classification beyond the pins
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub locked: bool,
    /// With packages skipped, a matching tree is always a noop
    pub skip_packages: bool,
}

/// Compute the plan for an environment
pub fn plan(
    ctx: &Context,
    manifest: &Manifest,
    env: &str,
    options: &PlanOptions,
    store: &Store,
    cache: &Cache,
) -> Result<Plan> {
    manifest.environment(env)?;
    let graph = DependencyGraph::from_manifest(manifest);
    let order = graph.topo_order()?;

    let lock = if options.locked { Some(lockfile::validate_strict(ctx, manifest, env)?) } else { None };
    let git = GitDriver::new(ctx.cancel.clone());

    let mut actions = Vec::new();
    for name in order {
        let component = manifest.component(&name)?;

        // Desired pin and immortal identity
        let (pin, identity) = match &lock {
            Some(lock) => {
                let locked = lock.components.get(&name).expect("validated lock entry");
                let identity = match manifest.mode {
                    WorkspaceMode::Reference => {
                        locked.commit.clone().unwrap_or_else(|| locked.version.clone())
                    }
                    WorkspaceMode::Vendored => locked.version.clone(),
                };
                (locked.version.clone(), identity)
            }
            None => {
                let pin = manifest.pin_for(&name, env)?;
                // Without a lock the pin itself is the target; branches
                // resolve at materialization time
                (pin.clone(), pin)
            }
        };

        actions.push(classify_one(ctx, manifest, &git, &component.name, pin, identity, options, store, cache)?);
    }

    Ok(Plan { environment: env.to_string(), mode: manifest.mode, locked: options.locked, actions })
}

/// Plan for an explicit pin map, as the rollback engine supplies.
/// Components absent from the map are left untouched.
pub fn plan_for_pins(
    ctx: &Context,
    manifest: &Manifest,
    label: &str,
    pins: &std::collections::BTreeMap<String, String>,
    options: &PlanOptions,
    store: &Store,
    cache: &Cache,
) -> Result<Plan> {
    let graph = DependencyGraph::from_manifest(manifest);
    let order = graph.topo_order()?;
    let git = GitDriver::new(ctx.cancel.clone());

    let mut actions = Vec::new();
    for name in order {
        let Some(pin) = pins.get(&name) else { continue };
        manifest.component(&name)?;
        actions.push(classify_one(
            ctx,
            manifest,
            &git,
            &name,
            pin.clone(),
            pin.clone(),
            options,
            store,
            cache,
        )?);
    }

    Ok(Plan { environment: label.to_string(), mode: manifest.mode, locked: false, actions })
}

#[allow(clippy::too_many_arguments)]
fn classify_one(
    ctx: &Context,
    manifest: &Manifest,
    git: &GitDriver,
    name: &str,
    pin: String,
    identity: String,
    options: &PlanOptions,
    store: &Store,
    cache: &Cache,
) -> Result<PlannedAction> {
    let dir = ctx.workspace.component_dir(name);
    let (before, action) = match manifest.mode {
        WorkspaceMode::Reference => {
            if !dir.join(".git").exists() {
                (None, ActionKind::Clone)
            } else {
                let current = git.commit_sha(&dir)?;
                if resolve_desired_sha(git, &dir, &identity).as_deref() == Some(current.as_str()) {
                    (
                        Some(current),
                        matched_action(ctx, manifest, name, &identity, options, store, cache)?,
                    )
                } else {
                    (Some(current), ActionKind::Checkout)
                }
            }
        }
        WorkspaceMode::Vendored => match Provenance::read(&dir)? {
            None => (None, ActionKind::VendorImport),
            Some(record) => {
                if pins_equal(&record.version, &identity) {
                    (
                        Some(record.version.clone()),
                        matched_action(ctx, manifest, name, &identity, options, store, cache)?,
                    )
                } else {
                    (Some(record.version), ActionKind::VendorImport)
                }
            }
        },
    };

    Ok(PlannedAction { component: name.to_string(), action, pin, identity, before })
}

/// A tree at the right identity is a noop once its install is on record,
/// otherwise only the dependency install remains
fn matched_action(
    ctx: &Context,
    manifest: &Manifest,
    component: &str,
    identity: &str,
    options: &PlanOptions,
    store: &Store,
    cache: &Cache,
) -> Result<ActionKind> {
    if options.skip_packages {
        return Ok(ActionKind::Noop);
    }
    let key = super::executor::component_cache_key(ctx, manifest, component, identity)?;
    match cache.lookup(&key, store) {
        Ok(_) => Ok(ActionKind::Noop),
        Err(_) => Ok(ActionKind::UpdateDepsOnly),
    }
}

/// The sha a desired identity points at, resolved against the existing
/// working tree (tags and branches resolve locally; remote state is only
/// consulted at materialization time)
fn resolve_desired_sha(
    git: &GitDriver,
    dir: &std::path::Path,
    identity: &str,
) -> Option<String> {
    match Pin::parse(identity) {
        Ok(Pin::Commit(sha)) => Some(sha),
        Ok(pin) => git
            .resolve_sha(dir, &pin.canonical())
            .or_else(|_| git.resolve_sha(dir, &format!("origin/{}", pin.canonical())))
            .ok(),
        Err(_) => None,
    }
}

fn pins_equal(left: &str, right: &str) -> bool {
    match (Pin::parse(left), Pin::parse(right)) {
        (Ok(a), Ok(b)) => a == b,
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::workspace::Workspace;
    use std::fs;

    fn fixture(mode: &str) -> (tempfile::TempDir, Context, Manifest, Store, Cache) {
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
        let ctx = Context::new(Workspace::at(dir.path(), "manifests"), Config::default());
        let manifest = Manifest::load(&ctx.workspace).unwrap();
        let store = Store::open(ctx.workspace.store_dir()).unwrap();
        let cache = Cache::open(ctx.workspace.cache_dir()).unwrap();
        (dir, ctx, manifest, store, cache)
    }

    #[test]
    fn test_fresh_workspace_plans_clones_in_dependency_order() {
        let (_dir, ctx, manifest, store, cache) = fixture("reference");
        let plan = plan(&ctx, &manifest, "dev", &PlanOptions::default(), &store, &cache).unwrap();

        assert_eq!(plan.actions.len(), 2);
        assert_eq!(plan.actions[0].component, "core");
        assert_eq!(plan.actions[0].action, ActionKind::Clone);
        assert_eq!(plan.actions[1].component, "api");
        assert_eq!(plan.actions[1].action, ActionKind::Clone);
    }

    #[test]
    fn test_vendored_workspace_plans_imports() {
        let (dir, ctx, manifest, store, cache) = fixture("vendored");
        let plan = plan(&ctx, &manifest, "dev", &PlanOptions::default(), &store, &cache).unwrap();
        assert!(plan.actions.iter().all(|a| a.action == ActionKind::VendorImport));

        // A matching vendored tree becomes update-deps-only, then noop with
        // packages skipped
        let comp_dir = dir.path().join("components/core");
        fs::create_dir_all(&comp_dir).unwrap();
        fs::write(comp_dir.join("lib.txt"), "x").unwrap();
        Provenance::new("core", "https://example.com/core.git", "v1.0.0")
            .write(&comp_dir)
            .unwrap();

        let updated =
            super::plan(&ctx, &manifest, "dev", &PlanOptions::default(), &store, &cache).unwrap();
        assert_eq!(updated.action_for("core").unwrap().action, ActionKind::UpdateDepsOnly);

        let skipped = super::plan(
            &ctx,
            &manifest,
            "dev",
            &PlanOptions { skip_packages: true, ..Default::default() },
            &store,
            &cache,
        )
        .unwrap();
        assert_eq!(skipped.action_for("core").unwrap().action, ActionKind::Noop);
    }

    #[test]
    fn test_vendored_version_drift_replans_import() {
        let (dir, ctx, manifest, store, cache) = fixture("vendored");
        let comp_dir = dir.path().join("components/core");
        fs::create_dir_all(&comp_dir).unwrap();
        Provenance::new("core", "https://example.com/core.git", "v0.9.0")
            .write(&comp_dir)
            .unwrap();

        let plan = plan(&ctx, &manifest, "dev", &PlanOptions::default(), &store, &cache).unwrap();
        let action = plan.action_for("core").unwrap();
        assert_eq!(action.action, ActionKind::VendorImport);
        assert_eq!(action.before.as_deref(), Some("v0.9.0"));
    }

    #[test]
    fn test_plan_is_deterministic() {
        let (_dir, ctx, manifest, store, cache) = fixture("vendored");
        let options = PlanOptions::default();
        let first = plan(&ctx, &manifest, "dev", &options, &store, &cache).unwrap();
        for _ in 0..5 {
            let next = plan(&ctx, &manifest, "dev", &options, &store, &cache).unwrap();
            let left: Vec<_> = first.actions.iter().map(|a| (&a.component, a.action)).collect();
            let right: Vec<_> = next.actions.iter().map(|a| (&a.component, a.action)).collect();
            assert_eq!(left, right);
        }
    }

    #[test]
    fn test_empty_manifest_plans_no_work() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("manifests")).unwrap();
        fs::write(dir.path().join("manifests/components.yaml"), "components: {}\n").unwrap();
        let ctx = Context::new(Workspace::at(dir.path(), "manifests"), Config::default());
        let manifest = Manifest::load(&ctx.workspace).unwrap();
        let store = Store::open(ctx.workspace.store_dir()).unwrap();
        let cache = Cache::open(ctx.workspace.cache_dir()).unwrap();

        let plan = plan(&ctx, &manifest, "dev", &PlanOptions::default(), &store, &cache).unwrap();
        assert!(plan.actions.is_empty());
        assert!(plan.is_all_noop());
    }
}
