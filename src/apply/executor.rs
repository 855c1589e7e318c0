// src/apply/executor.rs

//! Per-component execution: materialize, install, isolate, record
//!
//! Side effects for one component are strictly ordered: working tree first,
//! then package-manager installs (inside the declared isolation), then the
//! store and cache records. Store hits restore vendored trees instead of
//! refetching; reference trees always come from git so they keep their
//! metadata.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cancel::CancelFlag;
use crate::config::Context;
use crate::error::{Error, Result};
use crate::git::GitDriver;
use crate::hash::hash_tree;
use crate::isolation::{self, InstallEnvironment};
use crate::manifest::{Manifest, WorkspaceMode};
use crate::packages;
use crate::resolver::DependencyGraph;
use crate::store::{cache_key, Cache, RemoteStore, Store, StoreInputs};
use crate::vendor::{self, provenance::Provenance};
use crate::version::Pin;

use super::planner::{ActionKind, PlannedAction};

/// Executor tuning
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub skip_packages: bool,
    /// Extra attempts for retryable package-install failures
    pub package_retries: u32,
    pub component_timeout: Option<Duration>,
}

/// Identity of a component's tree as it sits on disk
pub fn on_disk_identity(ctx: &Context, git: &GitDriver, component: &str) -> String {
    let dir = ctx.workspace.component_dir(component);
    if dir.join(".git").exists() {
        if let Ok(sha) = git.commit_sha(&dir) {
            return sha;
        }
    }
    if let Ok(Some(record)) = Provenance::read(&dir) {
        return record.version;
    }
    "absent".to_string()
}

/// Cache key for a component at a target identity, derived from the
/// on-disk state of its source tree and transitive dependencies
pub fn component_cache_key(
    ctx: &Context,
    manifest: &Manifest,
    component: &str,
    identity: &str,
) -> Result<String> {
    let declared = manifest.component(component)?;
    let git = GitDriver::new(ctx.cancel.clone());
    let graph = DependencyGraph::from_manifest(manifest);

    let dep_pins: Vec<String> = graph
        .transitive_closure(component)
        .into_iter()
        .map(|dep| format!("{dep}@{}", on_disk_identity(ctx, &git, &dep)))
        .collect();

    let dir = ctx.workspace.component_dir(component);
    let source_hash = if dir.is_dir() { hash_tree(&dir)? } else { "absent".to_string() };

    Ok(cache_key(component, identity, declared.build_target.as_deref(), &dep_pins, &source_hash))
}

/// A store entry recorded for (component, identity), if one exists
fn find_store_entry(store: &Store, component: &str, identity: &str) -> Option<String> {
    store
        .list()
        .ok()?
        .into_iter()
        .find(|entry| entry.component == component && entry.version.as_deref() == Some(identity))
        .map(|entry| entry.hash)
}

/// Run one planned action to completion
pub fn execute(
    ctx: &Context,
    manifest: &Manifest,
    action: &PlannedAction,
    store: &Store,
    cache: &Cache,
    remote: &RemoteStore,
    options: &ExecOptions,
) -> Result<()> {
    if action.action == ActionKind::Noop {
        debug!("{}: noop", action.component);
        return Ok(());
    }

    let cancel = match options.component_timeout {
        Some(timeout) => ctx.cancel.child_with_deadline(Instant::now() + timeout),
        None => ctx.cancel.clone(),
    };
    cancel.check()?;

    let component = manifest.component(&action.component)?.clone();
    let dir = ctx.workspace.component_dir(&component.name);
    let git = GitDriver::new(cancel.clone());

    materialize(ctx, manifest, action, &git, store, remote, &cancel)?;

    if !options.skip_packages {
        cancel.check()?;
        let environment = isolation::prepare(ctx, &component)?;
        install_packages(&component.name, &dir, &environment, options.package_retries, &cancel)?;
    }

    cancel.check()?;
    record(ctx, manifest, action, store, cache, remote)?;
    Ok(())
}

fn materialize(
    ctx: &Context,
    manifest: &Manifest,
    action: &PlannedAction,
    git: &GitDriver,
    store: &Store,
    remote: &RemoteStore,
    cancel: &CancelFlag,
) -> Result<()> {
    let component = manifest.component(&action.component)?;
    let dir = ctx.workspace.component_dir(&component.name);

    match action.action {
        ActionKind::Noop | ActionKind::UpdateDepsOnly => Ok(()),
        ActionKind::Clone => {
            info!("cloning {} at {}", component.name, action.identity);
            git.clone(&component.repo, &dir)?;
            checkout_identity(git, &dir, action)
        }
        ActionKind::Checkout => {
            info!(
                "checking out {} {} (was {})",
                component.name,
                action.identity,
                action.before.as_deref().unwrap_or("?")
            );
            git.fetch(&dir)?;
            checkout_identity(git, &dir, action)
        }
        ActionKind::VendorImport => {
            cancel.check()?;
            // Vendored trees can restore straight from the store
            if let Some(hash) = find_store_entry(store, &component.name, &action.identity) {
                if remote.ensure_local(&hash) || store.exists(&hash) {
                    info!("restoring {} from store entry {hash}", component.name);
                    store.get(&hash, &dir)?;
                    if Provenance::read(&dir)?.is_some() {
                        return Ok(());
                    }
                    warn!("store entry {hash} had no provenance record, re-importing");
                }
            }
            if manifest.mode != WorkspaceMode::Vendored {
                return Err(Error::Vendor {
                    component: component.name.clone(),
                    message: "vendor-import planned in a reference-mode workspace".to_string(),
                });
            }
            vendor::import_pinned(ctx, component, &action.identity, true, true)
        }
    }
}

fn checkout_identity(git: &GitDriver, dir: &Path, action: &PlannedAction) -> Result<()> {
    match Pin::parse(&action.identity) {
        // Branches move; track the remote tip
        Ok(Pin::Branch(branch)) => {
            git.checkout(dir, &branch)?;
            Ok(())
        }
        _ => git.checkout(dir, &action.identity),
    }
}

fn install_packages(
    component: &str,
    dir: &Path,
    environment: &InstallEnvironment,
    retries: u32,
    cancel: &CancelFlag,
) -> Result<()> {
    // Container isolation runs each install inside a transient container
    // with the tree mounted; no host-side package state is touched
    if let InstallEnvironment::Container(image) = environment {
        for manager in packages::detect(dir) {
            if let Some((program, args)) = packages::invocation(manager, dir) {
                cancel.check()?;
                let argv: Vec<&str> =
                    std::iter::once(program.as_str()).chain(args.iter().map(String::as_str)).collect();
                isolation::run_in_container(image, dir, &argv, cancel).map_err(|e| {
                    Error::Dependency {
                        component: component.to_string(),
                        message: format!("{manager} install in container failed: {e}"),
                    }
                })?;
            }
        }
        return Ok(());
    }

    let pip_override = match environment {
        InstallEnvironment::Venv(venv) => Some(packages::venv_pip(venv)),
        _ => None,
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        cancel.check()?;
        match packages::install_all(dir, pip_override.as_deref(), cancel) {
            Ok(managers) => {
                if !managers.is_empty() {
                    debug!("{component}: installed {} manager(s)", managers.len());
                }
                return Ok(());
            }
            Err(failure) if failure.retryable && attempt <= retries => {
                warn!("{component}: {} install failed, retrying: {}", failure.manager, failure.output);
                thread::sleep(Duration::from_secs(2) * attempt);
            }
            Err(failure) => {
                // A cancellation mid-install is a cancellation, not a
                // dependency failure
                cancel.check()?;
                return Err(failure.into_error(component));
            }
        }
    }
}

/// Record the materialized tree in store and cache and mirror it remotely
fn record(
    ctx: &Context,
    manifest: &Manifest,
    action: &PlannedAction,
    store: &Store,
    cache: &Cache,
    remote: &RemoteStore,
) -> Result<()> {
    let component = manifest.component(&action.component)?;
    let dir = ctx.workspace.component_dir(&component.name);
    if !dir.is_dir() {
        return Ok(());
    }

    let references: Vec<String> = component
        .depends_on
        .iter()
        .filter_map(|dep| {
            let git = GitDriver::new(ctx.cancel.clone());
            let identity = on_disk_identity(ctx, &git, dep);
            find_store_entry(store, dep, &identity)
        })
        .collect();

    let inputs = StoreInputs {
        component: component.name.clone(),
        version: Some(action.identity.clone()),
        inputs_digest: format!(
            "{}|{}|{}",
            component.name,
            action.identity,
            references.join(",")
        ),
        references,
    };
    let hash = store.add(&dir, &inputs)?;
    remote.push(&hash);

    let key = component_cache_key(ctx, manifest, &component.name, &action.identity)?;
    cache.put(&key, &component.name, &hash)
}
