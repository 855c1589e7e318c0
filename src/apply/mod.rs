// src/apply/mod.rs

//! Apply orchestrator: plan, schedule, and execute materialization
//!
//! Data flow: resolve the effective pin set (lock when `--locked`, the
//! environment otherwise), diff it against the on-disk state into an
//! ordered plan, then drive the plan through the worker pool. Every
//! invocation holds the workspace mutex for its duration; a concurrent
//! apply fails with `WorkspaceBusy`.

pub mod executor;
pub mod planner;
pub mod scheduler;

pub use executor::ExecOptions;
pub use planner::{ActionKind, Plan, PlanOptions, PlannedAction};
pub use scheduler::{ComponentReport, Outcome, ScheduleOptions};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::config::Context;
use crate::error::Result;
use crate::health;
use crate::manifest::Manifest;
use crate::progress::{tracker_for, SilentProgress, ProgressTracker};
use crate::resolver::DependencyGraph;
use crate::store::{Cache, RemoteStore, Store};

/// Options accepted by `apply`
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    pub env: Option<String>,
    pub locked: bool,
    pub jobs: Option<usize>,
    pub continue_on_error: bool,
    pub retries: u32,
    pub skip_packages: bool,
    /// Whole-invocation deadline
    pub deadline: Option<Duration>,
    pub component_timeout: Option<Duration>,
    pub show_progress: bool,
    /// Wait for the workspace mutex instead of failing with WorkspaceBusy
    pub wait_for_lock: bool,
}

/// The plan plus what actually happened
#[derive(Debug, Clone)]
pub struct ApplySummary {
    pub plan: Plan,
    pub reports: Vec<ComponentReport>,
}

impl ApplySummary {
    pub fn ok(&self) -> bool {
        self.reports.iter().all(|r| r.outcome.is_success())
    }

    pub fn failed(&self) -> Vec<&ComponentReport> {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Failed { .. }))
            .collect()
    }

    pub fn skipped(&self) -> Vec<&ComponentReport> {
        self.reports
            .iter()
            .filter(|r| {
                matches!(
                    r.outcome,
                    Outcome::SkippedDependency { .. } | Outcome::SkippedCancelled
                )
            })
            .collect()
    }
}

/// Compute the plan for an environment without side effects
pub fn compute_plan(ctx: &Context, env: &str, options: &PlanOptions) -> Result<Plan> {
    let manifest = Manifest::load(&ctx.workspace)?;
    let store = Store::open(ctx.workspace.store_dir())?;
    let cache = Cache::open(ctx.workspace.cache_dir())?;
    planner::plan(ctx, &manifest, env, options, &store, &cache)
}

/// Execute an apply for an environment
pub fn run(ctx: &Context, options: &ApplyOptions) -> Result<ApplySummary> {
    let env = options.env.clone().unwrap_or_else(|| ctx.config.default_env.clone());

    let mut ctx = ctx.clone();
    if let Some(deadline) = options.deadline {
        ctx.cancel = ctx.cancel.child_with_deadline(Instant::now() + deadline);
    }

    let manifest = Manifest::load(&ctx.workspace)?;
    health::pre_apply(&ctx, &manifest, &env, options.locked)?;

    let _lock = ctx.workspace.acquire_lock(options.wait_for_lock)?;

    let store = Store::open(ctx.workspace.store_dir())?;
    let cache = Cache::open(ctx.workspace.cache_dir())?;
    let plan_options = PlanOptions { locked: options.locked, skip_packages: options.skip_packages };
    let plan = planner::plan(&ctx, &manifest, &env, &plan_options, &store, &cache)?;

    run_plan(&ctx, manifest, plan, options)
}

/// Execute a plan computed from an explicit pin map (rollback path)
pub fn run_pins(
    ctx: &Context,
    label: &str,
    pins: &BTreeMap<String, String>,
    options: &ApplyOptions,
) -> Result<ApplySummary> {
    let manifest = Manifest::load(&ctx.workspace)?;
    let _lock = ctx.workspace.acquire_lock(false)?;

    let store = Store::open(ctx.workspace.store_dir())?;
    let cache = Cache::open(ctx.workspace.cache_dir())?;
    let plan_options = PlanOptions { locked: false, skip_packages: options.skip_packages };
    let plan = planner::plan_for_pins(ctx, &manifest, label, pins, &plan_options, &store, &cache)?;

    run_plan(ctx, manifest, plan, options)
}

fn run_plan(
    ctx: &Context,
    manifest: Manifest,
    plan: Plan,
    options: &ApplyOptions,
) -> Result<ApplySummary> {
    if plan.actions.is_empty() {
        info!("nothing to apply");
        return Ok(ApplySummary { plan, reports: Vec::new() });
    }

    let graph = DependencyGraph::from_manifest(&manifest);
    let schedule = ScheduleOptions {
        jobs: options.jobs.unwrap_or(ctx.config.parallel_jobs),
        fail_fast: !options.continue_on_error,
        retries: options.retries,
        retry_backoff: Duration::from_secs(1),
    };
    let exec = ExecOptions {
        skip_packages: options.skip_packages,
        package_retries: options.retries,
        component_timeout: options.component_timeout,
    };

    let progress: Box<dyn ProgressTracker> = if options.show_progress {
        tracker_for(ctx.config.show_progress, "apply", plan.actions.len() as u64)
    } else {
        Box::new(SilentProgress::new())
    };

    let shared_ctx = Arc::new(ctx.clone());
    let shared_manifest = Arc::new(manifest);
    let store = Store::open(ctx.workspace.store_dir())?;
    let cache = Cache::open(ctx.workspace.cache_dir())?;
    let remote = Arc::new(RemoteStore::new(
        Store::open(ctx.workspace.store_dir())?,
        ctx.config.remote_store.as_deref().or(ctx.config.remote_cache.as_deref()),
    ));
    let exec = Arc::new(exec);

    let reports = {
        let ctx = Arc::clone(&shared_ctx);
        let manifest = Arc::clone(&shared_manifest);
        let store = store.clone();
        let cache = cache.clone();
        let remote = Arc::clone(&remote);
        let exec = Arc::clone(&exec);
        scheduler::run(
            &graph,
            &plan.actions,
            &schedule,
            &ctx.cancel.clone(),
            progress.as_ref(),
            move |action| {
                executor::execute(&ctx, &manifest, action, &store, &cache, &remote, &exec)
            },
        )
    };

    let summary = ApplySummary { plan, reports };
    if summary.ok() {
        progress.finish_with_message("apply complete");
    } else {
        progress.finish_with_error(&format!(
            "{} component(s) failed, {} skipped",
            summary.failed().len(),
            summary.skipped().len()
        ));
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::workspace::Workspace;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, Context) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("manifests")).unwrap();
        fs::write(dir.path().join("manifests/components.yaml"), "components: {}\n").unwrap();
        let mut config = Config::default();
        config.show_progress = false;
        let ctx = Context::new(Workspace::at(dir.path(), "manifests"), config);
        (dir, ctx)
    }

    #[test]
    fn test_empty_component_set_applies_cleanly() {
        let (_dir, ctx) = fixture();
        let summary = run(&ctx, &ApplyOptions::default()).unwrap();
        assert!(summary.ok());
        assert!(summary.reports.is_empty());
    }

    #[test]
    fn test_concurrent_apply_gets_workspace_busy() {
        let (_dir, ctx) = fixture();
        let held = ctx.workspace.acquire_lock(false).unwrap();

        let manifests = ctx.workspace.components_manifest();
        // Force a non-empty plan so the lock is actually contended
        fs::write(
            &manifests,
            "meta:\n  mode: vendored\ncomponents:\n  api:\n    repo: r\n    version: v1.0.0\n    type: generic\n",
        )
        .unwrap();

        let result = run(&ctx, &ApplyOptions::default());
        assert!(matches!(result, Err(crate::error::Error::WorkspaceBusy(_))));
        drop(held);
    }
}
