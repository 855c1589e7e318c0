// src/apply/scheduler.rs

//! Bounded worker pool with an aggregator owning all progress state
//!
//! Components whose dependencies are complete become ready; a pool of
//! workers draws ready components in alphabetical order and reports results
//! back over a channel. The aggregator thread is the only holder of
//! schedule state, so there is no shared-mutable surface beyond the job
//! queue itself.
//!
//! On failure under fail-fast, dispatch stops, in-flight workers drain, and
//! everything unstarted is reported as skipped. Under continue-on-error
//! only the dependents of the failed component are skipped.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cancel::CancelFlag;
use crate::error::Error;
use crate::progress::ProgressTracker;
use crate::resolver::DependencyGraph;

use super::planner::{ActionKind, PlannedAction};

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct ScheduleOptions {
    pub jobs: usize,
    /// Stop dispatching after the first failure
    pub fail_fast: bool,
    /// Extra attempts for retryable failures
    pub retries: u32,
    pub retry_backoff: Duration,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self { jobs: 4, fail_fast: true, retries: 0, retry_backoff: Duration::from_secs(2) }
    }
}

/// Terminal state of one component
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed { kind: String, message: String },
    /// Dependency failed upstream; the component never started
    SkippedDependency { failed: String },
    /// The run was cancelled before the component started
    SkippedCancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Per-component result
#[derive(Debug, Clone)]
pub struct ComponentReport {
    pub component: String,
    pub action: ActionKind,
    pub outcome: Outcome,
    pub attempts: u32,
    pub duration: Duration,
}

struct Completion {
    component: String,
    outcome: Outcome,
    attempts: u32,
    duration: Duration,
}

/// Execute `work` for every planned action, honoring dependency order
pub fn run<F>(
    graph: &DependencyGraph,
    actions: &[PlannedAction],
    options: &ScheduleOptions,
    cancel: &CancelFlag,
    progress: &dyn ProgressTracker,
    work: F,
) -> Vec<ComponentReport>
where
    F: Fn(&PlannedAction) -> crate::error::Result<()> + Send + Sync + 'static,
{
    let total = actions.len();
    progress.set_length(total as u64);
    if total == 0 {
        return Vec::new();
    }

    let by_name: BTreeMap<String, PlannedAction> =
        actions.iter().map(|a| (a.component.clone(), a.clone())).collect();

    // Remaining dependency count, restricted to scheduled components
    let mut remaining: BTreeMap<String, usize> = by_name
        .keys()
        .map(|name| {
            let deps = graph
                .dependencies(name)
                .into_iter()
                .filter(|d| by_name.contains_key(d))
                .count();
            (name.clone(), deps)
        })
        .collect();

    let (job_tx, job_rx) = mpsc::channel::<PlannedAction>();
    let job_rx = Arc::new(Mutex::new(job_rx));
    let (done_tx, done_rx) = mpsc::channel::<Completion>();

    let work = Arc::new(work);
    let worker_count = options.jobs.max(1).min(total);
    let mut workers = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let job_rx = Arc::clone(&job_rx);
        let done_tx = done_tx.clone();
        let work = Arc::clone(&work);
        let cancel = cancel.clone();
        let retries = options.retries;
        let backoff = options.retry_backoff;

        workers.push(thread::spawn(move || loop {
            let job = {
                let guard = match job_rx.lock() {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
                guard.recv()
            };
            let Ok(action) = job else { return };

            let started = Instant::now();
            let mut attempts = 0;
            let outcome = loop {
                attempts += 1;
                match work(&action) {
                    Ok(()) => break Outcome::Succeeded,
                    Err(e) if e.is_retryable() && attempts <= retries && !cancel.is_cancelled() => {
                        warn!(
                            "{} attempt {attempts} failed, retrying: {e}",
                            action.component
                        );
                        thread::sleep(backoff * attempts);
                    }
                    Err(e) => {
                        break Outcome::Failed {
                            kind: e.kind_name().to_string(),
                            message: e.to_string(),
                        }
                    }
                }
            };

            let completion = Completion {
                component: action.component.clone(),
                outcome,
                attempts,
                duration: started.elapsed(),
            };
            if done_tx.send(completion).is_err() {
                return;
            }
        }));
    }
    drop(done_tx);

    // Aggregator: owns ready set, reports, and all progress state
    let mut reports: BTreeMap<String, ComponentReport> = BTreeMap::new();
    let mut ready: BTreeSet<String> = remaining
        .iter()
        .filter(|(_, deps)| **deps == 0)
        .map(|(name, _)| name.clone())
        .collect();
    for name in &ready {
        remaining.remove(name);
    }

    let mut in_flight = 0usize;
    let mut halted = false;

    let dispatch = |ready: &mut BTreeSet<String>, in_flight: &mut usize, halted: bool| {
        if halted {
            return;
        }
        // Alphabetical within a level: BTreeSet pops in sorted order
        while let Some(name) = ready.iter().next().cloned() {
            ready.remove(&name);
            if let Some(action) = by_name.get(&name) {
                debug!("dispatch {}", name);
                if job_tx.send(action.clone()).is_ok() {
                    *in_flight += 1;
                }
            }
        }
    };

    dispatch(&mut ready, &mut in_flight, halted);

    while in_flight > 0 {
        let Ok(completion) = done_rx.recv() else { break };
        in_flight -= 1;

        let action_kind =
            by_name.get(&completion.component).map(|a| a.action).unwrap_or(ActionKind::Noop);
        let succeeded = completion.outcome.is_success();

        progress.increment(1);
        progress.set_message(&match &completion.outcome {
            Outcome::Succeeded => format!("{} done", completion.component),
            Outcome::Failed { message, .. } => format!("{} failed: {message}", completion.component),
            _ => completion.component.clone(),
        });

        reports.insert(
            completion.component.clone(),
            ComponentReport {
                component: completion.component.clone(),
                action: action_kind,
                outcome: completion.outcome,
                attempts: completion.attempts,
                duration: completion.duration,
            },
        );

        if succeeded {
            // Promote dependents whose dependencies are now all complete
            for dependent in graph.reverse_deps(&completion.component) {
                if let Some(count) = remaining.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        remaining.remove(&dependent);
                        ready.insert(dependent);
                    }
                }
            }
        } else {
            // Dependents can never run; mark the whole downstream cone
            let failed_name = completion.component.clone();
            for dependent in graph.transitive_dependents(&failed_name) {
                if by_name.contains_key(&dependent) && !reports.contains_key(&dependent) {
                    remaining.remove(&dependent);
                    ready.remove(&dependent);
                    reports.insert(
                        dependent.clone(),
                        ComponentReport {
                            component: dependent.clone(),
                            action: by_name[&dependent].action,
                            outcome: Outcome::SkippedDependency { failed: failed_name.clone() },
                            attempts: 0,
                            duration: Duration::ZERO,
                        },
                    );
                    progress.increment(1);
                }
            }
            if options.fail_fast {
                halted = true;
            }
        }

        if cancel.is_cancelled() {
            halted = true;
        }
        dispatch(&mut ready, &mut in_flight, halted);
    }

    // Close the queue so idle workers exit, then join them
    drop(job_tx);
    for worker in workers {
        let _ = worker.join();
    }

    // Everything never dispatched is skipped
    for (name, action) in &by_name {
        if !reports.contains_key(name) {
            let outcome = if cancel.is_cancelled() || halted {
                Outcome::SkippedCancelled
            } else {
                Outcome::SkippedDependency { failed: "<unscheduled>".to_string() }
            };
            reports.insert(
                name.clone(),
                ComponentReport {
                    component: name.clone(),
                    action: action.action,
                    outcome,
                    attempts: 0,
                    duration: Duration::ZERO,
                },
            );
        }
    }

    // Report in plan order
    actions
        .iter()
        .filter_map(|a| reports.remove(&a.component))
        .collect()
}

/// Aggregate exit semantics for a finished run
pub fn summarize(reports: &[ComponentReport], cancel: &CancelFlag) -> Result<(), Error> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let failed: Vec<&ComponentReport> = reports
        .iter()
        .filter(|r| matches!(r.outcome, Outcome::Failed { .. }))
        .collect();
    match failed.first() {
        None => Ok(()),
        Some(first) => match &first.outcome {
            Outcome::Failed { message, .. } => Err(Error::Vendor {
                component: first.component.clone(),
                message: message.clone(),
            }),
            _ => unreachable!(),
        },
    }
}
