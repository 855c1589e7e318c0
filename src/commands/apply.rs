// src/commands/apply.rs

//! `meta apply` - execute the plan for an environment

use anyhow::Result;
use std::time::Duration;

use meta::apply::{self, ApplyOptions, Outcome};
use meta::Context;

#[allow(clippy::too_many_arguments)]
pub fn cmd_apply(
    ctx: &Context,
    env: Option<&str>,
    locked: bool,
    jobs: Option<usize>,
    continue_on_error: bool,
    retry: u32,
    skip_packages: bool,
    timeout: Option<u64>,
    component_timeout: Option<u64>,
    wait: bool,
) -> Result<()> {
    let options = ApplyOptions {
        env: env.map(str::to_string),
        locked,
        jobs,
        continue_on_error,
        retries: retry,
        skip_packages,
        deadline: timeout.map(Duration::from_secs),
        component_timeout: component_timeout.map(Duration::from_secs),
        show_progress: true,
        wait_for_lock: wait,
    };

    let summary = apply::run(ctx, &options)?;

    for report in &summary.reports {
        let marker = match &report.outcome {
            Outcome::Succeeded => "ok",
            Outcome::Failed { .. } => "FAILED",
            Outcome::SkippedDependency { .. } => "skipped",
            Outcome::SkippedCancelled => "cancelled",
        };
        let detail = match &report.outcome {
            Outcome::Failed { kind, message } => format!(" [{kind}] {message}"),
            Outcome::SkippedDependency { failed } => format!(" (dependency '{failed}' failed)"),
            _ => String::new(),
        };
        println!(
            "  {:<20} {:<16} {:>8} {:.1}s{}",
            report.component,
            report.action.to_string(),
            marker,
            report.duration.as_secs_f64(),
            detail
        );
    }

    if summary.ok() {
        println!("applied {} component(s)", summary.reports.len());
        Ok(())
    } else {
        // Surface the aggregate error so main maps the right exit code
        apply::scheduler::summarize(&summary.reports, &ctx.cancel)?;
        Ok(())
    }
}
