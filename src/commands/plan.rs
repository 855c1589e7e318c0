// src/commands/plan.rs

//! `meta plan` - show the apply plan without side effects

use anyhow::Result;

use meta::apply::{self, PlanOptions};
use meta::Context;

pub fn cmd_plan(
    ctx: &Context,
    env: Option<&str>,
    component: Option<&str>,
    locked: bool,
) -> Result<()> {
    let env = ctx.env_or_default(env);
    let plan = apply::compute_plan(ctx, env, &PlanOptions { locked, skip_packages: false })?;

    println!("plan for environment '{env}' ({} mode):", plan.mode);
    let mut shown = 0;
    for action in &plan.actions {
        if component.is_some_and(|c| c != action.component) {
            continue;
        }
        shown += 1;
        let before = action.before.as_deref().unwrap_or("-");
        println!(
            "  {:<20} {:<16} {} -> {}",
            action.component,
            action.action.to_string(),
            short(before),
            short(&action.identity)
        );
    }
    if shown == 0 {
        println!("  nothing to do");
    }
    Ok(())
}

fn short(identity: &str) -> &str {
    if identity.len() == 40 && identity.chars().all(|c| c.is_ascii_hexdigit()) {
        &identity[..8]
    } else {
        identity
    }
}
