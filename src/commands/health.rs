// src/commands/health.rs

//! `meta health` - component verification

use anyhow::Result;

use meta::health::{self, HealthOptions, HealthState};
use meta::manifest::Manifest;
use meta::Context;

pub fn cmd_health(
    ctx: &Context,
    env: Option<&str>,
    component: Option<&str>,
    build: bool,
    tests: bool,
) -> Result<()> {
    let manifest = Manifest::load(&ctx.workspace)?;
    let env = ctx.env_or_default(env);
    let options = HealthOptions { run_build: build, run_tests: tests };

    let (results, healthy) = health::check_all(ctx, &manifest, env, component, &options)?;
    for result in &results {
        println!("  {:<20} {}", result.component, result.state);
        for detail in &result.details {
            println!("      {detail}");
        }
    }

    if healthy {
        println!("all components healthy");
        Ok(())
    } else {
        let first = results
            .iter()
            .find(|r| r.state != HealthState::Healthy)
            .expect("unhealthy component");
        Err(meta::Error::Vendor {
            component: first.component.clone(),
            message: format!("health check failed: {}", first.state),
        }
        .into())
    }
}
