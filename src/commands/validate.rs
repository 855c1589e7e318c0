// src/commands/validate.rs

//! `meta validate` - manifests, dependency graph, lock, features

use anyhow::Result;

use meta::lockfile;
use meta::manifest::Manifest;
use meta::resolver::DependencyGraph;
use meta::Context;

pub fn cmd_validate(ctx: &Context, env: Option<&str>) -> Result<()> {
    let manifest = Manifest::load(&ctx.workspace)?;
    println!("manifests: ok ({} components)", manifest.components.len());

    let graph = DependencyGraph::from_manifest(&manifest);
    let order = graph.topo_order()?;
    println!("dependencies: ok (order: {})", order.join(" -> "));

    let env = ctx.env_or_default(env);
    manifest.environment(env)?;

    let lock_path = ctx.workspace.lock_path(env);
    if lock_path.exists() {
        let lock = lockfile::load(ctx, env)?;
        let discrepancies = lockfile::validate(ctx, &manifest, &lock)?;
        if discrepancies.is_empty() {
            println!("lock [{env}]: ok");
        } else {
            for discrepancy in &discrepancies {
                println!("lock [{env}]: {discrepancy}");
            }
            return Err(meta::Error::LockMismatch {
                environment: env.to_string(),
                discrepancies: discrepancies.iter().map(|d| d.to_string()).collect(),
            }
            .into());
        }
    } else {
        println!("lock [{env}]: not generated");
    }

    for feature in manifest.features.values() {
        println!("feature '{}': ok ({} components)", feature.name, feature.components.len());
    }

    println!("validation passed");
    Ok(())
}
