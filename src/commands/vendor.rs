// src/commands/vendor.rs

//! `meta vendor` - storage-mode conversion and vendored-tree management

use anyhow::Result;

use crate::cli::VendorCommands;
use meta::manifest::{Manifest, WorkspaceMode};
use meta::vendor::{self, backup, checkpoint, ConversionOptions, VendorState};
use meta::Context;

pub fn cmd_vendor(ctx: &Context, command: VendorCommands) -> Result<()> {
    match command {
        VendorCommands::Convert {
            mode,
            env,
            atomic,
            continue_on_error,
            dry_run,
            fail_on_secrets,
            respect_gitignore,
            prefetch,
            no_backup_components,
        } => {
            let options = ConversionOptions {
                target: mode.parse::<WorkspaceMode>()?,
                env,
                atomic,
                continue_on_error,
                dry_run,
                fail_on_secrets,
                respect_gitignore,
                backup_components: !no_backup_components,
                prefetch,
            };
            let outcome = vendor::convert(ctx, &options)?;
            report_outcome(&outcome);
        }

        VendorCommands::Import { component, env, force } => {
            vendor::import_component(ctx, &component, env.as_deref(), force)?;
            println!("imported {component}");
        }

        VendorCommands::ImportAll { env, force } => {
            let manifest = Manifest::load(&ctx.workspace)?;
            for name in manifest.component_names() {
                vendor::import_component(ctx, &name, env.as_deref(), force)?;
                println!("imported {name}");
            }
        }

        VendorCommands::Status => {
            let manifest = Manifest::load(&ctx.workspace)?;
            println!("workspace mode: {}", manifest.mode);
            for (name, state) in vendor::status(ctx, &manifest)? {
                let rendered = match state {
                    VendorState::Vendored { version } => format!("vendored @ {version}"),
                    VendorState::Reference => "reference (working tree)".to_string(),
                    VendorState::Missing => "missing".to_string(),
                };
                println!("  {name:<20} {rendered}");
            }
        }

        VendorCommands::Verify { env } => {
            let manifest = Manifest::load(&ctx.workspace)?;
            let checks = vendor::verify(ctx, &manifest, env.as_deref())?;
            let mut failures = 0;
            for check in &checks {
                if check.ok {
                    println!("  {:<20} ok", check.component);
                } else {
                    failures += 1;
                    println!("  {:<20} {}", check.component, check.problems.join("; "));
                }
            }
            if failures > 0 {
                return Err(meta::Error::Vendor {
                    component: checks
                        .iter()
                        .find(|c| !c.ok)
                        .map(|c| c.component.clone())
                        .unwrap_or_default(),
                    message: format!("{failures} component(s) failed verification"),
                }
                .into());
            }
        }

        VendorCommands::Backup { no_components } => {
            let info = backup::create(ctx, !no_components)?;
            println!("backup created: {}", info.name);
        }

        VendorCommands::Restore { name, no_components } => {
            backup::restore(ctx, &name, !no_components)?;
            println!("restored backup {name}");
        }

        VendorCommands::ListBackups => {
            for info in backup::list(ctx)? {
                let scope = if info.includes_components { "manifests+components" } else { "manifests" };
                println!("  {} ({scope})", info.name);
            }
        }

        VendorCommands::Resume { id, retry_failed } => {
            let outcome = vendor::resume(ctx, id.as_deref(), retry_failed)?;
            report_outcome(&outcome);
        }

        VendorCommands::ListCheckpoints => {
            for log in checkpoint::list(ctx)? {
                println!(
                    "  {} -> {} ({}; {} completed, {} failed, started {})",
                    log.transaction_id,
                    log.target_mode,
                    if log.committed { "committed" } else { "open" },
                    log.completed().len(),
                    log.failed().len(),
                    log.started_at
                );
            }
        }

        VendorCommands::Release { env } => {
            let outcome = vendor::release(ctx, &env)?;
            report_outcome(&outcome);
            println!("production release prepared from environment '{env}'");
        }
    }
    Ok(())
}

fn report_outcome(outcome: &vendor::ConversionOutcome) {
    if let Some(plan) = &outcome.plan_file {
        println!("dry run: plan written to {}", plan.display());
        return;
    }
    if outcome.transaction_id.is_empty() {
        println!("nothing to convert");
        return;
    }
    println!(
        "conversion {}: {} converted, {} failed{}",
        outcome.transaction_id,
        outcome.converted.len(),
        outcome.failed.len(),
        if outcome.committed { ", committed" } else { "" }
    );
    for (component, error) in &outcome.failed {
        println!("  {component}: {error}");
    }
    if let Some(backup) = &outcome.backup {
        println!("backup: {backup}");
    }
}
