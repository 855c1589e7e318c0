// src/commands/rollback.rs

//! `meta rollback` - restore recorded state

use anyhow::Result;

use crate::cli::RollbackCommands;
use meta::apply::ApplyOptions;
use meta::rollback::{self, RollbackTarget};
use meta::Context;

pub fn cmd_rollback(ctx: &Context, command: RollbackCommands) -> Result<()> {
    let target = match command {
        RollbackCommands::Component { name, pin } => RollbackTarget::Component { name, pin },
        RollbackCommands::Lock { reference } => RollbackTarget::Lock { reference },
        RollbackCommands::Store { hash } => RollbackTarget::StoreHash { hash },
        RollbackCommands::Snapshot { reference } => RollbackTarget::Snapshot { reference },
        RollbackCommands::Changeset { id } => RollbackTarget::Changeset { id },
        RollbackCommands::List => {
            for candidate in rollback::list_targets(ctx)? {
                println!("  {:<10} {:<44} {}", candidate.kind, candidate.reference, candidate.detail);
            }
            return Ok(());
        }
    };

    let options = ApplyOptions { skip_packages: true, show_progress: true, ..Default::default() };
    match rollback::execute(ctx, &target, &options)? {
        Some(summary) => {
            if summary.ok() {
                println!("rolled back {} component(s)", summary.reports.len());
            } else {
                meta::apply::scheduler::summarize(&summary.reports, &ctx.cancel)?;
            }
        }
        None => println!("changeset rolled back"),
    }
    Ok(())
}
