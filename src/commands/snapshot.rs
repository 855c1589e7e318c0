// src/commands/snapshot.rs

//! `meta snapshot` - pin-map snapshots

use anyhow::Result;

use crate::cli::SnapshotCommands;
use meta::git::GitDriver;
use meta::manifest::Manifest;
use meta::snapshot;
use meta::Context;

pub fn cmd_snapshot(ctx: &Context, command: SnapshotCommands) -> Result<()> {
    match command {
        SnapshotCommands::Create { name, env } => {
            let manifest = Manifest::load(&ctx.workspace)?;
            let git = GitDriver::new(ctx.cancel.clone());
            let snapshot = snapshot::capture(ctx, &manifest, &git, env.as_deref())?;
            let path = snapshot::save(ctx, &snapshot, name.as_deref())?;
            println!(
                "snapshot of {} pin(s) written to {}",
                snapshot.pins.len(),
                path.display()
            );
        }

        SnapshotCommands::List => {
            for (path, snapshot) in snapshot::list(ctx)? {
                println!(
                    "  {:<28} {} mode, {} pin(s), {}",
                    path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default(),
                    snapshot.mode,
                    snapshot.pins.len(),
                    snapshot.created_at
                );
            }
        }
    }
    Ok(())
}
