// src/cli/snapshot.rs
//! Snapshot subcommands

use clap::Subcommand;

#[derive(Subcommand)]
pub enum SnapshotCommands {
    /// Capture the current pin map
    Create {
        /// Snapshot name (defaults to a timestamp)
        #[arg(long)]
        name: Option<String>,

        #[arg(short, long)]
        env: Option<String>,
    },

    /// List snapshots, newest first
    List,
}
