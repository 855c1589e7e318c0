// src/cli/lock.rs
//! Lock promotion and comparison subcommands

use clap::Subcommand;

#[derive(Subcommand)]
pub enum LockCommands {
    /// Copy one environment's lock onto another
    Promote {
        /// Source environment
        src: String,
        /// Destination environment
        dst: String,
    },

    /// Diff two environment locks
    Compare {
        /// First environment
        left: String,
        /// Second environment
        right: String,
    },
}
