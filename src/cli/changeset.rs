// src/cli/changeset.rs
//! Changeset subcommands

use clap::Subcommand;

#[derive(Subcommand)]
pub enum ChangesetCommands {
    /// Open a new changeset
    Create {
        /// What this changeset is for
        description: String,

        /// Author (defaults to $USER)
        #[arg(long)]
        author: Option<String>,
    },

    /// Show one changeset with its recorded commits
    Show {
        id: String,
    },

    /// List changesets, most recent first
    List {
        /// Filter by status (in-progress|committed|failed|rolled-back)
        #[arg(long)]
        status: Option<String>,

        /// Show at most this many
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show the in-progress changeset
    Current,

    /// Attach a component's HEAD commit to the in-progress changeset
    Record {
        /// Component whose HEAD commit to record
        component: String,
    },

    /// Collect trailer-stamped commits and mark the changeset committed
    Finalize {
        id: String,
    },

    /// Revert every recorded commit, newest dependents first
    Rollback {
        id: String,
    },

    /// Binary-search committed changesets for the one that broke a test
    Bisect {
        /// Known-good changeset id
        start: String,
        /// Known-bad changeset id
        end: String,
        /// Test command, run from the workspace root
        test_command: String,
    },
}
