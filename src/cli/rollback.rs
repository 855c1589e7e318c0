// src/cli/rollback.rs
//! Rollback target subcommands

use clap::Subcommand;

#[derive(Subcommand)]
pub enum RollbackCommands {
    /// Roll one component back to a version or commit
    Component {
        name: String,
        /// Version tag or commit sha
        pin: String,
    },

    /// Roll the workspace back to a lock file
    Lock {
        /// Environment name or lock file path
        reference: String,
    },

    /// Restore a component from a store entry
    Store {
        hash: String,
    },

    /// Roll the workspace back to a snapshot
    Snapshot {
        /// Snapshot name or file path
        reference: String,
    },

    /// Revert a committed changeset's commits
    Changeset {
        id: String,
    },

    /// List everything the workspace can roll back to
    List,
}
