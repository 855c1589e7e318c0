// src/cli/store.rs
//! Store and cache subcommands

use clap::Subcommand;

#[derive(Subcommand)]
pub enum StoreCommands {
    /// List store entries
    List,

    /// Show one entry's metadata
    Query {
        hash: String,
    },

    /// Restore an entry's tree into a directory
    Get {
        hash: String,
        target: String,
    },

    /// Add a directory tree to the store
    Add {
        /// Source directory
        path: String,

        /// Component the tree belongs to
        #[arg(long)]
        component: String,

        /// Materialization identity (commit sha or semver)
        #[arg(long)]
        version: Option<String>,
    },

    /// Recompute and verify an entry's hashes
    Verify {
        hash: String,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show cache statistics
    Stats,

    /// List cache entries
    List,

    /// Drop cache entries
    Invalidate {
        /// Drop one entry by key
        #[arg(long)]
        key: Option<String>,

        /// Drop every entry for a component
        #[arg(long)]
        component: Option<String>,
    },
}
