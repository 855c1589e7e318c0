// src/cli/mod.rs

//! CLI definitions
//!
//! Flat command routing: each subcommand parses into plain data and the
//! dispatcher in `main.rs` hands it to one `cmd_*` function together with
//! the resolved configuration.

pub mod changeset;
pub mod config;
pub mod lock;
pub mod rollback;
pub mod snapshot;
pub mod store;
pub mod vendor;

use clap::{Parser, Subcommand};

pub use changeset::ChangesetCommands;
pub use config::ConfigCommands;
pub use lock::LockCommands;
pub use rollback::RollbackCommands;
pub use snapshot::SnapshotCommands;
pub use store::{CacheCommands, StoreCommands};
pub use vendor::VendorCommands;

#[derive(Parser)]
#[command(name = "meta")]
#[command(version)]
#[command(about = "Control plane for hierarchical meta-repositories", long_about = None)]
pub struct Cli {
    /// Manifests directory (default: manifests)
    #[arg(long, global = true)]
    pub manifests_dir: Option<String>,

    /// Log level filter (trace|debug|info|warn|error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Disable progress bars
    #[arg(long, global = true)]
    pub no_progress: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate manifests, locks, dependencies, and features
    Validate {
        /// Environment to validate the lock for
        #[arg(short, long)]
        env: Option<String>,
    },

    /// Show the apply plan without side effects
    Plan {
        #[arg(short, long)]
        env: Option<String>,

        /// Restrict the plan to one component
        #[arg(short, long)]
        component: Option<String>,

        /// Plan from the environment lock file
        #[arg(long)]
        locked: bool,
    },

    /// Materialize components for an environment
    Apply {
        #[arg(short, long)]
        env: Option<String>,

        /// Use the environment lock file as the pin source
        #[arg(long)]
        locked: bool,

        /// Worker pool width
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Keep going when independent components fail
        #[arg(long)]
        continue_on_error: bool,

        /// Extra attempts for retryable failures
        #[arg(long, default_value_t = 0)]
        retry: u32,

        /// Skip package-manager installs
        #[arg(long)]
        skip_packages: bool,

        /// Whole-run deadline in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Per-component timeout in seconds
        #[arg(long)]
        component_timeout: Option<u64>,

        /// Wait for a busy workspace instead of failing
        #[arg(long)]
        wait: bool,
    },

    /// Report desired vs actual state per component
    Status {
        #[arg(short, long)]
        env: Option<String>,
    },

    /// Generate or validate environment lock files
    Lock {
        #[arg(short, long)]
        env: Option<String>,

        /// Attach the lock generation to a changeset
        #[arg(long)]
        changeset: Option<String>,

        /// Validate the existing lock instead of generating
        #[arg(long)]
        validate: bool,

        #[command(subcommand)]
        command: Option<LockCommands>,
    },

    /// Roll back to a recorded state
    Rollback {
        #[command(subcommand)]
        command: RollbackCommands,
    },

    /// Manage changesets (atomic commit groups across repos)
    Changeset {
        #[command(subcommand)]
        command: ChangesetCommands,
    },

    /// Convert between reference and vendored storage modes
    Vendor {
        #[command(subcommand)]
        command: VendorCommands,
    },

    /// Inspect and manage the build cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Inspect the content-addressed store
    Store {
        #[command(subcommand)]
        command: StoreCommands,
    },

    /// Garbage-collect unreferenced store and cache entries
    Gc {
        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,

        /// Cache entry time-to-live in days
        #[arg(long, default_value_t = 30)]
        cache_ttl_days: i64,
    },

    /// Check component health
    Health {
        #[arg(short, long)]
        env: Option<String>,

        /// Check a single component
        #[arg(short, long)]
        component: Option<String>,

        /// Check every component
        #[arg(long)]
        all: bool,

        /// Also run component builds
        #[arg(long)]
        build: bool,

        /// Also run component tests
        #[arg(long)]
        tests: bool,
    },

    /// Read or write configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Capture or list workspace snapshots
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}
