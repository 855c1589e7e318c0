// src/cli/vendor.rs
//! Vendor engine subcommands

use clap::Subcommand;

#[derive(Subcommand)]
pub enum VendorCommands {
    /// Convert the workspace to the target storage mode
    Convert {
        /// Target mode: reference or vendored
        mode: String,

        /// Pull pins from this environment
        #[arg(short, long)]
        env: Option<String>,

        /// Roll everything back on any failure (default)
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        atomic: bool,

        /// Record failures and commit over the successful subset
        #[arg(long)]
        continue_on_error: bool,

        /// Write the plan file and stop
        #[arg(long)]
        dry_run: bool,

        /// Abort a component when credential-shaped content is found
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        fail_on_secrets: bool,

        /// Honor upstream .gitignore when copying
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        respect_gitignore: bool,

        /// Overlapping upstream fetches
        #[arg(long, default_value_t = 2)]
        prefetch: usize,

        /// Skip component trees in the safety backup
        #[arg(long)]
        no_backup_components: bool,
    },

    /// Vendor a single component
    Import {
        component: String,

        #[arg(short, long)]
        env: Option<String>,

        /// Re-import even if already vendored
        #[arg(short, long)]
        force: bool,
    },

    /// Vendor every component at its manifest pin
    ImportAll {
        #[arg(short, long)]
        env: Option<String>,

        #[arg(short, long)]
        force: bool,
    },

    /// Show per-component storage state
    Status,

    /// Verify provenance records and versions
    Verify {
        #[arg(short, long)]
        env: Option<String>,
    },

    /// Create a workspace backup
    Backup {
        /// Manifests only, skip component trees
        #[arg(long)]
        no_components: bool,
    },

    /// Restore a workspace backup
    Restore {
        /// Backup name (a timestamp; see list-backups)
        name: String,

        /// Restore manifests only
        #[arg(long)]
        no_components: bool,
    },

    /// List available backups
    ListBackups,

    /// Resume an interrupted conversion
    Resume {
        /// Transaction id (defaults to the latest uncommitted)
        #[arg(long)]
        id: Option<String>,

        /// Also retry components whose checkpoint is failed
        #[arg(long)]
        retry_failed: bool,
    },

    /// List conversion checkpoint logs
    ListCheckpoints,

    /// Production release: pin from an environment and convert to vendored
    Release {
        /// Environment carrying the release pins
        #[arg(short, long, default_value = "prod")]
        env: String,
    },
}
