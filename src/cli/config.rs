// src/cli/config.rs
//! Configuration subcommands

use clap::Subcommand;

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print one resolved value (or all with no key)
    Get {
        key: Option<String>,
    },

    /// Set a key in the project (or global) config file
    Set {
        key: String,
        value: String,

        /// Write to ~/.meta/config.yaml instead of the project file
        #[arg(long)]
        global: bool,
    },

    /// Remove a key from the project (or global) config file
    Unset {
        key: String,

        #[arg(long)]
        global: bool,
    },

    /// Create an empty project config file
    Init,
}
