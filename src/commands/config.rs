// src/commands/config.rs

//! `meta config` - layered configuration management

use anyhow::{bail, Result};

use crate::cli::ConfigCommands;
use meta::config::{
    global_config_path, init_config_file, set_config_value, unset_config_value, KNOWN_KEYS,
};
use meta::Context;

pub fn cmd_config(ctx: &Context, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Get { key } => match key {
            Some(key) => match ctx.config.get(&key) {
                Some(value) => println!("{value}"),
                None => bail!("unknown or unset config key '{key}'"),
            },
            None => {
                for key in KNOWN_KEYS {
                    println!("{key} = {}", ctx.config.get(key).unwrap_or_else(|| "-".to_string()));
                }
            }
        },

        ConfigCommands::Set { key, value, global } => {
            let path = config_path(ctx, global)?;
            set_config_value(&path, &key, &value)?;
            println!("set {key} in {}", path.display());
        }

        ConfigCommands::Unset { key, global } => {
            let path = config_path(ctx, global)?;
            unset_config_value(&path, &key)?;
            println!("unset {key} in {}", path.display());
        }

        ConfigCommands::Init => {
            let path = ctx.workspace.config_file();
            if init_config_file(&path)? {
                println!("created {}", path.display());
            } else {
                println!("{} already exists", path.display());
            }
        }
    }
    Ok(())
}

fn config_path(ctx: &Context, global: bool) -> Result<std::path::PathBuf> {
    if global {
        global_config_path().ok_or_else(|| anyhow::anyhow!("cannot resolve home directory"))
    } else {
        Ok(ctx.workspace.config_file())
    }
}
