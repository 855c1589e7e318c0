// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: target environment
fn env_arg() -> Arg {
    Arg::new("env")
        .short('e')
        .long("env")
        .value_name("ENV")
        .help("Target environment (default from config)")
}

fn build_cli() -> Command {
    Command::new("meta")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Control plane for hierarchical meta-repositories")
        .subcommand_required(true)
        .subcommand(
            Command::new("validate")
                .about("Validate manifests, locks, dependencies, and features")
                .arg(env_arg()),
        )
        .subcommand(
            Command::new("plan")
                .about("Show the apply plan without side effects")
                .arg(env_arg())
                .arg(Arg::new("component").short('c').long("component").help("Restrict to one component")),
        )
        .subcommand(
            Command::new("apply")
                .about("Materialize components for an environment")
                .arg(env_arg())
                .arg(Arg::new("locked").long("locked").action(clap::ArgAction::SetTrue).help("Pin from the environment lock file"))
                .arg(Arg::new("jobs").short('j').long("jobs").help("Worker pool width")),
        )
        .subcommand(
            Command::new("status")
                .about("Report desired vs actual state per component")
                .arg(env_arg()),
        )
        .subcommand(
            Command::new("lock")
                .about("Generate, validate, promote, or compare environment locks")
                .arg(env_arg()),
        )
        .subcommand(Command::new("rollback").about("Roll back to a recorded state"))
        .subcommand(Command::new("changeset").about("Manage atomic commit groups across repos"))
        .subcommand(Command::new("vendor").about("Convert between reference and vendored modes"))
        .subcommand(Command::new("cache").about("Inspect and manage the build cache"))
        .subcommand(Command::new("store").about("Inspect the content-addressed store"))
        .subcommand(Command::new("gc").about("Garbage-collect unreferenced store and cache entries"))
        .subcommand(Command::new("health").about("Check component health"))
        .subcommand(Command::new("config").about("Read or write configuration"))
        .subcommand(Command::new("snapshot").about("Capture or list workspace snapshots"))
        .subcommand(Command::new("completions").about("Generate shell completions"))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("meta.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
