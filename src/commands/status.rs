// src/commands/status.rs

//! `meta status` - desired vs actual per component

use anyhow::Result;

use meta::git::GitDriver;
use meta::lockfile;
use meta::manifest::{Manifest, WorkspaceMode};
use meta::vendor::provenance::Provenance;
use meta::Context;

pub fn cmd_status(ctx: &Context, env: Option<&str>) -> Result<()> {
    let manifest = Manifest::load(&ctx.workspace)?;
    let env = ctx.env_or_default(env);
    let lock = lockfile::load(ctx, env).ok();
    let git = GitDriver::new(ctx.cancel.clone());

    println!("workspace mode: {}", manifest.mode);
    println!("environment: {env}");
    println!();
    println!("  {:<20} {:<24} {:<24} status", "component", "desired", "actual");

    let mut unhealthy = 0;
    for component in manifest.components.values() {
        let desired = match lock.as_ref().and_then(|l| l.components.get(&component.name)) {
            Some(locked) => match manifest.mode {
                WorkspaceMode::Reference => {
                    locked.commit.clone().unwrap_or_else(|| locked.version.clone())
                }
                WorkspaceMode::Vendored => locked.version.clone(),
            },
            None => manifest.pin_for(&component.name, env)?,
        };

        let dir = ctx.workspace.component_dir(&component.name);
        let actual = if dir.join(".git").exists() {
            git.commit_sha(&dir).unwrap_or_else(|_| "unreadable".to_string())
        } else if let Some(record) = Provenance::read(&dir)? {
            record.version
        } else if dir.exists() {
            "untracked".to_string()
        } else {
            "-".to_string()
        };

        let marker = if actual == "-" {
            unhealthy += 1;
            "○"
        } else if identities_match(&desired, &actual) {
            "✓"
        } else {
            unhealthy += 1;
            "⚠"
        };

        println!(
            "  {:<20} {:<24} {:<24} {marker}",
            component.name,
            short(&desired),
            short(&actual)
        );
    }

    if unhealthy > 0 {
        println!();
        println!("{unhealthy} component(s) need attention; run 'meta apply --env {env}'");
    }
    Ok(())
}

fn identities_match(desired: &str, actual: &str) -> bool {
    if desired == actual {
        return true;
    }
    // A semver pin vs the same tag without prefix
    desired.strip_prefix('v') == Some(actual) || actual.strip_prefix('v') == Some(desired)
}

fn short(identity: &str) -> String {
    if identity.len() == 40 && identity.chars().all(|c| c.is_ascii_hexdigit()) {
        identity[..8].to_string()
    } else {
        identity.to_string()
    }
}
