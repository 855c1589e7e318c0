// src/commands/lock.rs

//! `meta lock` - generate, validate, promote, compare

use anyhow::Result;

use meta::changeset::ChangesetLog;
use meta::git::GitDriver;
use meta::lockfile;
use meta::manifest::Manifest;
use meta::Context;

pub fn cmd_lock(
    ctx: &Context,
    env: Option<&str>,
    changeset: Option<&str>,
    validate_only: bool,
) -> Result<()> {
    let manifest = Manifest::load(&ctx.workspace)?;
    let env = ctx.env_or_default(env);

    if validate_only {
        let lock = lockfile::load(ctx, env)?;
        let discrepancies = lockfile::validate(ctx, &manifest, &lock)?;
        if discrepancies.is_empty() {
            println!("lock [{env}]: valid ({} components)", lock.components.len());
            return Ok(());
        }
        for discrepancy in &discrepancies {
            println!("  {discrepancy}");
        }
        return Err(meta::Error::LockMismatch {
            environment: env.to_string(),
            discrepancies: discrepancies.iter().map(|d| d.to_string()).collect(),
        }
        .into());
    }

    let git = GitDriver::new(ctx.cancel.clone());
    let lock = lockfile::generate(ctx, &manifest, env, &git)?;
    println!("locked {} component(s) for '{env}'", lock.components.len());
    for (name, locked) in &lock.components {
        match &locked.commit {
            Some(commit) => println!("  {name}: {} -> {}", locked.version, &commit[..8]),
            None => println!("  {name}: {}", locked.version),
        }
    }

    if let Some(id) = changeset {
        let log = ChangesetLog::open(ctx)?;
        let mut record = log.load(id)?;
        record
            .metadata
            .insert("lock".to_string(), format!("{env}@{}", lock.generated_at));
        log.save(&record)?;
        println!("recorded lock generation in changeset {id}");
    }
    Ok(())
}

pub fn cmd_lock_promote(ctx: &Context, src: &str, dst: &str) -> Result<()> {
    let manifest = Manifest::load(&ctx.workspace)?;
    let promoted = lockfile::promote(ctx, &manifest, src, dst)?;
    println!(
        "promoted {src} -> {dst} ({} components)",
        promoted.components.len()
    );
    Ok(())
}

pub fn cmd_lock_compare(ctx: &Context, left_env: &str, right_env: &str) -> Result<()> {
    let left = lockfile::load(ctx, left_env)?;
    let right = lockfile::load(ctx, right_env)?;
    let diff = lockfile::compare(&left, &right);

    if diff.is_empty() {
        println!("{left_env} and {right_env} are identical");
        return Ok(());
    }

    for name in &diff.only_in_left {
        println!("  {name}: only in {left_env}");
    }
    for name in &diff.only_in_right {
        println!("  {name}: only in {right_env}");
    }
    for (name, (from, to)) in &diff.version_diffs {
        println!("  {name}: {from} -> {to}");
    }
    for (name, (from, to)) in &diff.commit_diffs {
        println!(
            "  {name}: commit {} -> {}",
            &from[..8.min(from.len())],
            &to[..8.min(to.len())]
        );
    }
    Ok(())
}
