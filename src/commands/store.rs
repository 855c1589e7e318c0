// src/commands/store.rs

//! `meta store`, `meta cache`, `meta gc`

use anyhow::{bail, Result};
use std::path::Path;

use crate::cli::{CacheCommands, StoreCommands};
use meta::store::{run_gc, Cache, Store, StoreInputs};
use meta::Context;

pub fn cmd_store(ctx: &Context, command: StoreCommands) -> Result<()> {
    let store = Store::open(ctx.workspace.store_dir())?;

    match command {
        StoreCommands::List => {
            let entries = store.list()?;
            if entries.is_empty() {
                println!("store is empty");
                return Ok(());
            }
            for entry in entries {
                println!(
                    "  {} {:<20} {} ({})",
                    &entry.hash[..12],
                    entry.component,
                    entry.version.as_deref().unwrap_or("-"),
                    entry.created_at
                );
            }
        }

        StoreCommands::Query { hash } => match store.query(&hash)? {
            Some(metadata) => {
                println!("hash: {}", metadata.hash);
                println!("tree: {}", metadata.tree_hash);
                println!("component: {}", metadata.component);
                println!("version: {}", metadata.version.as_deref().unwrap_or("-"));
                println!("inputs: {}", metadata.inputs_digest);
                println!("created: {}", metadata.created_at);
                for reference in &metadata.references {
                    println!("reference: {reference}");
                }
            }
            None => bail!("store entry '{hash}' not found"),
        },

        StoreCommands::Get { hash, target } => {
            store.get(&hash, Path::new(&target))?;
            println!("restored {hash} to {target}");
        }

        StoreCommands::Add { path, component, version } => {
            let inputs = StoreInputs {
                inputs_digest: format!(
                    "{component}|{}|",
                    version.as_deref().unwrap_or("")
                ),
                component,
                version,
                references: Vec::new(),
            };
            let hash = store.add(Path::new(&path), &inputs)?;
            println!("{hash}");
        }

        StoreCommands::Verify { hash } => {
            if store.verify(&hash)? {
                println!("{hash}: ok");
            } else {
                bail!("{hash}: content does not match its address");
            }
        }
    }
    Ok(())
}

pub fn cmd_cache(ctx: &Context, command: CacheCommands) -> Result<()> {
    let cache = Cache::open(ctx.workspace.cache_dir())?;

    match command {
        CacheCommands::Stats => {
            let stats = cache.stats()?;
            println!("entries: {}", stats.total_entries);
            for (component, count) in &stats.per_component {
                println!("  {component}: {count}");
            }
        }

        CacheCommands::List => {
            for entry in cache.entries()? {
                println!(
                    "  {} {:<20} -> {} ({})",
                    entry.key,
                    entry.component,
                    &entry.store_hash[..12.min(entry.store_hash.len())],
                    entry.created_at
                );
            }
        }

        CacheCommands::Invalidate { key, component } => match (key, component) {
            (Some(key), _) => {
                let removed = cache.invalidate(&key)?;
                println!("{}", if removed { "invalidated 1 entry" } else { "no such entry" });
            }
            (None, Some(component)) => {
                let removed = cache.invalidate_component(&component)?;
                println!("invalidated {removed} entry(ies) for {component}");
            }
            (None, None) => bail!("pass --key or --component"),
        },
    }
    Ok(())
}

pub fn cmd_gc(ctx: &Context, dry_run: bool, cache_ttl_days: i64) -> Result<()> {
    let store = Store::open(ctx.workspace.store_dir())?;
    let cache = Cache::open(ctx.workspace.cache_dir())?;

    let report = run_gc(ctx, &store, &cache, chrono::Duration::days(cache_ttl_days), dry_run)?;

    let verb = if dry_run { "would delete" } else { "deleted" };
    println!(
        "store: examined {}, {verb} {}, kept {}",
        report.store_examined,
        report.store_deleted.len(),
        report.store_kept
    );
    for hash in &report.store_deleted {
        println!("  {verb} {hash}");
    }
    println!("cache: removed {} entry(ies)", report.cache_removed);
    Ok(())
}
