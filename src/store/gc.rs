// src/store/gc.rs

//! Mark-and-sweep garbage collection for the store and cache
//!
//! Roots: every lock file present, every snapshot, and every changeset in
//! status `in-progress` or `committed`. A store entry is live when a root
//! pins its (component, identity) pair, when a changeset records its hash,
//! or when a live entry references it. Everything else is removable.
//!
//! Safe against concurrent readers: candidates are first written to a
//! pending-delete list, the roots are collected again, and only entries
//! still unreferenced on the second pass are deleted.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fs;
use tracing::{debug, info};

use crate::changeset::{ChangesetLog, ChangesetStatus};
use crate::config::Context;
use crate::error::Result;
use crate::fsutil::atomic_write;
use crate::lockfile;
use crate::snapshot;

use super::{Cache, Store, StoreMetadata};

/// Default cache entry time-to-live
pub const DEFAULT_CACHE_TTL_DAYS: i64 = 30;

/// What a GC pass did
#[derive(Debug, Clone, Default)]
pub struct GcReport {
    pub store_examined: usize,
    pub store_deleted: Vec<String>,
    pub store_kept: usize,
    pub cache_removed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct PendingDelete {
    hashes: Vec<String>,
}

/// Identity pairs a root pins: (component, identity)
fn collect_roots(ctx: &Context) -> Result<(BTreeSet<(String, String)>, BTreeSet<String>)> {
    let mut pinned = BTreeSet::new();
    let mut hashes = BTreeSet::new();

    // Lock files
    for env in ctx.workspace.lock_envs()? {
        let lock = lockfile::load(ctx, &env)?;
        for (name, locked) in &lock.components {
            pinned.insert((name.clone(), locked.version.clone()));
            if let Some(commit) = &locked.commit {
                pinned.insert((name.clone(), commit.clone()));
            }
        }
    }

    // Snapshots
    for (_, snapshot) in snapshot::list(ctx)? {
        for (name, pin) in snapshot.pins {
            pinned.insert((name, pin));
        }
    }

    // Changesets in-progress or committed; store hashes ride in metadata
    let log = ChangesetLog::open(ctx)?;
    for changeset in log.list(None)? {
        if matches!(changeset.status, ChangesetStatus::InProgress | ChangesetStatus::Committed) {
            if let Some(recorded) = changeset.metadata.get("store_hashes") {
                for hash in recorded.split(',').filter(|h| !h.is_empty()) {
                    hashes.insert(hash.to_string());
                }
            }
        }
    }

    Ok((pinned, hashes))
}

fn mark_live(
    entries: &[StoreMetadata],
    pinned: &BTreeSet<(String, String)>,
    root_hashes: &BTreeSet<String>,
) -> BTreeSet<String> {
    let by_hash: HashMap<&str, &StoreMetadata> =
        entries.iter().map(|e| (e.hash.as_str(), e)).collect();

    let mut live = BTreeSet::new();
    let mut queue = VecDeque::new();

    for entry in entries {
        let directly_rooted = root_hashes.contains(&entry.hash)
            || entry.version.as_ref().is_some_and(|version| {
                pinned.contains(&(entry.component.clone(), version.clone()))
            });
        if directly_rooted && live.insert(entry.hash.clone()) {
            queue.push_back(entry.hash.clone());
        }
    }

    // References are store hashes of dependency entries
    while let Some(hash) = queue.pop_front() {
        if let Some(entry) = by_hash.get(hash.as_str()) {
            for reference in &entry.references {
                if by_hash.contains_key(reference.as_str()) && live.insert(reference.clone()) {
                    queue.push_back(reference.clone());
                }
            }
        }
    }

    live
}

/// One mark-and-sweep pass over store and cache
pub fn run_gc(
    ctx: &Context,
    store: &Store,
    cache: &Cache,
    cache_ttl: chrono::Duration,
    dry_run: bool,
) -> Result<GcReport> {
    let entries = store.list()?;
    let (pinned, root_hashes) = collect_roots(ctx)?;
    let live = mark_live(&entries, &pinned, &root_hashes);

    let candidates: Vec<String> = entries
        .iter()
        .filter(|e| !live.contains(&e.hash))
        .map(|e| e.hash.clone())
        .collect();

    let mut report = GcReport {
        store_examined: entries.len(),
        store_kept: live.len(),
        ..Default::default()
    };

    if dry_run {
        report.store_deleted = candidates;
        return Ok(report);
    }

    if !candidates.is_empty() {
        // Record intent, then re-verify against freshly collected roots so
        // an entry rooted between passes survives
        let pending_path = store.root().join("gc-pending.json");
        atomic_write(
            &pending_path,
            serde_json::to_vec_pretty(&PendingDelete { hashes: candidates.clone() })?.as_slice(),
        )?;

        let (pinned_again, hashes_again) = collect_roots(ctx)?;
        let live_again = mark_live(&entries, &pinned_again, &hashes_again);

        for hash in candidates {
            if live_again.contains(&hash) {
                debug!("{hash} became referenced during gc, keeping");
                report.store_kept += 1;
                continue;
            }
            store.remove(&hash)?;
            report.store_deleted.push(hash);
        }
        fs::remove_file(&pending_path)?;
    }

    report.cache_removed = cache.prune(store, cache_ttl)?;
    info!(
        "gc: examined {}, deleted {}, kept {}, cache entries removed {}",
        report.store_examined,
        report.store_deleted.len(),
        report.store_kept,
        report.cache_removed
    );
    Ok(report)
}
