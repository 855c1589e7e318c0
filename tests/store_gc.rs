// tests/store_gc.rs

//! Store immutability and garbage collection against real lock files.

mod common;

use std::fs;

use common::{workspace, ComponentSpec};

use chrono::Utc;
use meta::hash::{combine_digests, hash_tree};
use meta::lockfile::{self, LockFile, LockedComponent};
use meta::manifest::{ComponentType, WorkspaceMode};
use meta::store::{run_gc, Cache, Store, StoreInputs};

fn seed_tree(root: &std::path::Path, name: &str, content: &str) -> std::path::PathBuf {
    let tree = root.join(format!("seed-{name}"));
    fs::create_dir_all(&tree).unwrap();
    fs::write(tree.join("artifact.txt"), content).unwrap();
    tree
}

fn inputs(component: &str, version: &str) -> StoreInputs {
    StoreInputs {
        component: component.to_string(),
        version: Some(version.to_string()),
        inputs_digest: format!("{component}|{version}|"),
        references: Vec::new(),
    }
}

fn locked(version: &str) -> LockedComponent {
    LockedComponent {
        version: version.to_string(),
        commit: None,
        repo: "r".to_string(),
        kind: ComponentType::Generic,
        build_target: None,
        depends_on: Vec::new(),
        vendored_at: Some(Utc::now()),
    }
}

#[test]
fn store_round_trip_preserves_content_addressing() {
    let ws = workspace("vendored", &[]);
    let store = Store::open(ws.ctx.workspace.store_dir()).unwrap();

    let tree = seed_tree(ws.root(), "api", "payload v1");
    let hash = store.add(&tree, &inputs("api", "v1.0.0")).unwrap();

    // Restore and recompute: the address is a pure function of content
    // plus the declared inputs
    let target = ws.root().join("restored");
    store.get(&hash, &target).unwrap();

    let metadata = store.query(&hash).unwrap().unwrap();
    let restored_tree_hash = hash_tree(&target).unwrap();
    assert_eq!(restored_tree_hash, metadata.tree_hash);
    assert_eq!(combine_digests(&restored_tree_hash, &metadata.inputs_digest), hash);
    assert!(store.verify(&hash).unwrap());
}

#[test]
fn gc_preserves_lock_referenced_entries() {
    let ws = workspace(
        "vendored",
        &[
            // Manifest entries keep the lock valid; repos never touched here
            ComponentSpec::new("api", std::path::Path::new("api.git"), "v1.0.0"),
            ComponentSpec::new("core", std::path::Path::new("core.git"), "v1.0.0"),
        ],
    );
    let store = Store::open(ws.ctx.workspace.store_dir()).unwrap();
    let cache = Cache::open(ws.ctx.workspace.cache_dir()).unwrap();

    let kept_api = store
        .add(&seed_tree(ws.root(), "api", "api"), &inputs("api", "v1.0.0"))
        .unwrap();
    let kept_core = store
        .add(&seed_tree(ws.root(), "core", "core"), &inputs("core", "v1.0.0"))
        .unwrap();
    let orphan = store
        .add(&seed_tree(ws.root(), "old", "old"), &inputs("old", "v0.1.0"))
        .unwrap();

    let lock = LockFile {
        generated_at: Utc::now(),
        environment: "dev".to_string(),
        mode: WorkspaceMode::Vendored,
        promoted_from: None,
        promoted_at: None,
        components: [
            ("api".to_string(), locked("v1.0.0")),
            ("core".to_string(), locked("v1.0.0")),
        ]
        .into_iter()
        .collect(),
    };
    lockfile::write(&ws.ctx, &lock).unwrap();

    let report = run_gc(&ws.ctx, &store, &cache, chrono::Duration::days(30), false).unwrap();

    assert_eq!(report.store_examined, 3);
    assert_eq!(report.store_deleted, vec![orphan.clone()]);
    assert!(store.exists(&kept_api));
    assert!(store.exists(&kept_core));
    assert!(!store.exists(&orphan));

    // A deleted hash is not-found afterwards
    let err = store.get(&orphan, &ws.root().join("x")).unwrap_err();
    match err {
        meta::Error::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
        other => panic!("expected not-found, got {other:?}"),
    }
}

#[test]
fn gc_dry_run_only_reports() {
    let ws = workspace("vendored", &[]);
    let store = Store::open(ws.ctx.workspace.store_dir()).unwrap();
    let cache = Cache::open(ws.ctx.workspace.cache_dir()).unwrap();

    let orphan = store
        .add(&seed_tree(ws.root(), "x", "x"), &inputs("x", "v1.0.0"))
        .unwrap();

    let report = run_gc(&ws.ctx, &store, &cache, chrono::Duration::days(30), true).unwrap();
    assert_eq!(report.store_deleted, vec![orphan.clone()]);
    assert!(store.exists(&orphan));
}
