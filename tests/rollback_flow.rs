// tests/rollback_flow.rs

//! Snapshot capture, pin-set changes, and rollback reversibility.

mod common;

use std::fs;

use common::{init_upstream, workspace, ComponentSpec};

use meta::apply::{self, ApplyOptions};
use meta::git::GitDriver;
use meta::manifest::{self, Manifest};
use meta::rollback::{self, RollbackTarget};
use meta::snapshot;
use meta::vendor::provenance::Provenance;

fn apply_options() -> ApplyOptions {
    ApplyOptions {
        env: Some("dev".to_string()),
        skip_packages: true,
        show_progress: false,
        ..Default::default()
    }
}

#[test]
fn snapshot_apply_rollback_restores_prior_pins() {
    let upstreams = tempfile::tempdir().unwrap();
    let repo = init_upstream(
        upstreams.path(),
        "core",
        &[
            ("v1.0.0", &[("lib.py", "version = 1\n")]),
            ("v1.1.0", &[("lib.py", "version = 2\n")]),
        ],
    );

    let ws = workspace("vendored", &[ComponentSpec::new("core", &repo, "v1.0.0")]);

    // Materialize at v1.0.0 and capture the state
    let summary = apply::run(&ws.ctx, &apply_options()).unwrap();
    assert!(summary.ok(), "{:?}", summary.reports);
    assert_eq!(
        Provenance::read(&ws.component_dir("core")).unwrap().unwrap().version,
        "v1.0.0"
    );

    let manifest = Manifest::load(&ws.ctx.workspace).unwrap();
    let git = GitDriver::new(ws.ctx.cancel.clone());
    let snapshot = snapshot::capture(&ws.ctx, &manifest, &git, Some("dev")).unwrap();
    snapshot::save(&ws.ctx, &snapshot, Some("before-bump")).unwrap();
    assert_eq!(snapshot.pins.get("core").map(String::as_str), Some("v1.0.0"));

    // Bump the pin and apply the change
    manifest::set_component_version(&ws.ctx.workspace.components_manifest(), "core", "v1.1.0")
        .unwrap();
    let summary = apply::run(&ws.ctx, &apply_options()).unwrap();
    assert!(summary.ok(), "{:?}", summary.reports);
    assert_eq!(
        fs::read_to_string(ws.component_dir("core").join("lib.py")).unwrap(),
        "version = 2\n"
    );

    // Roll back to the snapshot: state before the change
    let outcome = rollback::execute(
        &ws.ctx,
        &RollbackTarget::Snapshot { reference: "before-bump".to_string() },
        &apply_options(),
    )
    .unwrap()
    .expect("pin-map rollback produces a summary");
    assert!(outcome.ok(), "{:?}", outcome.reports);

    let record = Provenance::read(&ws.component_dir("core")).unwrap().unwrap();
    assert_eq!(record.version, "v1.0.0");
    assert_eq!(
        fs::read_to_string(ws.component_dir("core").join("lib.py")).unwrap(),
        "version = 1\n"
    );
}

#[test]
fn component_rollback_targets_one_component() {
    let upstreams = tempfile::tempdir().unwrap();
    let repo_a = init_upstream(
        upstreams.path(),
        "a",
        &[
            ("v1.0.0", &[("a.py", "a = 1\n")]),
            ("v2.0.0", &[("a.py", "a = 2\n")]),
        ],
    );
    let repo_b = init_upstream(upstreams.path(), "b", &[("v1.0.0", &[("b.py", "b = 1\n")])]);

    let ws = workspace(
        "vendored",
        &[
            ComponentSpec::new("a", &repo_a, "v2.0.0"),
            ComponentSpec::new("b", &repo_b, "v1.0.0"),
        ],
    );
    let summary = apply::run(&ws.ctx, &apply_options()).unwrap();
    assert!(summary.ok(), "{:?}", summary.reports);

    let outcome = rollback::execute(
        &ws.ctx,
        &RollbackTarget::Component { name: "a".to_string(), pin: "v1.0.0".to_string() },
        &apply_options(),
    )
    .unwrap()
    .expect("summary");
    assert!(outcome.ok());
    // Only the targeted component moved
    assert_eq!(outcome.reports.len(), 1);
    assert_eq!(
        Provenance::read(&ws.component_dir("a")).unwrap().unwrap().version,
        "v1.0.0"
    );
    assert_eq!(
        Provenance::read(&ws.component_dir("b")).unwrap().unwrap().version,
        "v1.0.0"
    );
}

#[test]
fn store_hash_rollback_restores_recorded_tree() {
    let upstreams = tempfile::tempdir().unwrap();
    let repo = init_upstream(upstreams.path(), "core", &[("v1.0.0", &[("lib.py", "x = 1\n")])]);

    let ws = workspace("vendored", &[ComponentSpec::new("core", &repo, "v1.0.0")]);
    let summary = apply::run(&ws.ctx, &apply_options()).unwrap();
    assert!(summary.ok());

    // The apply recorded a store entry tagged with the component
    let targets = rollback::list_targets(&ws.ctx).unwrap();
    let entry = targets
        .iter()
        .find(|t| t.kind == "store" && t.detail.starts_with("core@"))
        .expect("store entry for core");

    let outcome = rollback::execute(
        &ws.ctx,
        &RollbackTarget::StoreHash { hash: entry.reference.clone() },
        &apply_options(),
    )
    .unwrap()
    .expect("summary");
    assert!(outcome.ok(), "{:?}", outcome.reports);
    assert!(ws.component_dir("core").join("lib.py").exists());
}
