// tests/common/mod.rs

//! Shared fixtures for integration tests.
//!
//! Builds throwaway workspaces and real local git upstreams so lock
//! resolution, clones, and checkouts exercise the actual drivers.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use meta::{Config, Context, Workspace};

/// A temp workspace with its invocation context.
/// Keep the TempDir alive to prevent cleanup.
pub struct TestWorkspace {
    pub dir: TempDir,
    pub ctx: Context,
}

impl TestWorkspace {
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn component_dir(&self, name: &str) -> PathBuf {
        self.ctx.workspace.component_dir(name)
    }
}

/// Run git in `dir`, panicking on failure (fixtures must not half-exist)
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .env("GIT_AUTHOR_NAME", "test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .expect("git not available");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Create an upstream repo with one commit per (tag, files) entry
pub fn init_upstream(parent: &Path, name: &str, versions: &[(&str, &[(&str, &str)])]) -> PathBuf {
    let repo = parent.join(name);
    fs::create_dir_all(&repo).unwrap();
    git(&repo, &["init", "--quiet", "-b", "main"]);
    git(&repo, &["config", "user.email", "test@example.com"]);
    git(&repo, &["config", "user.name", "test"]);

    for (tag, files) in versions {
        for (path, content) in *files {
            let file = repo.join(path);
            if let Some(parent) = file.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&file, content).unwrap();
        }
        git(&repo, &["add", "-A"]);
        git(&repo, &["commit", "--quiet", "-m", &format!("release {tag}")]);
        git(&repo, &["tag", "-a", tag, "-m", tag]);
    }
    repo
}

/// Current HEAD sha of a repo
pub fn head_sha(repo: &Path) -> String {
    git(repo, &["rev-parse", "HEAD"])
}

/// Sha a tag points at
pub fn tag_sha(repo: &Path, tag: &str) -> String {
    git(repo, &["rev-parse", &format!("{tag}^{{commit}}")])
}

/// One manifest component declaration
pub struct ComponentSpec {
    pub name: String,
    pub repo: String,
    pub version: String,
    pub kind: String,
    pub depends_on: Vec<String>,
}

impl ComponentSpec {
    pub fn new(name: &str, repo: &Path, version: &str) -> Self {
        Self {
            name: name.to_string(),
            repo: repo.to_string_lossy().into_owned(),
            version: version.to_string(),
            kind: "generic".to_string(),
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }
}

/// Build a workspace with the given mode and components
pub fn workspace(mode: &str, components: &[ComponentSpec]) -> TestWorkspace {
    let dir = TempDir::new().unwrap();
    let manifests = dir.path().join("manifests");
    fs::create_dir_all(&manifests).unwrap();

    let mut yaml = format!("meta:\n  mode: {mode}\ncomponents:\n");
    for component in components {
        yaml.push_str(&format!(
            "  {}:\n    repo: {}\n    version: {}\n    type: {}\n",
            component.name, component.repo, component.version, component.kind
        ));
        if !component.depends_on.is_empty() {
            yaml.push_str(&format!("    depends_on: [{}]\n", component.depends_on.join(", ")));
        }
    }
    fs::write(manifests.join("components.yaml"), yaml).unwrap();

    let config = Config { show_progress: false, ..Default::default() };
    let ctx = Context::new(Workspace::at(dir.path(), "manifests"), config);
    TestWorkspace { dir, ctx }
}

/// Write environments.yaml into a workspace
pub fn write_environments(ws: &TestWorkspace, yaml: &str) {
    fs::write(ws.root().join("manifests/environments.yaml"), yaml).unwrap();
}
