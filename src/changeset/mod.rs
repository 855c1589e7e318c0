// src/changeset/mod.rs

//! Changeset log: atomic grouping of commits across component repos
//!
//! Changesets live under `.meta/changesets/<id>.yaml` with an `index.yaml`
//! listing every id and pointing at the single in-progress changeset. The
//! index is the mutex: creating a second in-progress changeset fails with
//! `WorkspaceBusy`.
//!
//! State machine:
//!
//! ```text
//! in-progress --finalize--> committed --rollback--> rolled-back
//!      |
//!      +--fail--> failed
//! ```

mod bisect;

pub use bisect::{bisect, BisectOutcome};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::Context;
use crate::error::{Error, Result};
use crate::fsutil::atomic_write;
use crate::git::GitDriver;
use crate::manifest::Manifest;
use crate::resolver::DependencyGraph;

/// Lifecycle state of a changeset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangesetStatus {
    InProgress,
    Committed,
    Failed,
    RolledBack,
}

impl fmt::Display for ChangesetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in-progress"),
            Self::Committed => write!(f, "committed"),
            Self::Failed => write!(f, "failed"),
            Self::RolledBack => write!(f, "rolled-back"),
        }
    }
}

/// One recorded commit inside a changeset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoCommit {
    /// Component name
    pub name: String,
    pub repo: String,
    pub commit: String,
    pub branch: String,
    pub message: String,
}

/// A logical transaction across repositories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Changeset {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub description: String,
    pub status: ChangesetStatus,
    #[serde(default)]
    pub repos: Vec<RepoCommit>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Changeset {
    /// Commit-message trailer carrying the changeset id
    pub fn trailer(&self) -> String {
        format!("[changeset:{}]", self.id)
    }
}

/// Extract a changeset id from a commit message trailer
pub fn extract_changeset_id(message: &str) -> Option<String> {
    let regex = regex::Regex::new(r"(?i)\[changeset:([a-f0-9-]+)\]").ok()?;
    regex.captures(message).map(|c| c[1].to_string())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    #[serde(default)]
    changesets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current: Option<String>,
}

/// The on-disk changeset log
#[derive(Debug, Clone)]
pub struct ChangesetLog {
    dir: PathBuf,
}

impl ChangesetLog {
    pub fn open(ctx: &Context) -> Result<Self> {
        let dir = ctx.workspace.changesets_dir();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("index.yaml")
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.yaml"))
    }

    fn read_index(&self) -> Result<Index> {
        match fs::read_to_string(self.index_path()) {
            Ok(content) => Ok(serde_yaml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Index::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_index(&self, index: &Index) -> Result<()> {
        atomic_write(&self.index_path(), serde_yaml::to_string(index)?.as_bytes())
    }

    /// Open a new changeset. Fails while another is in progress.
    pub fn create(&self, description: &str, author: Option<&str>) -> Result<Changeset> {
        let mut index = self.read_index()?;
        if let Some(current) = &index.current {
            return Err(Error::WorkspaceBusy(format!(
                "changeset '{current}' is already in progress"
            )));
        }

        let id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let changeset = Changeset {
            id: id.clone(),
            timestamp: Utc::now(),
            author: author.unwrap_or("unknown").to_string(),
            description: description.to_string(),
            status: ChangesetStatus::InProgress,
            repos: Vec::new(),
            metadata: BTreeMap::new(),
        };

        self.save(&changeset)?;
        index.changesets.push(id.clone());
        index.current = Some(id.clone());
        self.write_index(&index)?;

        info!("created changeset {id}");
        Ok(changeset)
    }

    pub fn save(&self, changeset: &Changeset) -> Result<()> {
        atomic_write(
            &self.record_path(&changeset.id),
            serde_yaml::to_string(changeset)?.as_bytes(),
        )
    }

    pub fn load(&self, id: &str) -> Result<Changeset> {
        let content = fs::read_to_string(self.record_path(id)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Manifest(format!("changeset '{id}' not found"))
            } else {
                e.into()
            }
        })?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Newest first; optionally filtered by status
    pub fn list(&self, status: Option<ChangesetStatus>) -> Result<Vec<Changeset>> {
        let index = self.read_index()?;
        let mut changesets = Vec::new();
        for id in index.changesets.iter().rev() {
            match self.load(id) {
                Ok(changeset) => {
                    if status.is_none() || status == Some(changeset.status) {
                        changesets.push(changeset);
                    }
                }
                Err(e) => warn!("skipping unreadable changeset {id}: {e}"),
            }
        }
        Ok(changesets)
    }

    /// The single in-progress changeset, if any
    pub fn current(&self) -> Result<Option<Changeset>> {
        match self.read_index()?.current {
            Some(id) => Ok(Some(self.load(&id)?)),
            None => Ok(None),
        }
    }

    /// Attach a commit record to an in-progress changeset
    pub fn record_commit(&self, id: &str, commit: RepoCommit) -> Result<Changeset> {
        let mut changeset = self.load(id)?;
        if changeset.status != ChangesetStatus::InProgress {
            return Err(Error::Manifest(format!(
                "changeset '{id}' is {}, not in-progress",
                changeset.status
            )));
        }
        changeset.repos.push(commit);
        self.save(&changeset)?;
        Ok(changeset)
    }

    fn transition(&self, id: &str, from: ChangesetStatus, to: ChangesetStatus) -> Result<Changeset> {
        let mut changeset = self.load(id)?;
        if changeset.status != from {
            return Err(Error::Manifest(format!(
                "changeset '{id}' is {}, expected {from}",
                changeset.status
            )));
        }
        changeset.status = to;
        self.save(&changeset)?;

        // Leaving in-progress releases the index mutex
        if from == ChangesetStatus::InProgress {
            let mut index = self.read_index()?;
            if index.current.as_deref() == Some(id) {
                index.current = None;
                self.write_index(&index)?;
            }
        }
        Ok(changeset)
    }

    /// in-progress -> committed
    pub fn finalize(&self, id: &str) -> Result<Changeset> {
        let changeset = self.transition(id, ChangesetStatus::InProgress, ChangesetStatus::Committed)?;
        info!("finalized changeset {id} ({} commits)", changeset.repos.len());
        Ok(changeset)
    }

    /// in-progress -> failed
    pub fn mark_failed(&self, id: &str) -> Result<Changeset> {
        self.transition(id, ChangesetStatus::InProgress, ChangesetStatus::Failed)
    }

    /// Revert every recorded commit in reverse dependency order.
    ///
    /// Each recorded commit gets one revert commit in its repo, carrying the
    /// changeset trailer. A failed revert marks the changeset `failed` and
    /// stops; successful reverts are left in place for the user to judge.
    pub fn rollback(
        &self,
        ctx: &Context,
        manifest: &Manifest,
        git: &GitDriver,
        id: &str,
    ) -> Result<Changeset> {
        let changeset = self.load(id)?;
        if changeset.status != ChangesetStatus::Committed {
            return Err(Error::Manifest(format!(
                "changeset '{id}' is {}, only committed changesets roll back",
                changeset.status
            )));
        }

        let ordered = rollback_order(manifest, &changeset)?;
        for recorded in &ordered {
            ctx.cancel.check()?;
            let dir = ctx.workspace.component_dir(&recorded.name);
            info!("reverting {} in {}", &recorded.commit[..recorded.commit.len().min(8)], recorded.name);

            let reverted = git.revert(&dir, &recorded.commit).and_then(|_| {
                // Stamp the revert with the changeset trailer
                git.amend_message(
                    &dir,
                    &format!(
                        "Revert {} {}",
                        &recorded.commit[..recorded.commit.len().min(8)],
                        changeset.trailer()
                    ),
                )
            });

            if let Err(e) = reverted {
                warn!("revert failed in {}: {e}", recorded.name);
                let mut failed = self.load(id)?;
                failed.status = ChangesetStatus::Failed;
                self.save(&failed)?;
                return Err(e);
            }
        }

        let mut done = self.load(id)?;
        done.status = ChangesetStatus::RolledBack;
        self.save(&done)?;
        info!("rolled back changeset {id}");
        Ok(done)
    }

    /// Committed changesets in index order, restricted to (start, end]
    pub fn committed_between(&self, start: &str, end: &str) -> Result<Vec<Changeset>> {
        let index = self.read_index()?;
        let position = |id: &str| {
            index.changesets.iter().position(|c| c == id).ok_or_else(|| {
                Error::Manifest(format!("changeset '{id}' not found"))
            })
        };
        let from = position(start)?;
        let to = position(end)?;
        if from > to {
            return Err(Error::Manifest(format!(
                "changeset '{start}' is newer than '{end}'"
            )));
        }

        let mut committed = Vec::new();
        for id in &index.changesets[from + 1..=to] {
            let changeset = self.load(id)?;
            if changeset.status == ChangesetStatus::Committed {
                committed.push(changeset);
            }
        }
        Ok(committed)
    }
}

/// Recorded commits in reverse dependency order (dependents reverted first)
fn rollback_order(manifest: &Manifest, changeset: &Changeset) -> Result<Vec<RepoCommit>> {
    let graph = DependencyGraph::from_manifest(manifest);
    let mut order = graph.topo_order()?;
    order.reverse();

    let mut ordered: Vec<RepoCommit> = Vec::new();
    for name in &order {
        for recorded in changeset.repos.iter().filter(|r| &r.name == name) {
            ordered.push(recorded.clone());
        }
    }
    // Commits in repos outside the manifest graph go last, as recorded
    for recorded in &changeset.repos {
        if !order.contains(&recorded.name) {
            ordered.push(recorded.clone());
        }
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::workspace::Workspace;

    fn log_fixture() -> (tempfile::TempDir, Context, ChangesetLog) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("manifests")).unwrap();
        fs::write(dir.path().join("manifests/components.yaml"), "components: {}\n").unwrap();
        let ctx = Context::new(Workspace::at(dir.path(), "manifests"), Config::default());
        let log = ChangesetLog::open(&ctx).unwrap();
        (dir, ctx, log)
    }

    fn commit_record(name: &str) -> RepoCommit {
        RepoCommit {
            name: name.to_string(),
            repo: format!("https://example.com/{name}.git"),
            commit: "c".repeat(40),
            branch: "main".to_string(),
            message: "change".to_string(),
        }
    }

    #[test]
    fn test_create_and_load() {
        let (_dir, _ctx, log) = log_fixture();
        let changeset = log.create("ship feature", Some("dev@example.com")).unwrap();

        let loaded = log.load(&changeset.id).unwrap();
        assert_eq!(loaded.description, "ship feature");
        assert_eq!(loaded.status, ChangesetStatus::InProgress);
        assert_eq!(loaded.author, "dev@example.com");
        assert_eq!(changeset.id.len(), 8);
    }

    #[test]
    fn test_single_in_progress_enforced() {
        let (_dir, _ctx, log) = log_fixture();
        let first = log.create("first", None).unwrap();

        let second = log.create("second", None);
        assert!(matches!(second, Err(Error::WorkspaceBusy(_))));

        // Finalizing releases the mutex
        log.finalize(&first.id).unwrap();
        assert!(log.create("second", None).is_ok());
    }

    #[test]
    fn test_record_commit_and_finalize() {
        let (_dir, _ctx, log) = log_fixture();
        let changeset = log.create("multi-repo change", None).unwrap();

        log.record_commit(&changeset.id, commit_record("api")).unwrap();
        log.record_commit(&changeset.id, commit_record("core")).unwrap();

        let finalized = log.finalize(&changeset.id).unwrap();
        assert_eq!(finalized.status, ChangesetStatus::Committed);
        assert_eq!(finalized.repos.len(), 2);

        // Committed changesets accept no more commits
        assert!(log.record_commit(&changeset.id, commit_record("web")).is_err());
    }

    #[test]
    fn test_current_pointer() {
        let (_dir, _ctx, log) = log_fixture();
        assert!(log.current().unwrap().is_none());

        let changeset = log.create("wip", None).unwrap();
        assert_eq!(log.current().unwrap().unwrap().id, changeset.id);

        log.mark_failed(&changeset.id).unwrap();
        assert!(log.current().unwrap().is_none());
    }

    #[test]
    fn test_list_filters_and_orders() {
        let (_dir, _ctx, log) = log_fixture();
        let a = log.create("a", None).unwrap();
        log.finalize(&a.id).unwrap();
        let b = log.create("b", None).unwrap();
        log.mark_failed(&b.id).unwrap();
        let c = log.create("c", None).unwrap();
        log.finalize(&c.id).unwrap();

        let all = log.list(None).unwrap();
        assert_eq!(all.len(), 3);
        // Most recent first
        assert_eq!(all[0].id, c.id);

        let committed = log.list(Some(ChangesetStatus::Committed)).unwrap();
        assert_eq!(committed.len(), 2);
    }

    #[test]
    fn test_invalid_transitions() {
        let (_dir, _ctx, log) = log_fixture();
        let changeset = log.create("x", None).unwrap();
        log.finalize(&changeset.id).unwrap();

        assert!(log.finalize(&changeset.id).is_err());
        assert!(log.mark_failed(&changeset.id).is_err());
    }

    #[test]
    fn test_trailer_extraction() {
        let (_dir, _ctx, log) = log_fixture();
        let changeset = log.create("x", None).unwrap();

        let message = format!("Fix parser\n\n{}", changeset.trailer());
        assert_eq!(extract_changeset_id(&message), Some(changeset.id.clone()));
        assert_eq!(extract_changeset_id("no trailer here"), None);
    }

    #[test]
    fn test_committed_between() {
        let (_dir, _ctx, log) = log_fixture();
        let mut ids = Vec::new();
        for i in 0..4 {
            let changeset = log.create(&format!("change {i}"), None).unwrap();
            log.finalize(&changeset.id).unwrap();
            ids.push(changeset.id);
        }

        let window = log.committed_between(&ids[0], &ids[2]).unwrap();
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].id, ids[1]);
        assert_eq!(window[1].id, ids[2]);

        assert!(log.committed_between(&ids[2], &ids[0]).is_err());
        assert!(log.committed_between("nope", &ids[0]).is_err());
    }
}
