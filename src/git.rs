// src/git.rs

//! Git driver: clone, fetch, checkout, ref resolution, commit, tag, revert
//!
//! Every network operation runs under bounded exponential-backoff retry
//! (initial delay 1s, factor 2, max 5 attempts, jitter). Failures are
//! classified from git's stderr: transient classes (timeouts, resets, 5xx)
//! are retried, permanent classes (auth, unknown ref) fail immediately.
//!
//! The driver reads no git configuration beyond what the host shell
//! provides.

use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cancel::CancelFlag;
use crate::error::{Error, GitErrorKind, Result};
use crate::subprocess::{self, CommandSpec};

/// Stderr fragments that indicate a retryable failure
const TRANSIENT_MARKERS: [&str; 9] = [
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
    "could not resolve host",
    "early eof",
    "the remote end hung up",
    "http 5",
    "rate limit",
];

/// Stderr fragments that indicate retrying is pointless
const PERMANENT_MARKERS: [&str; 7] = [
    "authentication failed",
    "permission denied",
    "repository not found",
    "could not read from remote repository",
    "couldn't find remote ref",
    "unknown revision",
    "not a git repository",
];

/// Bounded exponential backoff for network operations
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, initial_delay: Duration::from_secs(1), factor: 2 }
    }
}

impl RetryPolicy {
    /// Single attempt, for tests and local-only operations
    pub fn none() -> Self {
        Self { max_attempts: 1, initial_delay: Duration::ZERO, factor: 1 }
    }

    /// Delay before attempt `n` (1-based), with jitter
    fn delay_before(&self, attempt: u32) -> Duration {
        let base = self.initial_delay * self.factor.saturating_pow(attempt.saturating_sub(1));
        // Jitter up to 250ms, derived from the clock instead of a PRNG
        let jitter_ms = u64::from(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.subsec_nanos())
                .unwrap_or(0),
        ) % 250;
        base + Duration::from_millis(jitter_ms)
    }

    /// Run `op` until it succeeds, a permanent error appears, or attempts
    /// are exhausted
    pub fn run<T>(
        &self,
        operation: &str,
        cancel: &CancelFlag,
        mut op: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            cancel.check()?;
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_before(attempt);
                    warn!(
                        "{operation} failed (attempt {attempt}/{}), retrying in {:?}: {err}",
                        self.max_attempts, delay
                    );
                    std::thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Pick the commit sha out of ls-remote output.
///
/// Annotated tags list both the tag object and a peeled `^{}` line; the
/// peeled line is the commit and wins.
fn pick_remote_sha(output: &str) -> Option<String> {
    let mut plain = None;
    for line in output.lines() {
        let mut fields = line.split_whitespace();
        let (Some(sha), Some(name)) = (fields.next(), fields.next()) else { continue };
        if name.ends_with("^{}") {
            return Some(sha.to_string());
        }
        if plain.is_none() {
            plain = Some(sha.to_string());
        }
    }
    plain
}

/// Classify a git failure from its stderr
fn classify(stderr: &str) -> GitErrorKind {
    let lower = stderr.to_lowercase();
    if PERMANENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return GitErrorKind::Permanent;
    }
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return GitErrorKind::Transient;
    }
    // Unrecognized failures are permanent; retrying blind helps nobody
    GitErrorKind::Permanent
}

/// Git subprocess driver
#[derive(Debug, Clone)]
pub struct GitDriver {
    retry: RetryPolicy,
    cancel: CancelFlag,
    timeout: Duration,
}

impl GitDriver {
    pub fn new(cancel: CancelFlag) -> Self {
        Self { retry: RetryPolicy::default(), cancel, timeout: Duration::from_secs(600) }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn available() -> bool {
        subprocess::available("git")
    }

    fn git(&self, operation: &str, dir: Option<&Path>, args: &[&str]) -> Result<String> {
        let mut full_args: Vec<&str> = Vec::new();
        if let Some(dir) = dir {
            full_args.push("-C");
            full_args.push(dir.to_str().unwrap_or("."));
        }
        full_args.extend_from_slice(args);

        let spec = CommandSpec::new("git", &full_args).timeout(self.timeout);
        let output = subprocess::run(&spec, &self.cancel)?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(Error::Git {
                kind: classify(&output.stderr),
                operation: operation.to_string(),
                message: output.combined().trim().to_string(),
            })
        }
    }

    /// Clone `repo` into `target`
    pub fn clone(&self, repo: &str, target: &Path) -> Result<()> {
        self.retry.run("clone", &self.cancel, || {
            if target.exists() && target.join(".git").exists() {
                debug!("{} already cloned", target.display());
                return Ok(());
            }
            self.git("clone", None, &["clone", repo, &target.to_string_lossy()])?;
            Ok(())
        })
    }

    /// Fetch all refs in an existing working tree
    pub fn fetch(&self, dir: &Path) -> Result<()> {
        self.retry.run("fetch", &self.cancel, || {
            self.git("fetch", Some(dir), &["fetch", "--tags", "origin"])?;
            Ok(())
        })
    }

    /// Check out a ref in an existing working tree
    pub fn checkout(&self, dir: &Path, reference: &str) -> Result<()> {
        self.git("checkout", Some(dir), &["checkout", "--quiet", reference])?;
        Ok(())
    }

    /// Resolve a ref to a full sha inside a working tree
    pub fn resolve_sha(&self, dir: &Path, reference: &str) -> Result<String> {
        let output = self.git("rev-parse", Some(dir), &["rev-parse", "--verify", &format!("{reference}^{{commit}}")])?;
        Ok(output.trim().to_string())
    }

    /// Resolve a ref to a sha against a remote, without a local clone.
    ///
    /// Tries the ref as given, then as a branch, then as a tag, matching
    /// how pins are written in manifests.
    pub fn resolve_remote_sha(&self, repo: &str, reference: &str) -> Result<String> {
        self.retry.run("ls-remote", &self.cancel, || {
            for candidate in [
                reference.to_string(),
                format!("refs/heads/{reference}"),
                format!("refs/tags/{reference}"),
            ] {
                let output = self.git("ls-remote", None, &["ls-remote", repo, &candidate])?;
                if let Some(sha) = pick_remote_sha(&output) {
                    return Ok(sha);
                }
            }
            Err(Error::Git {
                kind: GitErrorKind::Permanent,
                operation: "ls-remote".to_string(),
                message: format!("ref '{reference}' not found in {repo}"),
            })
        })
    }

    /// Current HEAD sha of a working tree
    pub fn commit_sha(&self, dir: &Path) -> Result<String> {
        let output = self.git("rev-parse", Some(dir), &["rev-parse", "HEAD"])?;
        Ok(output.trim().to_string())
    }

    /// Current branch name, if HEAD is on one
    pub fn current_branch(&self, dir: &Path) -> Result<Option<String>> {
        let output =
            self.git("rev-parse", Some(dir), &["rev-parse", "--abbrev-ref", "HEAD"])?;
        let branch = output.trim();
        if branch.is_empty() || branch == "HEAD" {
            Ok(None)
        } else {
            Ok(Some(branch.to_string()))
        }
    }

    /// Stage `files` (all tracked changes when empty) and commit
    pub fn commit(&self, dir: &Path, message: &str, files: &[&str]) -> Result<String> {
        if files.is_empty() {
            self.git("add", Some(dir), &["add", "-A"])?;
        } else {
            let mut args = vec!["add", "--"];
            args.extend_from_slice(files);
            self.git("add", Some(dir), &args)?;
        }
        self.git("commit", Some(dir), &["commit", "--quiet", "-m", message])?;
        self.commit_sha(dir)
    }

    /// Create an annotated tag
    pub fn tag(&self, dir: &Path, name: &str, message: &str) -> Result<()> {
        self.git("tag", Some(dir), &["tag", "-a", name, "-m", message])?;
        Ok(())
    }

    /// Revert a commit, producing a new revert commit
    pub fn revert(&self, dir: &Path, sha: &str) -> Result<String> {
        self.git("revert", Some(dir), &["revert", "--no-edit", sha])?;
        self.commit_sha(dir)
    }

    /// Rewrite the message of the commit at HEAD
    pub fn amend_message(&self, dir: &Path, message: &str) -> Result<String> {
        self.git("commit", Some(dir), &["commit", "--amend", "--quiet", "-m", message])?;
        self.commit_sha(dir)
    }

    /// Latest commit message in a working tree
    pub fn head_message(&self, dir: &Path) -> Result<String> {
        let output = self.git("log", Some(dir), &["log", "-1", "--format=%B"])?;
        Ok(output.trim().to_string())
    }

    /// Whether the working tree has uncommitted changes
    pub fn is_dirty(&self, dir: &Path) -> Result<bool> {
        let output = self.git("status", Some(dir), &["status", "--porcelain"])?;
        Ok(!output.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_remote_sha_prefers_peeled() {
        let annotated = "aaaa000000000000000000000000000000000000\trefs/tags/v1.0.0\n\
                         bbbb000000000000000000000000000000000000\trefs/tags/v1.0.0^{}\n";
        assert_eq!(
            pick_remote_sha(annotated).as_deref(),
            Some("bbbb000000000000000000000000000000000000")
        );

        let lightweight = "cccc000000000000000000000000000000000000\trefs/heads/main\n";
        assert_eq!(
            pick_remote_sha(lightweight).as_deref(),
            Some("cccc000000000000000000000000000000000000")
        );

        assert!(pick_remote_sha("").is_none());
    }

    #[test]
    fn test_classify_transient() {
        assert_eq!(
            classify("fatal: unable to access 'x': Connection reset by peer"),
            GitErrorKind::Transient
        );
        assert_eq!(classify("error: RPC failed; HTTP 503"), GitErrorKind::Transient);
        assert_eq!(
            classify("fatal: unable to access: Could not resolve host: github.com"),
            GitErrorKind::Transient
        );
    }

    #[test]
    fn test_classify_permanent() {
        assert_eq!(classify("fatal: Authentication failed for 'x'"), GitErrorKind::Permanent);
        assert_eq!(
            classify("fatal: couldn't find remote ref refs/heads/nope"),
            GitErrorKind::Permanent
        );
        assert_eq!(classify("fatal: unrecognized gibberish"), GitErrorKind::Permanent);
    }

    #[test]
    fn test_retry_stops_on_permanent() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            factor: 1,
        };
        let mut calls = 0;
        let result: Result<()> = policy.run("op", &CancelFlag::new(), || {
            calls += 1;
            Err(Error::Git {
                kind: GitErrorKind::Permanent,
                operation: "op".to_string(),
                message: "auth".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_retry_exhausts_on_transient() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            factor: 1,
        };
        let mut calls = 0;
        let result: Result<()> = policy.run("op", &CancelFlag::new(), || {
            calls += 1;
            Err(Error::Git {
                kind: GitErrorKind::Transient,
                operation: "op".to_string(),
                message: "timeout".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_retry_succeeds_midway() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            factor: 1,
        };
        let mut calls = 0;
        let result = policy.run("op", &CancelFlag::new(), || {
            calls += 1;
            if calls < 3 {
                Err(Error::Git {
                    kind: GitErrorKind::Transient,
                    operation: "op".to_string(),
                    message: "reset".to_string(),
                })
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_retry_observes_cancellation() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result: Result<()> = RetryPolicy::default().run("op", &cancel, || Ok(()));
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
