// src/error.rs

//! Error types for the meta workspace engine
//!
//! The error set is closed: engines only ever produce one of these kinds,
//! each carrying the offending component name(s) where one exists. The
//! command layer maps errors onto the process exit code via [`Error::exit_code`].

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of git failures for retry purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitErrorKind {
    /// Timeouts, connection resets, 5xx responses. Retried with backoff.
    Transient,
    /// Auth failures, unknown refs. Never retried.
    Permanent,
}

impl std::fmt::Display for GitErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// All failures the engines can produce
#[derive(Debug, Error)]
pub enum Error {
    /// Manifest failed to load or validate
    #[error("manifest error: {0}")]
    Manifest(String),

    /// A component references a dependency that cannot be satisfied
    #[error("dependency error for '{component}': {message}")]
    Dependency { component: String, message: String },

    /// The dependency graph contains a cycle
    #[error("circular dependency: {}", members.join(" -> "))]
    Cycle { members: Vec<String> },

    /// Version constraints cannot all be satisfied
    #[error("version conflict for '{component}': {}", constraints.join(", "))]
    Conflict {
        component: String,
        /// Each entry is "origin requires range"
        constraints: Vec<String>,
    },

    /// Lock file does not agree with the manifest
    #[error("lock mismatch for environment '{environment}': {}", discrepancies.join("; "))]
    LockMismatch {
        environment: String,
        discrepancies: Vec<String>,
    },

    /// A git operation failed
    #[error("git {operation} failed ({kind}): {message}")]
    Git {
        kind: GitErrorKind,
        operation: String,
        message: String,
    },

    /// Vendored-mode materialization or conversion failed
    #[error("vendor error for '{component}': {message}")]
    Vendor { component: String, message: String },

    /// The secret scanner found credential-like content
    #[error("secrets detected in '{component}': {} finding(s), first: {}", findings.len(), findings.first().map(String::as_str).unwrap_or("<none>"))]
    SecretDetected {
        component: String,
        /// "path:line: kind" per finding
        findings: Vec<String>,
    },

    /// A conversion could not be resumed from its checkpoint log
    #[error("cannot resume conversion: {0}")]
    CheckpointResume(String),

    /// Build cache lookup missed. Internal; never reaches the user as-is.
    #[error("cache miss for key {0}")]
    CacheMiss(String),

    /// Remote object-storage failure. Always recoverable: callers fall back
    /// to the local store and log the failure.
    #[error("remote backend error: {0}")]
    RemoteBackend(String),

    /// Another invocation holds the workspace, or a changeset is in progress
    #[error("workspace busy: {0}")]
    WorkspaceBusy(String),

    /// Cooperative cancellation was observed
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Process exit code for this error.
    ///
    /// 1 user error, 2 engine failure, 3 workspace busy, 4 cancelled.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Manifest(_)
            | Self::Dependency { .. }
            | Self::Cycle { .. }
            | Self::Conflict { .. }
            | Self::LockMismatch { .. } => 1,
            Self::Git { .. }
            | Self::Vendor { .. }
            | Self::SecretDetected { .. }
            | Self::CheckpointResume(_)
            | Self::CacheMiss(_)
            | Self::RemoteBackend(_)
            | Self::Io(_) => 2,
            Self::WorkspaceBusy(_) => 3,
            Self::Cancelled => 4,
        }
    }

    /// Short kind name for status output
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Manifest(_) => "ManifestError",
            Self::Dependency { .. } => "DependencyError",
            Self::Cycle { .. } => "CycleError",
            Self::Conflict { .. } => "ConflictError",
            Self::LockMismatch { .. } => "LockMismatch",
            Self::Git { kind: GitErrorKind::Transient, .. } => "GitError/Transient",
            Self::Git { kind: GitErrorKind::Permanent, .. } => "GitError/Permanent",
            Self::Vendor { .. } => "VendorError",
            Self::SecretDetected { .. } => "SecretDetected",
            Self::CheckpointResume(_) => "CheckpointResumeError",
            Self::CacheMiss(_) => "CacheMiss",
            Self::RemoteBackend(_) => "RemoteBackendError",
            Self::WorkspaceBusy(_) => "WorkspaceBusy",
            Self::Cancelled => "Cancelled",
            Self::Io(_) => "IoError",
        }
    }

    /// Whether a local retry is worthwhile
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Git { kind: GitErrorKind::Transient, .. } | Self::RemoteBackend(_)
        )
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Manifest(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Io(std::io::Error::other(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::Manifest("bad".into()).exit_code(), 1);
        assert_eq!(
            Error::Cycle { members: vec!["a".into(), "b".into(), "a".into()] }.exit_code(),
            1
        );
        assert_eq!(
            Error::Vendor { component: "api".into(), message: "copy failed".into() }.exit_code(),
            2
        );
        assert_eq!(Error::WorkspaceBusy("apply in progress".into()).exit_code(), 3);
        assert_eq!(Error::Cancelled.exit_code(), 4);
    }

    #[test]
    fn test_retry_classification() {
        let transient = Error::Git {
            kind: GitErrorKind::Transient,
            operation: "fetch".into(),
            message: "connection reset".into(),
        };
        let permanent = Error::Git {
            kind: GitErrorKind::Permanent,
            operation: "checkout".into(),
            message: "unknown revision".into(),
        };
        assert!(transient.is_retryable());
        assert!(!permanent.is_retryable());
        assert!(Error::RemoteBackend("503".into()).is_retryable());
    }

    #[test]
    fn test_cycle_display() {
        let err = Error::Cycle { members: vec!["a".into(), "b".into(), "a".into()] };
        assert_eq!(err.to_string(), "circular dependency: a -> b -> a");
    }
}
