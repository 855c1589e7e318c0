// src/lib.rs

//! meta - control plane for hierarchical meta-repositories
//!
//! A workspace composes many independent component repositories into one
//! reproducible, versioned system. The user declares the desired state
//! (components, versions, environments, dependencies) and the tool
//! materializes, validates, caches, rolls back, and audits it.
//!
//! # Architecture
//!
//! - Declarative manifests: YAML under `manifests/`, loaded into a typed
//!   read-only model
//! - Two storage modes: *reference* (git working trees pinned to commits)
//!   and *vendored* (copied trees with provenance records)
//! - Deterministic lock files per environment; apply plans are pure
//!   functions of their inputs
//! - Content-addressed store plus build cache, optionally mirrored to
//!   object storage
//! - Changesets: atomic commit groups across component repos
//! - Every invocation is a one-shot process; state lives in files under
//!   the workspace

pub mod apply;
pub mod cancel;
pub mod changeset;
pub mod config;
mod error;
pub mod fsutil;
pub mod git;
pub mod hash;
pub mod health;
pub mod isolation;
pub mod lockfile;
pub mod manifest;
pub mod packages;
pub mod progress;
pub mod resolver;
pub mod rollback;
pub mod snapshot;
pub mod store;
pub mod subprocess;
pub mod vendor;
pub mod version;
pub mod workspace;

pub use apply::{ApplyOptions, ApplySummary, Plan, PlanOptions};
pub use cancel::CancelFlag;
pub use config::{Config, ConfigOverrides, Context};
pub use error::{Error, GitErrorKind, Result};
pub use hash::{hash_bytes, hash_tree, sha256, xxh128, HashAlgorithm, Hasher};
pub use manifest::{Component, ComponentType, Manifest, WorkspaceMode};
pub use progress::{CliProgress, LogProgress, ProgressTracker, SilentProgress};
pub use resolver::DependencyGraph;
pub use store::{Cache, RemoteStore, Store};
pub use version::{Pin, Range, Strategy};
pub use workspace::Workspace;
