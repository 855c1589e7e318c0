// src/packages.rs

//! Package-manager detection and dependency installation
//!
//! Managers are detected by file presence and invoked in their
//! lockfile-preferring form (`npm ci` over `npm install`, `--locked`
//! flags where the tool has them). Failures are classified so the apply
//! orchestrator retries network problems but not checksum or lock
//! conflicts.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::cancel::CancelFlag;
use crate::error::{Error, Result};
use crate::subprocess::{self, CommandSpec};

/// Default per-install timeout
const INSTALL_TIMEOUT: Duration = Duration::from_secs(900);

/// Stderr fragments indicating a retryable fetch problem
const NETWORK_MARKERS: [&str; 7] = [
    "network",
    "econnreset",
    "etimedout",
    "timed out",
    "connection refused",
    "could not resolve",
    "temporary failure",
];

/// Stderr fragments indicating retrying cannot help
const FATAL_MARKERS: [&str; 5] = [
    "checksum",
    "integrity",
    "lockfile",
    "lock file",
    "conflict",
];

/// Supported package managers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Pip,
    Cargo,
    Go,
    Docker,
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Npm => "npm",
            Self::Pip => "pip",
            Self::Cargo => "cargo",
            Self::Go => "go",
            Self::Docker => "docker",
        };
        write!(f, "{name}")
    }
}

/// An install failure, classified for retry
#[derive(Debug)]
pub struct InstallFailure {
    pub manager: PackageManager,
    pub retryable: bool,
    pub output: String,
}

impl InstallFailure {
    /// Convert into the crate error, naming the component
    pub fn into_error(self, component: &str) -> Error {
        Error::Dependency {
            component: component.to_string(),
            message: format!("{} install failed: {}", self.manager, self.output),
        }
    }
}

/// Detect the package managers a component tree uses
pub fn detect(dir: &Path) -> Vec<PackageManager> {
    let mut detected = Vec::new();
    if !dir.is_dir() {
        return detected;
    }
    if dir.join("package.json").exists() {
        detected.push(PackageManager::Npm);
    }
    if dir.join("requirements.txt").exists()
        || dir.join("setup.py").exists()
        || dir.join("pyproject.toml").exists()
    {
        detected.push(PackageManager::Pip);
    }
    if dir.join("Cargo.toml").exists() {
        detected.push(PackageManager::Cargo);
    }
    if dir.join("go.mod").exists() {
        detected.push(PackageManager::Go);
    }
    if dir.join("Dockerfile").exists() {
        detected.push(PackageManager::Docker);
    }
    detected
}

fn classify(output: &str) -> bool {
    let lower = output.to_lowercase();
    if FATAL_MARKERS.iter().any(|m| lower.contains(m)) {
        return false;
    }
    NETWORK_MARKERS.iter().any(|m| lower.contains(m))
}

/// The install command for a manager in `dir`, preferring lockfiles.
/// `pip_override` points at a venv's pip when isolation is active.
fn install_spec(
    manager: PackageManager,
    dir: &Path,
    pip_override: Option<&Path>,
) -> Option<CommandSpec> {
    let spec = match manager {
        PackageManager::Npm => {
            if dir.join("package-lock.json").exists() {
                CommandSpec::new("npm", &["ci"])
            } else {
                CommandSpec::new("npm", &["install"])
            }
        }
        PackageManager::Pip => {
            let pip = pip_override
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| "pip3".to_string());
            if dir.join("requirements.txt").exists() {
                CommandSpec::new(&pip, &["install", "-r", "requirements.txt"])
            } else {
                CommandSpec::new(&pip, &["install", "-e", "."])
            }
        }
        PackageManager::Cargo => {
            if dir.join("Cargo.lock").exists() {
                CommandSpec::new("cargo", &["fetch", "--locked"])
            } else {
                CommandSpec::new("cargo", &["fetch"])
            }
        }
        PackageManager::Go => CommandSpec::new("go", &["mod", "download"]),
        // Docker images are built at deploy time, not here
        PackageManager::Docker => return None,
    };
    Some(spec.current_dir(dir).timeout(INSTALL_TIMEOUT))
}

/// The program and arguments of a manager's install, for callers that run
/// it somewhere other than the host (containers)
pub fn invocation(manager: PackageManager, dir: &Path) -> Option<(String, Vec<String>)> {
    install_spec(manager, dir, None).map(|spec| (spec.program, spec.args))
}

/// Run one manager's install in `dir`
pub fn install(
    manager: PackageManager,
    dir: &Path,
    pip_override: Option<&Path>,
    cancel: &CancelFlag,
) -> std::result::Result<(), InstallFailure> {
    let Some(spec) = install_spec(manager, dir, pip_override) else {
        debug!("no install step for {manager}");
        return Ok(());
    };

    info!("installing {manager} dependencies in {}", dir.display());
    match subprocess::run(&spec, cancel) {
        Ok(output) if output.success() => Ok(()),
        Ok(output) => {
            let combined = output.combined();
            Err(InstallFailure {
                manager,
                retryable: classify(&combined),
                output: combined.trim().to_string(),
            })
        }
        Err(Error::Cancelled) => Err(InstallFailure {
            manager,
            retryable: false,
            output: "cancelled".to_string(),
        }),
        Err(e) => Err(InstallFailure { manager, retryable: false, output: e.to_string() }),
    }
}

/// Install every detected manager's dependencies; stops at the first
/// failure so the classification reaches the caller intact
pub fn install_all(
    dir: &Path,
    pip_override: Option<&Path>,
    cancel: &CancelFlag,
) -> std::result::Result<Vec<PackageManager>, InstallFailure> {
    let managers = detect(dir);
    for manager in &managers {
        cancel.check().map_err(|_| InstallFailure {
            manager: *manager,
            retryable: false,
            output: "cancelled".to_string(),
        })?;
        install(*manager, dir, pip_override, cancel)?;
    }
    Ok(managers)
}

/// Location of the venv pip for an isolated component
pub fn venv_pip(venv_dir: &Path) -> PathBuf {
    venv_dir.join("bin").join("pip")
}
