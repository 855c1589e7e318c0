// src/isolation.rs

//! Isolated install environments (virtualenvs and containers)
//!
//! A component declaring `isolation: venv` gets a named virtualenv under
//! `.meta/venvs/<component>/` and its Python dependencies install through
//! that venv's pip. `isolation: container` runs the install inside a
//! transient container with the component tree bind-mounted.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::cancel::CancelFlag;
use crate::config::Context;
use crate::error::{Error, Result};
use crate::manifest::{Component, ComponentType, IsolationPolicy};
use crate::subprocess::{self, CommandSpec};

/// Timeout for environment creation
const SETUP_TIMEOUT: Duration = Duration::from_secs(300);

/// Container images per component kind
fn container_image(kind: ComponentType) -> &'static str {
    match kind {
        ComponentType::Python => "python:3.12-slim",
        ComponentType::Npm => "node:20-slim",
        _ => "debian:stable-slim",
    }
}

/// The environment a component's installs run in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEnvironment {
    /// Host environment, no isolation
    Host,
    /// Virtualenv; pip lives at `<path>/bin/pip`
    Venv(PathBuf),
    /// Transient container from this image
    Container(String),
}

/// Prepare the declared isolation for a component, creating the venv on
/// first use
pub fn prepare(ctx: &Context, component: &Component) -> Result<InstallEnvironment> {
    match component.isolation {
        IsolationPolicy::None => Ok(InstallEnvironment::Host),
        IsolationPolicy::Venv => {
            let venv_dir = venv_dir(ctx, &component.name);
            create_venv(&venv_dir, &ctx.cancel)?;
            Ok(InstallEnvironment::Venv(venv_dir))
        }
        IsolationPolicy::Container => {
            if !subprocess::available("docker") {
                return Err(Error::Dependency {
                    component: component.name.clone(),
                    message: "isolation 'container' requires docker on PATH".to_string(),
                });
            }
            Ok(InstallEnvironment::Container(container_image(component.kind).to_string()))
        }
    }
}

/// Stable venv location for a component
pub fn venv_dir(ctx: &Context, component: &str) -> PathBuf {
    ctx.workspace.meta_dir().join("venvs").join(component)
}

fn create_venv(venv_dir: &Path, cancel: &CancelFlag) -> Result<()> {
    if venv_dir.join("bin").join("pip").exists() {
        debug!("venv already exists at {}", venv_dir.display());
        return Ok(());
    }
    if let Some(parent) = venv_dir.parent() {
        std::fs::create_dir_all(parent)?;
    }

    info!("creating venv at {}", venv_dir.display());
    let spec = CommandSpec::new("python3", &["-m", "venv", &venv_dir.to_string_lossy()])
        .timeout(SETUP_TIMEOUT);
    let output = subprocess::run(&spec, cancel)?;
    if output.success() {
        Ok(())
    } else {
        Err(Error::Io(std::io::Error::other(format!(
            "venv creation failed: {}",
            output.combined().trim()
        ))))
    }
}

/// Run an install command inside a transient container with the component
/// tree mounted at /work
pub fn run_in_container(
    image: &str,
    component_dir: &Path,
    install_args: &[&str],
    cancel: &CancelFlag,
) -> Result<()> {
    let mount = format!("{}:/work", component_dir.display());
    let mut args = vec!["run", "--rm", "-v", &mount, "-w", "/work", image];
    args.extend_from_slice(install_args);

    let spec = CommandSpec::new("docker", &args).timeout(Duration::from_secs(1800));
    let output = subprocess::run(&spec, cancel)?;
    if output.success() {
        Ok(())
    } else {
        Err(Error::Io(std::io::Error::other(format!(
            "container install failed: {}",
            output.combined().trim()
        ))))
    }
}
