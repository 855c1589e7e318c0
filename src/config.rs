// src/config.rs

//! Layered configuration and the per-invocation context
//!
//! Resolution order, highest wins: command-line flags, `META_*` environment
//! variables, project config (`.meta/config.yaml`), global config
//! (`~/.meta/config.yaml`), built-in defaults.
//!
//! There is no global mutable state: each invocation builds one [`Context`]
//! and threads it through the engines, which lets tests run many
//! invocations in a single process.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cancel::CancelFlag;
use crate::error::{Error, Result};
use crate::fsutil::atomic_write;
use crate::workspace::Workspace;

/// Recognized configuration keys
pub const KNOWN_KEYS: [&str; 7] = [
    "default_env",
    "manifests_dir",
    "parallel_jobs",
    "show_progress",
    "log_level",
    "remote_cache",
    "remote_store",
];

/// Resolved settings for one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub default_env: String,
    pub manifests_dir: String,
    pub parallel_jobs: usize,
    pub show_progress: bool,
    pub log_level: String,
    pub remote_cache: Option<String>,
    pub remote_store: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_env: "dev".to_string(),
            manifests_dir: "manifests".to_string(),
            parallel_jobs: 4,
            show_progress: true,
            log_level: "info".to_string(),
            remote_cache: None,
            remote_store: None,
        }
    }
}

/// Flag-level overrides, applied last
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub default_env: Option<String>,
    pub manifests_dir: Option<String>,
    pub parallel_jobs: Option<usize>,
    pub show_progress: Option<bool>,
    pub log_level: Option<String>,
    pub remote_cache: Option<String>,
    pub remote_store: Option<String>,
}

impl Config {
    /// Resolve configuration for a workspace rooted at `root`.
    pub fn resolve(root: &Path, overrides: &ConfigOverrides) -> Self {
        let mut config = Self::default();

        if let Some(global) = global_config_path() {
            config.merge_file(&global);
        }
        config.merge_file(&root.join(".meta/config.yaml"));
        config.merge_env();
        config.merge_overrides(overrides);
        config
    }

    fn merge_file(&mut self, path: &Path) {
        let Ok(content) = fs::read_to_string(path) else { return };
        let Ok(map) = serde_yaml::from_str::<BTreeMap<String, serde_yaml::Value>>(&content) else {
            debug!("ignoring unparsable config at {}", path.display());
            return;
        };
        for (key, value) in map {
            self.apply(&key, &yaml_to_string(&value));
        }
    }

    fn merge_env(&mut self) {
        for key in KNOWN_KEYS {
            let var = format!("META_{}", key.to_uppercase());
            if let Ok(value) = std::env::var(&var) {
                self.apply(key, &value);
            }
        }
    }

    fn merge_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(v) = &overrides.default_env {
            self.default_env = v.clone();
        }
        if let Some(v) = &overrides.manifests_dir {
            self.manifests_dir = v.clone();
        }
        if let Some(v) = overrides.parallel_jobs {
            self.parallel_jobs = v;
        }
        if let Some(v) = overrides.show_progress {
            self.show_progress = v;
        }
        if let Some(v) = &overrides.log_level {
            self.log_level = v.clone();
        }
        if let Some(v) = &overrides.remote_cache {
            self.remote_cache = Some(v.clone());
        }
        if let Some(v) = &overrides.remote_store {
            self.remote_store = Some(v.clone());
        }
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "default_env" => self.default_env = value.to_string(),
            "manifests_dir" => self.manifests_dir = value.to_string(),
            "parallel_jobs" => {
                if let Ok(n) = value.parse() {
                    self.parallel_jobs = n;
                }
            }
            "show_progress" => self.show_progress = matches!(value, "true" | "1" | "yes"),
            "log_level" => self.log_level = value.to_string(),
            "remote_cache" => self.remote_cache = non_empty(value),
            "remote_store" => self.remote_store = non_empty(value),
            _ => debug!("unknown config key '{key}' ignored"),
        }
    }

    /// Current value of a key, rendered for display
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "default_env" => Some(self.default_env.clone()),
            "manifests_dir" => Some(self.manifests_dir.clone()),
            "parallel_jobs" => Some(self.parallel_jobs.to_string()),
            "show_progress" => Some(self.show_progress.to_string()),
            "log_level" => Some(self.log_level.clone()),
            "remote_cache" => self.remote_cache.clone(),
            "remote_store" => self.remote_store.clone(),
            _ => None,
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn yaml_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

/// Global config location (`~/.meta/config.yaml`)
pub fn global_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".meta/config.yaml"))
}

/// Set one key in a config file, preserving unrelated keys
pub fn set_config_value(path: &Path, key: &str, value: &str) -> Result<()> {
    if !KNOWN_KEYS.contains(&key) {
        return Err(Error::Manifest(format!("unknown config key '{key}'")));
    }
    let mut map: BTreeMap<String, serde_yaml::Value> = match fs::read_to_string(path) {
        Ok(content) => serde_yaml::from_str(&content)?,
        Err(_) => BTreeMap::new(),
    };
    map.insert(key.to_string(), serde_yaml::Value::String(value.to_string()));
    atomic_write(path, serde_yaml::to_string(&map)?.as_bytes())
}

/// Remove one key from a config file
pub fn unset_config_value(path: &Path, key: &str) -> Result<()> {
    let mut map: BTreeMap<String, serde_yaml::Value> = match fs::read_to_string(path) {
        Ok(content) => serde_yaml::from_str(&content)?,
        Err(_) => return Ok(()),
    };
    map.remove(key);
    atomic_write(path, serde_yaml::to_string(&map)?.as_bytes())
}

/// Write an empty config file if none exists
pub fn init_config_file(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    atomic_write(path, b"# meta configuration\n{}\n")?;
    Ok(true)
}

/// Everything an engine needs for one invocation
#[derive(Debug, Clone)]
pub struct Context {
    pub workspace: Workspace,
    pub config: Config,
    pub cancel: CancelFlag,
}

impl Context {
    pub fn new(workspace: Workspace, config: Config) -> Self {
        Self { workspace, config, cancel: CancelFlag::new() }
    }

    /// Discover the workspace from the current directory and resolve config
    pub fn from_cwd(overrides: &ConfigOverrides) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        // manifests_dir may itself come from config, so resolve twice: once
        // against defaults to find the root, once against the found root
        let bootstrap = Config::resolve(&cwd, overrides);
        let workspace = Workspace::discover(&cwd, &bootstrap.manifests_dir)?;
        let config = Config::resolve(workspace.root(), overrides);
        let workspace = Workspace::at(workspace.root(), &config.manifests_dir);
        Ok(Self::new(workspace, config))
    }

    /// Environment selected by flag or configured default
    pub fn env_or_default<'a>(&'a self, flag: Option<&'a str>) -> &'a str {
        flag.unwrap_or(&self.config.default_env)
    }
}
