// src/manifest/mod.rs

//! Typed manifest model
//!
//! Loads `components.yaml`, `environments.yaml`, and `features.yaml` into an
//! immutable in-memory graph. Every node is a proper sum type; nothing
//! downstream ever inspects raw YAML. Validation is strict: any shape or
//! reference problem fails the load with `ManifestError`.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::fsutil::atomic_write;
use crate::version::Pin;
use crate::workspace::Workspace;

/// Environments that always exist and cannot be removed
pub const RESERVED_ENVS: [&str; 3] = ["dev", "staging", "prod"];

/// Storage mode of the whole workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceMode {
    /// Components are git working trees pinned to commits
    Reference,
    /// Components are copied source trees with provenance records
    Vendored,
}

impl fmt::Display for WorkspaceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reference => write!(f, "reference"),
            Self::Vendored => write!(f, "vendored"),
        }
    }
}

impl FromStr for WorkspaceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reference" => Ok(Self::Reference),
            "vendored" => Ok(Self::Vendored),
            other => Err(Error::Manifest(format!(
                "unknown workspace mode '{other}' (expected 'reference' or 'vendored')"
            ))),
        }
    }
}

/// Build kind of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Bazel,
    Python,
    Npm,
    Docker,
    Generic,
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bazel => "bazel",
            Self::Python => "python",
            Self::Npm => "npm",
            Self::Docker => "docker",
            Self::Generic => "generic",
        };
        write!(f, "{name}")
    }
}

impl FromStr for ComponentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bazel" => Ok(Self::Bazel),
            "python" => Ok(Self::Python),
            "npm" => Ok(Self::Npm),
            "docker" => Ok(Self::Docker),
            "generic" => Ok(Self::Generic),
            other => Err(Error::Manifest(format!("unknown component type '{other}'"))),
        }
    }
}

/// Dependency-install isolation for a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationPolicy {
    #[default]
    None,
    Venv,
    Container,
}

impl FromStr for IsolationPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "venv" => Ok(Self::Venv),
            "container" => Ok(Self::Container),
            other => Err(Error::Manifest(format!("unknown isolation policy '{other}'"))),
        }
    }
}

/// One component declaration
#[derive(Debug, Clone)]
pub struct Component {
    pub name: String,
    pub repo: String,
    /// Pin string exactly as written
    pub version: String,
    /// Parsed form of `version`
    pub pin: Pin,
    pub kind: ComponentType,
    pub build_target: Option<String>,
    /// Declaration order is preserved for diagnostics; equality is set-based
    pub depends_on: Vec<String>,
    pub isolation: IsolationPolicy,
}

impl Component {
    pub fn depends_on_set(&self) -> BTreeSet<&str> {
        self.depends_on.iter().map(String::as_str).collect()
    }
}

/// A named pin set over components
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub name: String,
    /// component name -> pin string
    pub pins: BTreeMap<String, String>,
}

/// A directed contract edge between feature members
#[derive(Debug, Clone, Deserialize)]
pub struct Contract {
    pub producer: String,
    pub consumer: String,
}

/// A verification target composed of components
#[derive(Debug, Clone)]
pub struct Feature {
    pub name: String,
    pub description: String,
    pub components: Vec<String>,
    pub contracts: Vec<Contract>,
    pub policies: Vec<String>,
}

/// The complete, validated manifest graph. Read-only after load.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub mode: WorkspaceMode,
    pub components: BTreeMap<String, Component>,
    pub environments: BTreeMap<String, Environment>,
    pub features: BTreeMap<String, Feature>,
}

// Raw on-disk shapes

#[derive(Debug, Default, Deserialize)]
struct RawComponentsFile {
    #[serde(default)]
    meta: RawMeta,
    #[serde(default)]
    components: BTreeMap<String, RawComponent>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMeta {
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawComponent {
    repo: Option<String>,
    version: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    build_target: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    isolation: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEnvironmentsFile {
    #[serde(default)]
    environments: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFeaturesFile {
    #[serde(default)]
    features: BTreeMap<String, RawFeature>,
}

#[derive(Debug, Deserialize)]
struct RawFeature {
    #[serde(default)]
    description: String,
    #[serde(default)]
    components: Vec<String>,
    #[serde(default)]
    contracts: Vec<Contract>,
    #[serde(default)]
    policies: Vec<String>,
}

impl Manifest {
    /// Load and validate all three manifest files
    pub fn load(workspace: &Workspace) -> Result<Self> {
        let components_path = workspace.components_manifest();
        let raw: RawComponentsFile = read_yaml(&components_path)?;

        let mode = match raw.meta.mode.as_deref() {
            Some(mode) => mode.parse()?,
            None => WorkspaceMode::Reference,
        };

        let mut components = BTreeMap::new();
        for (name, raw_component) in raw.components {
            components.insert(name.clone(), build_component(&name, raw_component)?);
        }

        // Every dependency must name a declared component
        for component in components.values() {
            for dep in &component.depends_on {
                if !components.contains_key(dep) {
                    return Err(Error::Dependency {
                        component: component.name.clone(),
                        message: format!("depends on '{dep}' which does not exist"),
                    });
                }
            }
        }

        let environments = load_environments(&workspace.environments_manifest(), &components)?;
        let features = load_features(&workspace.features_manifest(), &components)?;

        Ok(Self { mode, components, environments, features })
    }

    pub fn component(&self, name: &str) -> Result<&Component> {
        self.components.get(name).ok_or_else(|| {
            Error::Manifest(format!("unknown component '{name}'"))
        })
    }

    pub fn environment(&self, name: &str) -> Result<&Environment> {
        self.environments.get(name).ok_or_else(|| {
            Error::Manifest(format!("unknown environment '{name}'"))
        })
    }

    /// Effective pin for a component in an environment: the environment's
    /// entry when present, the component default otherwise.
    pub fn pin_for(&self, component: &str, env: &str) -> Result<String> {
        let component = self.component(component)?;
        if let Some(environment) = self.environments.get(env) {
            if let Some(pin) = environment.pins.get(&component.name) {
                return Ok(pin.clone());
            }
        }
        Ok(component.version.clone())
    }

    /// Component names in declaration-independent sorted order
    pub fn component_names(&self) -> Vec<String> {
        self.components.keys().cloned().collect()
    }
}

fn read_yaml<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match fs::read_to_string(path) {
        Ok(content) => serde_yaml::from_str(&content).map_err(|e| {
            Error::Manifest(format!("{}: {e}", path.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

fn build_component(name: &str, raw: RawComponent) -> Result<Component> {
    let repo = raw.repo.filter(|r| !r.is_empty()).ok_or_else(|| {
        Error::Manifest(format!("component '{name}' is missing required field 'repo'"))
    })?;
    let version = raw.version.filter(|v| !v.is_empty()).ok_or_else(|| {
        Error::Manifest(format!("component '{name}' is missing required field 'version'"))
    })?;
    let kind = raw
        .kind
        .ok_or_else(|| {
            Error::Manifest(format!("component '{name}' is missing required field 'type'"))
        })?
        .parse()
        .map_err(|e| Error::Manifest(format!("component '{name}': {e}")))?;

    let pin = Pin::parse(&version)
        .map_err(|e| Error::Manifest(format!("component '{name}': {e}")))?;

    let isolation = match raw.isolation {
        Some(policy) => policy
            .parse()
            .map_err(|e| Error::Manifest(format!("component '{name}': {e}")))?,
        None => IsolationPolicy::None,
    };

    if raw.depends_on.iter().any(|d| d == name) {
        return Err(Error::Dependency {
            component: name.to_string(),
            message: "component depends on itself".to_string(),
        });
    }

    Ok(Component {
        name: name.to_string(),
        repo,
        version,
        pin,
        kind,
        build_target: raw.build_target,
        depends_on: raw.depends_on,
        isolation,
    })
}

fn load_environments(
    path: &Path,
    components: &BTreeMap<String, Component>,
) -> Result<BTreeMap<String, Environment>> {
    let raw: RawEnvironmentsFile = read_yaml(path)?;
    let mut environments = BTreeMap::new();

    for (name, pins) in raw.environments {
        for (component, pin) in &pins {
            if !components.contains_key(component) {
                return Err(Error::Manifest(format!(
                    "environment '{name}' pins unknown component '{component}'"
                )));
            }
            Pin::parse(pin).map_err(|e| {
                Error::Manifest(format!("environment '{name}', component '{component}': {e}"))
            })?;
        }
        environments.insert(name.clone(), Environment { name, pins });
    }

    // Reserved environments always exist, with empty pin sets if undeclared
    for reserved in RESERVED_ENVS {
        environments
            .entry(reserved.to_string())
            .or_insert_with(|| Environment { name: reserved.to_string(), ..Default::default() });
    }

    Ok(environments)
}

fn load_features(
    path: &Path,
    components: &BTreeMap<String, Component>,
) -> Result<BTreeMap<String, Feature>> {
    let raw: RawFeaturesFile = read_yaml(path)?;
    let mut features = BTreeMap::new();

    for (name, raw_feature) in raw.features {
        for member in &raw_feature.components {
            if !components.contains_key(member) {
                return Err(Error::Manifest(format!(
                    "feature '{name}' references nonexistent component '{member}'"
                )));
            }
        }
        for contract in &raw_feature.contracts {
            for endpoint in [&contract.producer, &contract.consumer] {
                let component = endpoint.split('.').next().unwrap_or(endpoint);
                if !components.contains_key(component) {
                    return Err(Error::Manifest(format!(
                        "feature '{name}' contract references nonexistent component '{component}'"
                    )));
                }
            }
        }
        features.insert(
            name.clone(),
            Feature {
                name,
                description: raw_feature.description,
                components: raw_feature.components,
                contracts: raw_feature.contracts,
                policies: raw_feature.policies,
            },
        );
    }

    Ok(features)
}

/// Rewrite `meta.mode` in components.yaml, preserving everything else
pub fn set_workspace_mode(path: &Path, mode: WorkspaceMode) -> Result<()> {
    let content = fs::read_to_string(path)?;
    let mut doc: serde_yaml::Mapping = serde_yaml::from_str(&content)?;

    let meta = doc
        .entry(serde_yaml::Value::String("meta".to_string()))
        .or_insert_with(|| serde_yaml::Value::Mapping(Default::default()));
    if let serde_yaml::Value::Mapping(meta) = meta {
        meta.insert(
            serde_yaml::Value::String("mode".to_string()),
            serde_yaml::Value::String(mode.to_string()),
        );
    }

    atomic_write(path, serde_yaml::to_string(&doc)?.as_bytes())
}

/// Rewrite one component's `version` in components.yaml
pub fn set_component_version(path: &Path, component: &str, version: &str) -> Result<()> {
    let content = fs::read_to_string(path)?;
    let mut doc: serde_yaml::Mapping = serde_yaml::from_str(&content)?;

    let components = doc
        .get_mut("components")
        .and_then(|v| v.as_mapping_mut())
        .ok_or_else(|| Error::Manifest("components.yaml has no 'components' map".to_string()))?;
    let entry = components
        .get_mut(component)
        .and_then(|v| v.as_mapping_mut())
        .ok_or_else(|| Error::Manifest(format!("unknown component '{component}'")))?;
    entry.insert(
        serde_yaml::Value::String("version".to_string()),
        serde_yaml::Value::String(version.to_string()),
    );

    atomic_write(path, serde_yaml::to_string(&doc)?.as_bytes())
}
