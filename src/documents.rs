//! Persisted component, environment and state files
//!
//! On disk, resources and params are lists rather than maps and statuses are
//! never written. The file extension picks the format: `.yaml`/`.yml`,
//! `.toml` or `.json`.

use anyhow::{Context, Result};
use resolver::{
    Component, ENVIRONMENT_KEY, Param, ParamMap, Resource, ResourceMap, State, resource_map,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Files shorter than this are treated as "no state yet"
const MIN_STATE_LEN: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("unsupported file format: {} (expected .yaml, .yml, .toml or .json)", .0.display())]
    UnsupportedFormat(PathBuf),
}

/// Serialization format of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Toml,
    Json,
}

impl Format {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self, DocumentError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => Ok(Self::Yaml),
            Some("toml") => Ok(Self::Toml),
            Some("json") => Ok(Self::Json),
            _ => Err(DocumentError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    fn parse<T: DeserializeOwned>(self, content: &str) -> Result<T> {
        Ok(match self {
            Self::Yaml => serde_yaml::from_str(content)?,
            Self::Toml => toml::from_str(content)?,
            Self::Json => serde_json::from_str(content)?,
        })
    }

    fn render<T: Serialize>(self, value: &T) -> Result<String> {
        Ok(match self {
            Self::Yaml => serde_yaml::to_string(value)?,
            Self::Toml => toml::to_string_pretty(value)?,
            Self::Json => serde_json::to_string_pretty(value)?,
        })
    }
}

// ============================================================================
// On-disk shapes
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamDocument {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDocument {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub params: Vec<ParamDocument>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDocument {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub component_type: String,
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub provides: Vec<ResourceDocument>,
    #[serde(default)]
    pub uses: Vec<ResourceDocument>,
    #[serde(default)]
    pub needs: Vec<ResourceDocument>,
}

/// Environment properties are stored as plain name/value pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedValue {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    #[serde(default)]
    pub environment_vars: BTreeMap<String, Vec<NamedValue>>,
    #[serde(default)]
    pub components: Vec<ComponentDocument>,
}

// ============================================================================
// Conversions
// ============================================================================

impl From<ParamDocument> for Param {
    fn from(doc: ParamDocument) -> Self {
        Self {
            name: doc.name,
            value: doc.value,
            formula: doc.formula,
            default_value: doc.default_value,
            required: doc.required,
            ..Self::default()
        }
    }
}

impl From<&Param> for ParamDocument {
    fn from(param: &Param) -> Self {
        Self {
            name: param.name.clone(),
            value: param.value.clone(),
            formula: param.formula.clone(),
            default_value: param.default_value.clone(),
            required: param.required,
        }
    }
}

impl From<ResourceDocument> for Resource {
    fn from(doc: ResourceDocument) -> Self {
        let params: ParamMap = doc
            .params
            .into_iter()
            .map(|p| (p.name.clone(), Param::from(p)))
            .collect();
        Self {
            name: doc.name,
            resource_type: doc.resource_type,
            params,
            ..Self::default()
        }
    }
}

impl From<&Resource> for ResourceDocument {
    fn from(resource: &Resource) -> Self {
        Self {
            name: resource.name.clone(),
            resource_type: resource.resource_type.clone(),
            params: resource.params.values().map(ParamDocument::from).collect(),
        }
    }
}

fn resources(docs: Vec<ResourceDocument>) -> ResourceMap {
    resource_map(docs.into_iter().map(Resource::from))
}

fn resource_docs(resources: &ResourceMap) -> Vec<ResourceDocument> {
    resources.values().map(ResourceDocument::from).collect()
}

impl From<ComponentDocument> for Component {
    fn from(doc: ComponentDocument) -> Self {
        Self {
            name: doc.name,
            component_type: doc.component_type,
            driver: doc.driver,
            description: doc.description,
            provides: resources(doc.provides),
            uses: resources(doc.uses),
            needs: resources(doc.needs),
            ..Self::default()
        }
    }
}

impl From<&Component> for ComponentDocument {
    fn from(component: &Component) -> Self {
        Self {
            name: component.name.clone(),
            component_type: component.component_type.clone(),
            driver: component.driver.clone(),
            description: component.description.clone(),
            provides: resource_docs(&component.provides),
            uses: resource_docs(&component.uses),
            needs: resource_docs(&component.needs),
        }
    }
}

impl From<StateDocument> for State {
    fn from(doc: StateDocument) -> Self {
        let mut state = Self::new();

        let env = doc.environment_vars.into_iter().map(|(category, values)| {
            let mut resource = Resource::new(ENVIRONMENT_KEY, category);
            for nv in values {
                resource = resource.with_param(Param::new(nv.name, nv.value));
            }
            resource
        });
        state.merge_environment(resource_map(env));

        for component in doc.components {
            state.insert(Component::from(component));
        }
        state
    }
}

impl From<&State> for StateDocument {
    fn from(state: &State) -> Self {
        let environment_vars = state
            .environment()
            .map(|env| {
                env.provides
                    .values()
                    .map(|resource| {
                        let values = resource
                            .params
                            .values()
                            .map(|p| NamedValue {
                                name: p.name.clone(),
                                value: p.value.clone(),
                            })
                            .collect();
                        (resource.name.clone(), values)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            environment_vars,
            components: state
                .user_components()
                .map(|(_, c)| ComponentDocument::from(c))
                .collect(),
        }
    }
}

// ============================================================================
// Loading and saving
// ============================================================================

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let format = Format::from_path(path)?;
    let content =
        fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    format
        .parse(&content)
        .with_context(|| format!("Invalid document format in {}", path.display()))
}

/// Load a component file; the file must exist
pub fn load_component(path: &Path) -> Result<Component> {
    log::info!("Attempting to load file: {}", path.display());
    let doc: ComponentDocument = read_document(path)?;
    Ok(doc.into())
}

/// Load an environment file (a component file carrying environment
/// properties, the driver name and platform settings).
///
/// A missing file yields an empty environment.
pub fn load_environment(path: &Path) -> Result<Component> {
    if !path.exists() {
        log::warn!("No environment file at {}; continuing without one", path.display());
        return Ok(Component::default());
    }
    load_component(path)
}

/// Load a state file; a missing or empty file yields a fresh state
pub fn load_state(path: &Path) -> Result<State> {
    let format = Format::from_path(path)?;
    if !path.exists() {
        log::info!("The state is empty. Creating a brand new state model...");
        return Ok(State::new());
    }

    let content =
        fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    if content.trim().len() < MIN_STATE_LEN {
        log::info!("The state is empty. Creating a brand new state model...");
        return Ok(State::new());
    }

    let doc: StateDocument = format
        .parse(&content)
        .with_context(|| format!("Invalid state format in {}", path.display()))?;
    log::debug!(
        "Loaded {} component(s) from {}",
        doc.components.len(),
        path.display()
    );
    Ok(doc.into())
}

/// Path the previous state is moved to before a save
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".backup");
    PathBuf::from(name)
}

/// Save a state file, moving any previous file to `<file>.backup` first
pub fn save_state(path: &Path, state: &State) -> Result<()> {
    let format = Format::from_path(path)?;
    let content = format
        .render(&StateDocument::from(state))
        .context("Failed to serialize state")?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    if path.exists() {
        let backup = backup_path(path);
        fs::rename(path, &backup).with_context(|| {
            format!(
                "Failed to back up {} to {}",
                path.display(),
                backup.display()
            )
        })?;
        log::debug!("Previous state moved to {}", backup.display());
    }

    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    log::debug!("Saved state to {}", path.display());
    Ok(())
}
