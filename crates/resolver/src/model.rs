//! Component, resource and parameter data model
//!
//! Everything the engine touches lives here: a [`State`] owns its
//! [`Component`]s, a component owns three [`ResourceMap`]s (`provides`,
//! `uses`, `needs`), and every [`Resource`] owns its [`ParamMap`].
//! Nothing is shared by reference; merges replace whole components.

use std::collections::BTreeMap;

/// Separator between a resource type and its name in an identity key
pub const ID_SEPARATOR: &str = ":";

/// Key (and type) of the synthetic component holding environment properties
pub const ENVIRONMENT_KEY: &str = "environment.properties";

/// Resource type used by environment files to carry platform settings
pub const PLATFORM_SETTINGS_TYPE: &str = "platform.settings";

/// Number of resolution rounds before giving up on pending components
pub const DEFAULT_RETRY_BUDGET: usize = 50;

/// Params keyed by param name
pub type ParamMap = BTreeMap<String, Param>;

/// Resources keyed by identity key (see [`resource_key`])
pub type ResourceMap = BTreeMap<String, Resource>;

/// Components keyed by component key (`type:name`)
pub type ComponentMap = BTreeMap<String, Component>;

/// Platform-specific settings handed to drivers, keyed by provided-resource name
pub type PlatformSettings = BTreeMap<String, Platform>;

/// Build the identity key used to match needs against provides.
///
/// An empty name degrades the key to the bare type.
pub fn resource_key(resource_type: &str, name: &str) -> String {
    if name.is_empty() {
        resource_type.to_string()
    } else {
        format!("{resource_type}{ID_SEPARATOR}{name}")
    }
}

/// Build the key a component is stored under in [`State::components`]
pub fn component_key(component_type: &str, name: &str) -> String {
    format!("{component_type}{ID_SEPARATOR}{name}")
}

/// Resolution status shared by params, resources and components
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Status {
    /// Never looked at by the engine
    #[default]
    Unset,
    /// Value is final for this resolution pass
    Resolved,
    /// Value still has to be found or computed
    Unresolved,
}

impl Status {
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Resolved)
    }

    /// Status implied by a value: anything non-empty counts as resolved
    pub fn from_value(value: &str) -> Self {
        if value.is_empty() {
            Self::Unresolved
        } else {
            Self::Resolved
        }
    }
}

/// A single named value, possibly computed from a formula
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    /// Empty means "no value yet"
    pub value: String,
    pub formula: Option<String>,
    pub default_value: Option<String>,
    pub required: bool,
    pub status: Status,
}

impl Param {
    /// Create a param with a literal value
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    /// Create a param whose value is computed from `formula`
    pub fn with_formula(name: impl Into<String>, formula: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            formula: Some(formula.into()),
            ..Self::default()
        }
    }

    /// Mark the param as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Set a fallback used when no provider offers this param
    pub fn default_to(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn has_formula(&self) -> bool {
        self.formula.as_deref().is_some_and(|f| !f.is_empty())
    }

    /// The default value, if one is set and non-empty
    pub fn fallback(&self) -> Option<&str> {
        self.default_value.as_deref().filter(|v| !v.is_empty())
    }
}

/// A typed, named bundle of params a component provides, uses or needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub resource_type: String,
    pub params: ParamMap,
    pub status: Status,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
            ..Self::default()
        }
    }

    /// Add a param, replacing any param with the same name
    pub fn with_param(mut self, param: Param) -> Self {
        self.params.insert(param.name.clone(), param);
        self
    }

    /// Identity key of this resource
    pub fn key(&self) -> String {
        resource_key(&self.resource_type, &self.name)
    }

    /// Value of a param, if present
    pub fn value(&self, param: &str) -> Option<&str> {
        self.params.get(param).map(|p| p.value.as_str())
    }

    /// Set every param, and the resource itself, to `status`
    pub fn mark_status(&mut self, status: Status) {
        self.status = status;
        for param in self.params.values_mut() {
            param.status = status;
        }
    }
}

/// Build a resource map keyed by identity key
pub fn resource_map(resources: impl IntoIterator<Item = Resource>) -> ResourceMap {
    resources.into_iter().map(|r| (r.key(), r)).collect()
}

/// A declared unit of infrastructure
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    pub component_type: String,
    /// Name of the driver that renders this component
    pub driver: String,
    pub description: String,
    pub provides: ResourceMap,
    pub uses: ResourceMap,
    pub needs: ResourceMap,
    pub status: Status,
    pub needs_status: Status,
    pub uses_status: Status,
    pub provides_status: Status,
}

impl Component {
    pub fn new(component_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            component_type: component_type.into(),
            ..Self::default()
        }
    }

    pub fn providing(mut self, resource: Resource) -> Self {
        self.provides.insert(resource.key(), resource);
        self
    }

    pub fn using(mut self, resource: Resource) -> Self {
        self.uses.insert(resource.key(), resource);
        self
    }

    pub fn needing(mut self, resource: Resource) -> Self {
        self.needs.insert(resource.key(), resource);
        self
    }

    /// Key this component is stored under in a [`State`]
    pub fn key(&self) -> String {
        component_key(&self.component_type, &self.name)
    }

    pub fn is_environment(&self) -> bool {
        self.name == ENVIRONMENT_KEY
    }

    /// Reset the component, its needs and its provides to `status`.
    ///
    /// `uses` is left alone; its status only changes once formulas run.
    pub fn mark_status(&mut self, status: Status) {
        self.status = status;
        for resource in self.needs.values_mut() {
            resource.mark_status(status);
        }
        for resource in self.provides.values_mut() {
            resource.mark_status(status);
        }
        self.needs_status = status;
        self.provides_status = status;
    }

    /// Seed every param from its value: non-empty is resolved, empty is not.
    ///
    /// Resource and section flags follow their params.
    pub fn seed_status(&mut self) {
        self.needs_status = seed_resources(&mut self.needs);
        self.uses_status = seed_resources(&mut self.uses);
        self.provides_status = seed_resources(&mut self.provides);
    }

    /// Like [`Component::seed_status`], but for a component about to be
    /// re-resolved: needs params and formula params are derived during the
    /// pass, so they start out unresolved whatever value they carry.
    pub fn seed_for_resolution(&mut self) {
        self.seed_status();
        for resource in self.needs.values_mut() {
            resource.mark_status(Status::Unresolved);
        }
        if !self.needs.is_empty() {
            self.needs_status = Status::Unresolved;
        }
        if reset_formulas(&mut self.uses) {
            self.uses_status = Status::Unresolved;
        }
        if reset_formulas(&mut self.provides) {
            self.provides_status = Status::Unresolved;
        }
        self.status = Status::Unresolved;
    }
}

fn seed_resources(resources: &mut ResourceMap) -> Status {
    let mut section = Status::Resolved;
    for resource in resources.values_mut() {
        let mut status = Status::Resolved;
        for param in resource.params.values_mut() {
            param.status = Status::from_value(&param.value);
            if !param.status.is_resolved() {
                status = Status::Unresolved;
            }
        }
        resource.status = status;
        if !status.is_resolved() {
            section = Status::Unresolved;
        }
    }
    section
}

/// Mark every formula param unresolved; returns whether any was found
fn reset_formulas(resources: &mut ResourceMap) -> bool {
    let mut found = false;
    for resource in resources.values_mut() {
        let mut reset = false;
        for param in resource.params.values_mut().filter(|p| p.has_formula()) {
            param.status = Status::Unresolved;
            reset = true;
        }
        if reset {
            resource.status = Status::Unresolved;
            found = true;
        }
    }
    found
}

/// Platform-specific settings for a single provided resource (e.g. `isExternal`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Platform {
    pub params: ParamMap,
}

impl Platform {
    /// Whether `param` is set to the literal `"true"`
    pub fn flag(&self, param: &str) -> bool {
        self.params.get(param).is_some_and(|p| p.value == "true")
    }
}

/// Collect platform settings from the `platform.settings` resources in `uses`
pub fn platform_settings(uses: &ResourceMap) -> PlatformSettings {
    uses.values()
        .filter(|r| r.resource_type == PLATFORM_SETTINGS_TYPE)
        .map(|r| {
            (
                r.name.clone(),
                Platform {
                    params: r.params.clone(),
                },
            )
        })
        .collect()
}

/// The system of record: every known component, keyed by component key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub components: ComponentMap,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    /// A fresh state holding only the (empty) environment component
    pub fn new() -> Self {
        let mut components = ComponentMap::new();
        components.insert(ENVIRONMENT_KEY.to_string(), environment_component());
        Self { components }
    }

    /// The environment component, created on demand if it went missing
    pub fn environment_mut(&mut self) -> &mut Component {
        self.components
            .entry(ENVIRONMENT_KEY.to_string())
            .or_insert_with(environment_component)
    }

    pub fn environment(&self) -> Option<&Component> {
        self.components.get(ENVIRONMENT_KEY)
    }

    /// Add environment resources; newer ones replace older ones with the same key
    pub fn merge_environment(&mut self, provides: ResourceMap) {
        let env = self.environment_mut();
        for (key, resource) in provides {
            env.provides.insert(key, resource);
        }
    }

    /// Replace whole components with their resolved counterparts
    pub fn merge(&mut self, resolved: ComponentMap) {
        for (key, component) in resolved {
            self.components.insert(key, component);
        }
    }

    /// Insert a component under its own key
    pub fn insert(&mut self, component: Component) {
        self.components.insert(component.key(), component);
    }

    /// All components except the environment
    pub fn user_components(&self) -> impl Iterator<Item = (&String, &Component)> {
        self.components
            .iter()
            .filter(|(key, _)| key.as_str() != ENVIRONMENT_KEY)
    }

    /// Find the first component (in key order) providing `key`
    pub fn find_provider(&self, key: &str) -> Option<&Resource> {
        self.components.values().find_map(|c| c.provides.get(key))
    }
}

fn environment_component() -> Component {
    Component {
        name: ENVIRONMENT_KEY.to_string(),
        component_type: ENVIRONMENT_KEY.to_string(),
        ..Component::default()
    }
}
