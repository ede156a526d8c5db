//! # Resolver
//!
//! Need/provide resolution for declarative infrastructure components.
//!
//! Components declare the resources they *provide*, *use* and *need*. This
//! crate matches every need against provider params, evaluates computed
//! (formula) values once a component's needs are complete, and repeats until
//! nothing is left pending or the retry budget runs out.
//!
//! ## Core Concepts
//!
//! - **State**: every known component, plus the synthetic environment component
//! - **Component**: a unit of infrastructure with `provides`, `uses` and `needs`
//! - **Resource**: a typed, named bundle of params, matched by identity key (`type:name`)
//! - **Resolver**: the fixed-point engine
//! - **Driver**: renders resolved components into output artifacts
//!
//! ## Example
//!
//! ```
//! use resolver::{Component, Param, Resource, State, resolve_all};
//!
//! let mut state = State::new();
//! state.insert(
//!     Component::new("component.db", "postgres").providing(
//!         Resource::new("service.db.postgres", "maindb").with_param(Param::new("host", "10.0.0.5")),
//!     ),
//! );
//!
//! let web = Component::new("component.web.app", "web").needing(
//!     Resource::new("service.db.postgres", "maindb").with_param(Param::new("host", "").required()),
//! );
//!
//! let resolved = resolve_all(&mut state, [(web.key(), web)].into_iter().collect())?;
//! let host = &resolved["component.web.app:web"].needs["service.db.postgres:maindb"].params["host"];
//! assert_eq!(host.value, "10.0.0.5");
//!
//! state.merge(resolved);
//! # Ok::<(), resolver::Error>(())
//! ```
//!
//! ## Incremental runs
//!
//! [`impacted_components`] computes which existing components depend,
//! directly or transitively, on a changed set; [`components_to_resolve`]
//! wraps the choice between that closure and a full re-resolution after
//! deletions, returning a [`ResolutionPlan`] that also lists the removed
//! keys. [`validate_state`] checks that every need in a state has a
//! provider before any of this runs.

pub mod driver;
pub mod engine;
pub mod error;
pub mod formula;
pub mod impact;
pub mod model;
pub mod validate;

// Re-export main types at crate root
pub use driver::{BoxedDriver, Driver, DriverRegistry};
pub use engine::{Resolver, resolve_all};
pub use error::{Error, Result};
pub use formula::{Binding, Formula, FormulaContext, FormulaError, evaluate};
pub use impact::{ResolutionPlan, components_to_resolve, impacted_components};
pub use model::{
    Component, ComponentMap, DEFAULT_RETRY_BUDGET, ENVIRONMENT_KEY, ID_SEPARATOR,
    PLATFORM_SETTINGS_TYPE, Param, ParamMap, Platform, PlatformSettings, Resource, ResourceMap,
    State, Status, component_key, platform_settings, resource_key, resource_map,
};
pub use validate::{remove_components, validate_state};
