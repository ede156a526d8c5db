//! Driver contract - turning resolved components into output artifacts
//!
//! The engine never renders anything itself. After a successful resolution
//! the caller hands the resolved components to exactly one [`Driver`],
//! chosen by name from a [`DriverRegistry`] of compiled-in variants.

use crate::error::{Error, Result};
use crate::model::{ComponentMap, PlatformSettings, State};
use std::fmt;
use std::path::Path;

/// An output generator for resolved components
pub trait Driver: fmt::Debug {
    /// Name the environment file selects this driver by
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str {
        ""
    }

    /// Render `resolved` (merged over the components already in `state`)
    /// into `output_dir`.
    ///
    /// `plugin_dir` holds the driver's own assets (templates and the like);
    /// `platform` carries per-resource platform settings the driver may
    /// interpret.
    fn transform_components(
        &self,
        resolved: &ComponentMap,
        state: &State,
        plugin_dir: &Path,
        output_dir: &Path,
        platform: &PlatformSettings,
    ) -> anyhow::Result<()>;
}

/// A boxed driver for type-erased storage
pub type BoxedDriver = Box<dyn Driver>;

/// The set of drivers compiled into the binary
#[derive(Debug, Default)]
pub struct DriverRegistry {
    drivers: Vec<BoxedDriver>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver; a later driver with the same name replaces the earlier one
    pub fn register(&mut self, driver: BoxedDriver) {
        self.drivers.retain(|d| d.name() != driver.name());
        self.drivers.push(driver);
    }

    pub fn with(mut self, driver: BoxedDriver) -> Self {
        self.register(driver);
        self
    }

    /// Look a driver up by name
    pub fn get(&self, name: &str) -> Result<&dyn Driver> {
        self.drivers
            .iter()
            .find(|d| d.name() == name)
            .map(|d| &**d)
            .ok_or_else(|| Error::UnknownDriver {
                name: name.to_string(),
                available: self.names().map(str::to_string).collect(),
            })
    }

    /// Names of all registered drivers
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drivers.iter().map(|d| d.name())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Driver> {
        self.drivers.iter().map(|d| &**d)
    }
}
