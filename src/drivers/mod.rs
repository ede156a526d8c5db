//! Drivers compiled into the binary

pub mod compose;

use resolver::DriverRegistry;

/// Registry holding every compiled-in driver
pub fn registry() -> DriverRegistry {
    DriverRegistry::new().with(Box::new(compose::ComposeDriver::new()))
}
