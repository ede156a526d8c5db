//! State integrity checks and component removal

use crate::error::{Error, Result};
use crate::model::{ENVIRONMENT_KEY, State};
use std::collections::BTreeSet;

/// Check that every need in `state` is matched by some provider in `state`.
///
/// This is a structural existence check only: param values, statuses and
/// formulas are not inspected. Reports the first unmatched need in key order.
pub fn validate_state(state: &State) -> Result<()> {
    log::info!("Validating the integrity of the current state...");

    let provided: BTreeSet<&str> = state
        .components
        .values()
        .flat_map(|c| c.provides.keys())
        .map(String::as_str)
        .collect();

    for component in state.components.values() {
        if let Some(need) = component
            .needs
            .keys()
            .find(|need| !provided.contains(need.as_str()))
        {
            return Err(Error::UnmatchedNeed {
                component: component.name.clone(),
                need: need.clone(),
            });
        }
    }

    log::info!("State validation complete");
    Ok(())
}

/// Delete the components stored under `keys`.
///
/// Dangling needs elsewhere are left in place for [`validate_state`] to
/// report on the next run. The environment component cannot be removed.
/// Returns the keys that were actually removed.
pub fn remove_components<I, S>(state: &mut State, keys: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut removed = Vec::new();
    for key in keys {
        let key = key.as_ref();
        if key == ENVIRONMENT_KEY {
            log::warn!("Refusing to delete the environment component");
            continue;
        }
        log::info!("About to delete: {key}");
        if state.components.remove(key).is_some() {
            removed.push(key.to_string());
        } else {
            log::warn!("No component to delete under '{key}'");
        }
    }
    removed
}
