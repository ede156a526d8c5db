//! Impact analysis - which existing components must be re-resolved
//!
//! Starting from a set of changed or added components, collect every state
//! component whose needs are satisfied by something the set provides, and
//! repeat until a pass adds nothing. The result is the reverse-dependency
//! closure of the change.

use crate::model::{Component, ComponentMap, ENVIRONMENT_KEY, State, Status};
use crate::validate::remove_components;

/// Compute the components that need re-resolution after `changed`.
///
/// Every component in the result is reset to [`Status::Unresolved`].
/// Discovered components are copied out of `state`; `state` is not touched.
pub fn impacted_components(state: &State, changed: ComponentMap) -> ComponentMap {
    let mut impacted = changed;
    for component in impacted.values_mut() {
        component.mark_status(Status::Unresolved);
    }

    loop {
        let additions: Vec<String> = state
            .components
            .iter()
            .filter(|(key, _)| key.as_str() != ENVIRONMENT_KEY && !impacted.contains_key(*key))
            .filter_map(|(key, existing)| {
                let need = existing
                    .needs
                    .keys()
                    .find(|need| impacted.values().any(|c| c.provides.contains_key(*need)))?;
                log::info!("Component found which needs recalc: {key} - {need}");
                Some(key.clone())
            })
            .collect();

        if additions.is_empty() {
            log::debug!("No new dependencies found; {} component(s) impacted", impacted.len());
            return impacted;
        }

        log::debug!("Dependencies found on existing components; scanning again");
        for key in additions {
            if let Some(existing) = state.components.get(&key) {
                let mut component = existing.clone();
                component.mark_status(Status::Unresolved);
                impacted.insert(key, component);
            }
        }
    }
}

/// What an apply run resolves, and what it deleted on the way
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionPlan {
    pub components: ComponentMap,
    /// Keys actually removed from the state; unknown keys and the
    /// environment component are not listed
    pub removed: Vec<String>,
}

/// Pick the components an apply run has to resolve.
///
/// With deletions, the named components are removed from `state` and every
/// remaining component is re-resolved together with the additions, since a
/// removal can invalidate needs anywhere. Without deletions only the impact
/// closure of the additions is resolved.
pub fn components_to_resolve<S: AsRef<str>>(
    state: &mut State,
    added: Vec<Component>,
    deleted: &[S],
) -> ResolutionPlan {
    let added: ComponentMap = added.into_iter().map(|c| (c.key(), c)).collect();

    if deleted.is_empty() {
        log::info!("Locating impacted components which must be resolved...");
        return ResolutionPlan {
            components: impacted_components(state, added),
            removed: Vec::new(),
        };
    }

    let removed = remove_components(state, deleted);
    let mut components: ComponentMap = state
        .user_components()
        .map(|(key, component)| (key.clone(), component.clone()))
        .collect();
    components.extend(added);
    ResolutionPlan {
        components,
        removed,
    }
}
