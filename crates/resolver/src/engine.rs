//! Resolution engine - fixed-point need resolution
//!
//! Each round walks every pending component and tries to satisfy its needs
//! from three provider sources. A component whose needs all resolve gets its
//! `uses` and then `provides` formulas evaluated and leaves the pending set.
//! There is no up-front cycle check: a component that cannot resolve within
//! the retry budget fails the whole call.

use crate::error::{Error, Result};
use crate::formula::{self, FormulaContext};
use crate::model::{
    Component, ComponentMap, DEFAULT_RETRY_BUDGET, ParamMap, Resource, ResourceMap, State, Status,
};
use std::collections::BTreeSet;

/// Runs resolution passes with a bounded number of rounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolver {
    retry_budget: usize,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    /// Create a resolver using [`DEFAULT_RETRY_BUDGET`]
    pub fn new() -> Self {
        Self {
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }

    /// Create a resolver with a custom round budget
    pub fn with_retry_budget(retry_budget: usize) -> Self {
        Self { retry_budget }
    }

    /// Rounds allowed beyond the first before resolution gives up
    pub fn retry_budget(&self) -> usize {
        self.retry_budget
    }

    /// Resolve `components` against `state`.
    ///
    /// Returns only the components that were resolved; merging them back
    /// into `state` is up to the caller. Param statuses in `state` are
    /// re-seeded from their values as a side effect. Fails with
    /// [`Error::Unresolvable`] when components are still pending after the
    /// retry budget, in which case nothing is returned.
    pub fn resolve_all(&self, state: &mut State, components: ComponentMap) -> Result<ComponentMap> {
        for component in state.components.values_mut() {
            component.seed_status();
        }

        let mut working = components;
        for component in working.values_mut() {
            component.seed_for_resolution();
        }

        let mut pending: BTreeSet<String> = working.keys().cloned().collect();
        let mut rounds = 0;

        while !pending.is_empty() {
            rounds += 1;
            let keys: Vec<String> = pending.iter().cloned().collect();
            for key in keys {
                if resolve_component(state, &mut working, &key) {
                    pending.remove(&key);
                }
            }

            if !pending.is_empty() && rounds > self.retry_budget {
                log::error!(
                    "Dependency loop encountered after {rounds} rounds; this is usually due to a missing resource"
                );
                return Err(Error::Unresolvable {
                    pending: pending.into_iter().collect(),
                    rounds,
                });
            }
        }

        log::debug!("Resolved {} component(s) in {rounds} round(s)", working.len());
        Ok(working)
    }
}

/// Resolve `components` against `state` with the default retry budget
pub fn resolve_all(state: &mut State, components: ComponentMap) -> Result<ComponentMap> {
    Resolver::new().resolve_all(state, components)
}

/// One attempt at a single pending component; true once it is fully resolved
fn resolve_component(state: &State, working: &mut ComponentMap, key: &str) -> bool {
    let Some(component) = working.get(key) else {
        return false;
    };
    log::debug!("Resolving needs for {} ({})", component.name, component.component_type);

    let outcome = match plan_needs(state, working, component) {
        Some(outcome) => outcome,
        None => {
            if let Some(component) = working.get_mut(key) {
                component.needs_status = Status::Unresolved;
            }
            return false;
        }
    };

    let Some(component) = working.get_mut(key) else {
        return false;
    };
    let needs_status = outcome.apply(component);
    log::debug!("Resulting status for {} needs: {needs_status:?}", component.name);
    if !needs_status.is_resolved() {
        return false;
    }

    resolve_uses(component);
    resolve_provides(component);
    component.status = Status::Resolved;
    true
}

/// Values found for a component's needs in one round
struct NeedsOutcome {
    /// (need key, param name, value) to write
    values: Vec<(String, String, String)>,
    /// Status of each need resource after this round
    statuses: Vec<(String, Status)>,
}

impl NeedsOutcome {
    fn apply(self, component: &mut Component) -> Status {
        for (need, param, value) in self.values {
            if let Some(param) = component
                .needs
                .get_mut(&need)
                .and_then(|r| r.params.get_mut(&param))
            {
                param.value = value;
                param.status = Status::Resolved;
            }
        }

        let mut overall = Status::Resolved;
        for (need, status) in self.statuses {
            if let Some(resource) = component.needs.get_mut(&need) {
                resource.status = status;
            }
            if !status.is_resolved() {
                overall = Status::Unresolved;
            }
        }
        component.needs_status = overall;
        overall
    }
}

/// Work out what this round can fill in for `component`'s needs.
///
/// Returns `None` when some need has no provider in any source.
fn plan_needs(state: &State, working: &ComponentMap, component: &Component) -> Option<NeedsOutcome> {
    let mut outcome = NeedsOutcome {
        values: Vec::new(),
        statuses: Vec::new(),
    };

    for (need_key, need) in &component.needs {
        let Some(provided) = combined_provider_params(state, working, need_key) else {
            log::info!(
                "Need missing for {} - {}: {}",
                component.name,
                component.component_type,
                need_key
            );
            return None;
        };

        let status = plan_need_params(component, need_key, need, &provided, &mut outcome.values);
        outcome.statuses.push((need_key.clone(), status));
    }

    Some(outcome)
}

/// Merge provider params for `key` from every source.
///
/// Later sources overwrite earlier ones: state, then components being
/// resolved, then the environment. `None` if no source provides `key`.
fn combined_provider_params<'a>(
    state: &'a State,
    working: &'a ComponentMap,
    key: &str,
) -> Option<ParamMapRef<'a>> {
    let sources = [
        state.find_provider(key),
        find_in(working, key),
        state.environment().and_then(|env| env.provides.get(key)),
    ];

    let mut found = false;
    let mut combined = ParamMapRef::new();
    for resource in sources.into_iter().flatten() {
        found = true;
        for (name, param) in &resource.params {
            combined.insert(name.as_str(), param);
        }
    }
    found.then_some(combined)
}

type ParamMapRef<'a> = std::collections::BTreeMap<&'a str, &'a crate::model::Param>;

fn find_in<'a>(components: &'a ComponentMap, key: &str) -> Option<&'a Resource> {
    components.values().find_map(|c| c.provides.get(key))
}

/// Fill unresolved params of one need; returns the need's resulting status
fn plan_need_params(
    component: &Component,
    need_key: &str,
    need: &Resource,
    provided: &ParamMapRef<'_>,
    values: &mut Vec<(String, String, String)>,
) -> Status {
    let mut status = Status::Resolved;

    for param in need.params.values() {
        if param.status.is_resolved() {
            continue;
        }

        match provided.get(param.name.as_str()) {
            Some(source) if source.status.is_resolved() => {
                values.push((need_key.to_string(), param.name.clone(), source.value.clone()));
            }
            Some(_) => status = Status::Unresolved,
            None => {
                if let Some(fallback) = param.fallback() {
                    values.push((need_key.to_string(), param.name.clone(), fallback.to_string()));
                } else if param.required {
                    log::warn!(
                        "Missing required parameter for {} - {}: {}",
                        component.name,
                        component.component_type,
                        param.name
                    );
                    status = Status::Unresolved;
                }
            }
        }
    }

    status
}

#[derive(Debug, Clone, Copy)]
enum Section {
    Uses,
    Provides,
}

impl Section {
    fn label(self) -> &'static str {
        match self {
            Self::Uses => "uses",
            Self::Provides => "provides",
        }
    }

    fn resources(self, component: &Component) -> &ResourceMap {
        match self {
            Self::Uses => &component.uses,
            Self::Provides => &component.provides,
        }
    }

    fn resources_mut(self, component: &mut Component) -> &mut ResourceMap {
        match self {
            Self::Uses => &mut component.uses,
            Self::Provides => &mut component.provides,
        }
    }
}

/// Evaluate the `uses` formulas of a component whose needs are resolved
pub fn resolve_uses(component: &mut Component) {
    evaluate_section(component, Section::Uses);
    component.uses_status = Status::Resolved;
}

/// Evaluate the `provides` formulas; run after [`resolve_uses`] so
/// provides formulas see computed uses values
pub fn resolve_provides(component: &mut Component) {
    evaluate_section(component, Section::Provides);
    component.provides_status = Status::Resolved;
}

/// Evaluate every formula param in `section`, one at a time, so each
/// formula sees the values written before it. Failures are logged and the
/// param keeps its previous value. Every resource in the section ends up
/// resolved either way.
fn evaluate_section(component: &mut Component, section: Section) {
    log::debug!(
        "Resolving any '{}' formulas for: {}",
        section.label(),
        component.component_type
    );

    let formulas: Vec<(String, String, String)> = section
        .resources(component)
        .iter()
        .flat_map(|(key, resource)| formula_params(key, &resource.params))
        .collect();

    for (key, name, text) in formulas {
        let rendered = formula::evaluate(&text, &FormulaContext::for_component(component));
        match rendered {
            Ok(value) => {
                if let Some(param) = section
                    .resources_mut(component)
                    .get_mut(&key)
                    .and_then(|r| r.params.get_mut(&name))
                {
                    param.value = value;
                }
            }
            Err(err) => {
                log::warn!(
                    "Error resolving a '{}' formula for {} ({key}.{name}): {err}",
                    section.label(),
                    component.name
                );
            }
        }
    }

    for resource in section.resources_mut(component).values_mut() {
        resource.mark_status(Status::Resolved);
    }
}

fn formula_params<'a>(
    key: &'a str,
    params: &'a ParamMap,
) -> impl Iterator<Item = (String, String, String)> + 'a {
    params.values().filter_map(move |p| {
        p.formula
            .as_ref()
            .filter(|f| !f.is_empty())
            .map(|f| (key.to_string(), p.name.clone(), f.clone()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ENVIRONMENT_KEY, Param, resource_map};

    const DB: &str = "service.db.postgres:maindb";

    fn db_provider(host: &str) -> Component {
        Component::new("component.db", "postgres").providing(
            Resource::new("service.db.postgres", "maindb")
                .with_param(Param::new("host", host))
                .with_param(Param::new("port", "5432")),
        )
    }

    fn web() -> Component {
        Component::new("component.web.app", "web").needing(
            Resource::new("service.db.postgres", "maindb").with_param(Param::new("host", "").required()),
        )
    }

    fn map(components: impl IntoIterator<Item = Component>) -> ComponentMap {
        components.into_iter().map(|c| (c.key(), c)).collect()
    }

    fn host(resolved: &ComponentMap, key: &str) -> String {
        resolved[key].needs[DB].params["host"].value.clone()
    }

    #[test]
    fn test_resolves_need_from_state() {
        let mut state = State::new();
        state.insert(db_provider("10.0.0.5"));

        let resolved = resolve_all(&mut state, map([web()])).unwrap();

        let web = &resolved["component.web.app:web"];
        assert_eq!(web.needs[DB].params["host"].value, "10.0.0.5");
        assert_eq!(web.needs[DB].params["host"].status, Status::Resolved);
        assert_eq!(web.status, Status::Resolved);
        assert_eq!(web.needs_status, Status::Resolved);
        assert_eq!(resolved.len(), 1, "state components are never returned");
    }

    #[test]
    fn test_resolves_in_first_round() {
        let mut state = State::new();
        state.insert(db_provider("10.0.0.5"));

        // A budget of zero still allows the first round
        let resolved = Resolver::with_retry_budget(0)
            .resolve_all(&mut state, map([web()]))
            .unwrap();
        assert_eq!(host(&resolved, "component.web.app:web"), "10.0.0.5");
    }

    #[test]
    fn test_precedence_environment_then_in_flight_then_state() {
        let mut state = State::new();
        state.insert(db_provider("from-state"));

        // In-flight beats state
        let resolved = resolve_all(&mut state, map([web(), db_provider("in-flight")])).unwrap();
        assert_eq!(host(&resolved, "component.web.app:web"), "in-flight");

        // Environment beats both
        state.merge_environment(resource_map([Resource::new("service.db.postgres", "maindb")
            .with_param(Param::new("host", "from-env"))]));
        let resolved = resolve_all(&mut state, map([web(), db_provider("in-flight")])).unwrap();
        assert_eq!(host(&resolved, "component.web.app:web"), "from-env");
    }

    #[test]
    fn test_environment_keyed_provider() {
        let mut state = State::new();
        state.merge_environment(resource_map([Resource::new(ENVIRONMENT_KEY, "app")
            .with_param(Param::new("app_message", "Hello"))]));
        let consumer = Component::new("component.web.app", "welcome").needing(
            Resource::new(ENVIRONMENT_KEY, "app").with_param(Param::new("app_message", "")),
        );

        let resolved = resolve_all(&mut state, map([consumer])).unwrap();
        assert_eq!(
            resolved["component.web.app:welcome"].needs["environment.properties:app"].params
                ["app_message"]
                .value,
            "Hello"
        );
    }

    #[test]
    fn test_default_fallback() {
        let mut state = State::new();
        state.insert(db_provider("10.0.0.5"));
        let consumer = Component::new("component.web.app", "web").needing(
            Resource::new("service.db.postgres", "maindb")
                .with_param(Param::new("host", ""))
                .with_param(Param::new("sslmode", "").default_to("require")),
        );

        let resolved = resolve_all(&mut state, map([consumer])).unwrap();
        let need = &resolved["component.web.app:web"].needs[DB];
        assert_eq!(need.params["sslmode"].value, "require");
        assert_eq!(need.params["sslmode"].status, Status::Resolved);
    }

    #[test]
    fn test_optional_param_without_provider_does_not_block() {
        let mut state = State::new();
        state.insert(db_provider("10.0.0.5"));
        let consumer = Component::new("component.web.app", "web").needing(
            Resource::new("service.db.postgres", "maindb").with_param(Param::new("replica", "")),
        );

        let resolved = resolve_all(&mut state, map([consumer])).unwrap();
        assert_eq!(resolved["component.web.app:web"].status, Status::Resolved);
    }

    #[test]
    fn test_required_without_default_exhausts_budget() {
        let mut state = State::new();
        state.insert(db_provider("10.0.0.5"));
        let consumer = Component::new("component.web.app", "web").needing(
            Resource::new("service.db.postgres", "maindb")
                .with_param(Param::new("password", "").required()),
        );

        let err = Resolver::with_retry_budget(3)
            .resolve_all(&mut state, map([consumer]))
            .unwrap_err();
        match err {
            Error::Unresolvable { pending, rounds } => {
                assert_eq!(pending, vec!["component.web.app:web".to_string()]);
                assert_eq!(rounds, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_provider_is_unresolvable() {
        let mut state = State::new();
        let err = resolve_all(&mut state, map([web()])).unwrap_err();
        assert!(matches!(err, Error::Unresolvable { rounds, .. } if rounds == DEFAULT_RETRY_BUDGET + 1));
    }

    #[test]
    fn test_cycle_is_unresolvable() {
        let a = Component::new("component", "a")
            .providing(Resource::new("svc", "a").with_param(Param::with_formula("url", "{{ needs[\"svc:b\"].url }}")))
            .needing(Resource::new("svc", "b").with_param(Param::new("url", "").required()));
        let b = Component::new("component", "b")
            .providing(Resource::new("svc", "b").with_param(Param::with_formula("url", "{{ needs[\"svc:a\"].url }}")))
            .needing(Resource::new("svc", "a").with_param(Param::new("url", "").required()));

        let mut state = State::new();
        let err = Resolver::with_retry_budget(5)
            .resolve_all(&mut state, map([a, b]))
            .unwrap_err();
        match err {
            Error::Unresolvable { pending, .. } => assert_eq!(pending.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_chain_through_in_flight_formulas() {
        // db -> api (provides url from db host) -> web (needs api url)
        let api = Component::new("component.api", "api")
            .providing(Resource::new("service.http", "api").with_param(Param::with_formula(
                "url",
                "http://{{ needs[\"service.db.postgres:maindb\"].host }}/api",
            )))
            .needing(Resource::new("service.db.postgres", "maindb").with_param(Param::new("host", "")));
        let front = Component::new("component.web.app", "front")
            .needing(Resource::new("service.http", "api").with_param(Param::new("url", "").required()));

        let mut state = State::new();
        let resolved = resolve_all(&mut state, map([front, api, db_provider("db.local")])).unwrap();

        assert_eq!(
            resolved["component.web.app:front"].needs["service.http:api"].params["url"].value,
            "http://db.local/api"
        );
    }

    #[test]
    fn test_stale_formula_value_is_not_used_before_recompute() {
        let api = Component::new("component.api", "api")
            .providing(Resource::new("service.http", "api").with_param(Param {
                value: "http://stale/api".into(),
                ..Param::with_formula("url", "http://{{ needs[\"service.db.postgres:maindb\"].host }}/api")
            }))
            .needing(Resource::new("service.db.postgres", "maindb").with_param(Param::new("host", "")));
        let front = Component::new("component.web.app", "front")
            .needing(Resource::new("service.http", "api").with_param(Param::new("url", "")));

        let mut state = State::new();
        state.insert(db_provider("fresh"));
        let resolved = resolve_all(&mut state, map([front, api])).unwrap();

        assert_eq!(
            resolved["component.web.app:front"].needs["service.http:api"].params["url"].value,
            "http://fresh/api"
        );
    }

    #[test]
    fn test_provides_formula_sees_computed_uses() {
        let component = Component::new("component.web.app", "web")
            .needing(Resource::new("service.db.postgres", "maindb").with_param(Param::new("host", "")))
            .using(Resource::new("config", "dsn").with_param(Param::with_formula(
                "value",
                "postgres://{{ needs[\"service.db.postgres:maindb\"].host }}",
            )))
            .providing(Resource::new("service.web", "site").with_param(Param::with_formula(
                "dsn",
                "{{ component.uses[\"config:dsn\"].value }}?app={{ component.name }}",
            )));

        let mut state = State::new();
        state.insert(db_provider("10.0.0.5"));
        let resolved = resolve_all(&mut state, map([component])).unwrap();

        let web = &resolved["component.web.app:web"];
        assert_eq!(web.uses["config:dsn"].params["value"].value, "postgres://10.0.0.5");
        assert_eq!(
            web.provides["service.web:site"].params["dsn"].value,
            "postgres://10.0.0.5?app=web"
        );
        assert_eq!(web.uses_status, Status::Resolved);
        assert_eq!(web.provides_status, Status::Resolved);
    }

    #[test]
    fn test_formula_failure_keeps_prior_value() {
        let component = Component::new("component.web.app", "web").providing(
            Resource::new("service.web", "site")
                .with_param(Param {
                    value: "previous".into(),
                    ..Param::with_formula("url", "{{ needs[\"service.cache:redis\"].host }}")
                })
                .with_param(Param::with_formula("broken", "{{ component.name")),
        );

        let mut state = State::new();
        let resolved = resolve_all(&mut state, map([component])).unwrap();

        let site = &resolved["component.web.app:web"].provides["service.web:site"];
        assert_eq!(site.params["url"].value, "previous");
        assert_eq!(site.params["url"].status, Status::Resolved);
        assert_eq!(site.params["broken"].value, "");
        assert_eq!(resolved["component.web.app:web"].status, Status::Resolved);
    }

    #[test]
    fn test_uses_formula_failure_keeps_prior_value() {
        let component = Component::new("component.web.app", "web")
            .using(Resource::new("config", "dsn").with_param(Param {
                value: "postgres://previous".into(),
                ..Param::with_formula("value", "{{ needs[\"service.cache:redis\"].host }}")
            }))
            .providing(Resource::new("service.web", "site").with_param(Param::with_formula(
                "dsn",
                "{{ component.uses[\"config:dsn\"].value }}",
            )));

        let mut state = State::new();
        let resolved = resolve_all(&mut state, map([component])).unwrap();

        let web = &resolved["component.web.app:web"];
        let dsn = &web.uses["config:dsn"].params["value"];
        assert_eq!(dsn.value, "postgres://previous");
        assert_eq!(dsn.status, Status::Resolved);
        assert_eq!(web.uses["config:dsn"].status, Status::Resolved);
        assert_eq!(web.uses_status, Status::Resolved);
        assert_eq!(web.provides["service.web:site"].params["dsn"].value, "postgres://previous");
        assert_eq!(web.status, Status::Resolved);
    }

    #[test]
    fn test_precedence_is_per_param() {
        let mut state = State::new();
        state.insert(
            Component::new("component.db", "postgres").providing(
                Resource::new("service.db.postgres", "maindb")
                    .with_param(Param::new("host", "state-host"))
                    .with_param(Param::new("port", "state-port"))
                    .with_param(Param::new("user", "state-user")),
            ),
        );
        state.merge_environment(resource_map([Resource::new("service.db.postgres", "maindb")
            .with_param(Param::new("host", "env-host"))]));
        let replica = Component::new("component.db", "replica").providing(
            Resource::new("service.db.postgres", "maindb").with_param(Param::new("port", "fl-port")),
        );
        let consumer = Component::new("component.web.app", "web").needing(
            Resource::new("service.db.postgres", "maindb")
                .with_param(Param::new("host", ""))
                .with_param(Param::new("port", ""))
                .with_param(Param::new("user", "")),
        );

        let resolved = resolve_all(&mut state, map([consumer, replica])).unwrap();

        let need = &resolved["component.web.app:web"].needs[DB];
        assert_eq!(need.params["host"].value, "env-host");
        assert_eq!(need.params["port"].value, "fl-port");
        assert_eq!(need.params["user"].value, "state-user");
    }

    #[test]
    fn test_idempotent() {
        let mut state = State::new();
        state.insert(db_provider("10.0.0.5"));

        let first = resolve_all(&mut state, map([web()])).unwrap();
        let second = resolve_all(&mut state, first.clone()).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_edited_provider_value_propagates() {
        let mut state = State::new();
        state.insert(db_provider("10.0.0.5"));
        let first = resolve_all(&mut state, map([web()])).unwrap();
        state.merge(first.clone());

        state.insert(db_provider("10.0.0.9"));
        let second = resolve_all(&mut state, first).unwrap();
        assert_eq!(host(&second, "component.web.app:web"), "10.0.0.9");
    }

    #[test]
    fn test_state_statuses_reseeded() {
        let mut state = State::new();
        state.insert(db_provider(""));
        state
            .components
            .get_mut("component.db:postgres")
            .unwrap()
            .mark_status(Status::Resolved);

        let err = Resolver::with_retry_budget(1).resolve_all(&mut state, map([web()]));
        assert!(err.is_err(), "empty provider value must not satisfy a need");
        assert_eq!(
            state.components["component.db:postgres"].provides[DB].params["host"].status,
            Status::Unresolved
        );
    }
}
