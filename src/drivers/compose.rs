//! Docker Compose driver
//!
//! Every provided resource is rendered from a template at
//! `<plugin dir>/templates/<resource type>.template`. Fragments are grouped
//! by the first dotted segment of the resource type and written out as one
//! `docker-compose.yaml`.

use anyhow::{Context, Result};
use resolver::{
    Binding, Component, ComponentMap, Driver, FormulaContext, PlatformSettings, Resource, State,
    evaluate,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const NAME: &str = "docker";
pub const OUTPUT_FILE: &str = "docker-compose.yaml";
pub const COMPOSE_VERSION: &str = "3.8";

/// Platform setting that marks a resource as managed outside this deployment
const IS_EXTERNAL: &str = "isExternal";

/// Templates shorter than this are treated as empty
const MIN_TEMPLATE_LEN: usize = 5;

/// Compose sections, keyed by the resource type prefix that feeds them
const SECTIONS: [(&str, &str); 2] = [("service", "services"), ("storage", "volumes")];

#[derive(Debug, Default)]
pub struct ComposeDriver;

impl ComposeDriver {
    pub fn new() -> Self {
        Self
    }
}

/// Rendered fragments, grouped by type prefix and keyed by resource name
type Fragments = BTreeMap<String, BTreeMap<String, String>>;

impl Driver for ComposeDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Docker Compose file from per-resource templates"
    }

    fn transform_components(
        &self,
        resolved: &ComponentMap,
        state: &State,
        plugin_dir: &Path,
        output_dir: &Path,
        platform: &PlatformSettings,
    ) -> Result<()> {
        let fragments = render_fragments(resolved, state, &plugin_dir.join("templates"), platform);

        let Some(content) = compose_file(&fragments) else {
            log::info!(
                "No services or volumes were generated. Skipping the generation of a compose file..."
            );
            return Ok(());
        };

        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create directory: {}", output_dir.display()))?;
        let path = output_dir.join(OUTPUT_FILE);
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        log::info!("Wrote {}", path.display());
        Ok(())
    }
}

/// Render every provided resource in the state, with freshly resolved
/// components winning. The environment component carries properties, not
/// deployable resources, and is skipped.
fn render_fragments(
    resolved: &ComponentMap,
    state: &State,
    templates: &Path,
    platform: &PlatformSettings,
) -> Fragments {
    let mut all: BTreeMap<&String, &Component> = state.components.iter().collect();
    all.extend(resolved.iter());

    let mut fragments = Fragments::new();
    for component in all.values().filter(|c| !c.is_environment()) {
        for resource in component.provides.values() {
            if let Some(rendered) = render_resource(component, resource, templates, platform) {
                let prefix = type_prefix(&resource.resource_type);
                fragments
                    .entry(prefix.to_string())
                    .or_default()
                    .insert(resource.name.clone(), rendered);
            }
        }
    }
    fragments
}

fn type_prefix(resource_type: &str) -> &str {
    resource_type.split('.').next().unwrap_or(resource_type)
}

fn render_resource(
    component: &Component,
    resource: &Resource,
    templates: &Path,
    platform: &PlatformSettings,
) -> Option<String> {
    if platform
        .get(&resource.name)
        .is_some_and(|settings| settings.flag(IS_EXTERNAL))
    {
        log::info!(
            "Based on the platform settings, a template will not be generated for: {} ({IS_EXTERNAL}=true)",
            resource.name
        );
        return None;
    }

    let path = templates.join(format!("{}.template", resource.resource_type));
    let template = match fs::read_to_string(&path) {
        Ok(template) => template,
        Err(e) => {
            log::warn!("Template not found for {}: {e}", resource.resource_type);
            return None;
        }
    };
    if template.len() < MIN_TEMPLATE_LEN {
        log::info!(
            "Empty template found. Output will be skipped for: {}",
            resource.resource_type
        );
        return None;
    }

    let ctx = FormulaContext::new()
        .bind("provides", Binding::Resource(resource))
        .bind("params", Binding::Params(&resource.params))
        .bind("uses", Binding::Resources(&component.uses))
        .bind("component", Binding::Component(component));
    match evaluate(&template, &ctx) {
        Ok(rendered) => Some(rendered),
        Err(e) => {
            log::warn!(
                "Error resolving a Docker Compose template for {}: {e}",
                resource.key()
            );
            None
        }
    }
}

/// Assemble the compose file; `None` when there is nothing to write
fn compose_file(fragments: &Fragments) -> Option<String> {
    let mut out = format!("version: \"{COMPOSE_VERSION}\"\n");
    let mut written = false;

    for (prefix, section) in SECTIONS {
        let Some(entries) = fragments.get(prefix).filter(|e| !e.is_empty()) else {
            continue;
        };
        out.push_str(section);
        out.push_str(":\n");
        for (name, body) in entries {
            out.push_str(&format!("  {name}:\n"));
            out.push_str(body);
            if !body.ends_with('\n') {
                out.push('\n');
            }
        }
        written = true;
    }

    for prefix in fragments.keys() {
        if !SECTIONS.iter().any(|(p, _)| p == prefix) {
            log::debug!("No compose section for resource type prefix '{prefix}'");
        }
    }

    written.then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use resolver::{Param, Platform};
    use tempfile::TempDir;

    const SERVICE_TEMPLATE: &str = "    image: {{ params.image }}\n    ports:\n      - \"{{ provides.port }}:{{ provides.port }}\"\n";
    const STORAGE_TEMPLATE: &str = "    driver: {{ params.driver }}\n";

    fn plugin_dir(temp: &TempDir) -> std::path::PathBuf {
        let dir = temp.path().join("plugins").join(NAME);
        let templates = dir.join("templates");
        fs::create_dir_all(&templates).unwrap();
        fs::write(templates.join("service.web.template"), SERVICE_TEMPLATE).unwrap();
        fs::write(templates.join("service.db.template"), SERVICE_TEMPLATE).unwrap();
        fs::write(templates.join("storage.volume.template"), STORAGE_TEMPLATE).unwrap();
        fs::write(templates.join("service.empty.template"), "\n").unwrap();
        dir
    }

    fn service(component: &str, resource_type: &str, name: &str, image: &str, port: &str) -> Component {
        Component::new("component", component).providing(
            Resource::new(resource_type, name)
                .with_param(Param::new("image", image))
                .with_param(Param::new("port", port)),
        )
    }

    fn transform(
        resolved: &ComponentMap,
        state: &State,
        platform: &PlatformSettings,
    ) -> (TempDir, Option<String>) {
        let temp = TempDir::new().unwrap();
        let plugins = plugin_dir(&temp);
        let out = temp.path().join("out");
        ComposeDriver::new()
            .transform_components(resolved, state, &plugins, &out, platform)
            .unwrap();
        let content = fs::read_to_string(out.join(OUTPUT_FILE)).ok();
        (temp, content)
    }

    fn map(components: impl IntoIterator<Item = Component>) -> ComponentMap {
        components.into_iter().map(|c| (c.key(), c)).collect()
    }

    #[test]
    fn test_renders_services_and_volumes() {
        let web = service("web", "service.web", "site", "nginx", "80");
        let data = Component::new("component", "data").providing(
            Resource::new("storage.volume", "pgdata").with_param(Param::new("driver", "local")),
        );

        let (_temp, content) = transform(&map([web, data]), &State::new(), &PlatformSettings::new());

        assert_eq!(
            content.unwrap(),
            "version: \"3.8\"\n\
             services:\n  site:\n    image: nginx\n    ports:\n      - \"80:80\"\n\
             volumes:\n  pgdata:\n    driver: local\n"
        );
    }

    #[test]
    fn test_resolved_components_replace_state_ones() {
        let mut state = State::new();
        state.insert(service("web", "service.web", "site", "nginx:old", "80"));
        state.insert(service("db", "service.db", "maindb", "postgres", "5432"));
        let resolved = map([service("web", "service.web", "site", "nginx:new", "80")]);

        let (_temp, content) = transform(&resolved, &state, &PlatformSettings::new());
        let content = content.unwrap();

        assert!(content.contains("image: nginx:new"));
        assert!(!content.contains("nginx:old"));
        // state components are regenerated too, in name order
        let db = content.find("  maindb:").unwrap();
        let site = content.find("  site:").unwrap();
        assert!(db < site);
    }

    #[test]
    fn test_external_resources_are_skipped() {
        let mut state = State::new();
        state.insert(service("db", "service.db", "maindb", "postgres", "5432"));
        let resolved = map([service("web", "service.web", "site", "nginx", "80")]);
        let mut external = Platform::default();
        external
            .params
            .insert("isExternal".into(), Param::new("isExternal", "true"));
        let platform = PlatformSettings::from([("maindb".to_string(), external)]);

        let (_temp, content) = transform(&resolved, &state, &platform);
        let content = content.unwrap();

        assert!(content.contains("  site:"));
        assert!(!content.contains("maindb"));
    }

    #[test]
    fn test_missing_and_empty_templates_write_nothing() {
        let unknown = service("api", "service.api", "api", "api", "9000");
        let empty = service("noop", "service.empty", "noop", "noop", "1");

        let (_temp, content) = transform(&map([unknown, empty]), &State::new(), &PlatformSettings::new());
        assert!(content.is_none());
    }

    #[test]
    fn test_render_failure_skips_resource() {
        let broken = Component::new("component", "broken")
            .providing(Resource::new("service.web", "broken").with_param(Param::new("port", "1")));
        let web = service("web", "service.web", "site", "nginx", "80");

        let (_temp, content) = transform(&map([broken, web]), &State::new(), &PlatformSettings::new());
        let content = content.unwrap();

        assert!(content.contains("  site:"));
        assert!(!content.contains("broken"));
    }

    #[test]
    fn test_environment_properties_are_not_rendered() {
        let temp = TempDir::new().unwrap();
        let templates = plugin_dir(&temp).join("templates");
        fs::write(
            templates.join(format!("{}.template", resolver::ENVIRONMENT_KEY)),
            "    message: {{ params.message }}\n",
        )
        .unwrap();
        let mut state = State::new();
        state.merge_environment(resolver::resource_map([
            Resource::new(resolver::ENVIRONMENT_KEY, "app").with_param(Param::new("message", "hi")),
        ]));
        let resolved = map([service("web", "service.web", "site", "nginx", "80")]);

        let fragments = render_fragments(&resolved, &state, &templates, &PlatformSettings::new());

        assert_eq!(fragments.keys().collect::<Vec<_>>(), vec!["service"]);
        assert!(fragments["service"].contains_key("site"));
    }

    #[test]
    fn test_environment_only_state_writes_nothing() {
        let mut state = State::new();
        state.merge_environment(resolver::resource_map([
            Resource::new(resolver::ENVIRONMENT_KEY, "app").with_param(Param::new("message", "hi")),
        ]));

        let (_temp, content) = transform(&ComponentMap::new(), &state, &PlatformSettings::new());
        assert!(content.is_none());
    }

    #[test]
    fn test_type_prefix() {
        assert_eq!(type_prefix("service.db.postgres"), "service");
        assert_eq!(type_prefix("storage"), "storage");
    }
}
