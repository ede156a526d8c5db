//! Read-only commands: validate, show, drivers

use anyhow::Result;
use colored::Colorize;
use resolver::{Component, Resource, State, validate_state};
use std::path::PathBuf;

use crate::Context;
use crate::cli::{ShowArgs, StateArgs};
use crate::config::Config;
use crate::documents;
use crate::drivers;
use crate::ui;

fn state_file(args: &StateArgs) -> Result<PathBuf> {
    match &args.state {
        Some(path) => Ok(path.clone()),
        None => Config::load()?.state_file(),
    }
}

pub fn validate(ctx: &Context, args: StateArgs) -> Result<()> {
    let path = state_file(&args)?;
    let state = documents::load_state(&path)?;
    validate_state(&state)?;

    if !ctx.quiet {
        ui::success(&format!(
            "{} is valid ({} component(s))",
            path.display(),
            state.user_components().count()
        ));
    }
    Ok(())
}

pub fn show(_ctx: &Context, args: ShowArgs) -> Result<()> {
    let path = state_file(&args.state)?;
    let state = documents::load_state(&path)?;

    ui::header(&format!("State: {}", path.display()));

    if let Some(env) = state.environment().filter(|e| !e.provides.is_empty()) {
        ui::section("Environment");
        for resource in env.provides.values() {
            print_resource(resource, args.detailed);
        }
    }

    let selected = select(&state, args.filter.as_deref());
    if selected.is_empty() {
        println!();
        ui::info("No components");
        return Ok(());
    }

    for component in selected {
        print_component(component, args.detailed);
    }
    Ok(())
}

pub fn list_drivers(_ctx: &Context) -> Result<()> {
    ui::header("Drivers");
    for driver in drivers::registry().iter() {
        println!("  {}  {}", driver.name().bold(), driver.description().dimmed());
    }
    Ok(())
}

/// User components whose key contains `filter`
fn select<'a>(state: &'a State, filter: Option<&str>) -> Vec<&'a Component> {
    state
        .user_components()
        .filter(|(key, _)| filter.is_none_or(|f| key.contains(f)))
        .map(|(_, component)| component)
        .collect()
}

fn print_component(component: &Component, detailed: bool) {
    ui::section(&component.key());
    if !component.description.is_empty() {
        ui::dim(&component.description);
    }
    if !component.driver.is_empty() {
        ui::kv("driver", &component.driver);
    }

    for (label, resources) in [
        ("provides", &component.provides),
        ("uses", &component.uses),
        ("needs", &component.needs),
    ] {
        if resources.is_empty() {
            continue;
        }
        println!("  {}", label.bold());
        for resource in resources.values() {
            print_resource(resource, detailed);
        }
    }
}

fn print_resource(resource: &Resource, detailed: bool) {
    println!("    {}", resource.key().cyan());
    for param in resource.params.values() {
        let value = if param.value.is_empty() {
            "(unset)".dimmed().to_string()
        } else {
            param.value.clone()
        };
        println!("      {}: {}", param.name.dimmed(), value);
        if !detailed {
            continue;
        }
        if let Some(formula) = param.formula.as_deref().filter(|f| !f.is_empty()) {
            println!("        {} {}", "formula".dimmed(), formula);
        }
        if let Some(default) = param.fallback() {
            println!("        {} {}", "default".dimmed(), default);
        }
        if param.required {
            println!("        {}", "required".yellow());
        }
    }
}
