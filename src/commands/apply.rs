//! The apply workflow: load, resolve, render, save.

use anyhow::{Context as _, Result, bail};
use resolver::{
    Component, DriverRegistry, Resolver, components_to_resolve, platform_settings,
    validate_state,
};
use std::path::PathBuf;

use crate::Context;
use crate::cli::ApplyArgs;
use crate::config::Config;
use crate::documents;
use crate::drivers;
use crate::ui;

/// Everything one apply run needs, with config and flags already merged
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub add: Vec<PathBuf>,
    pub delete: Vec<String>,
    pub environment: Option<PathBuf>,
    pub state_file: PathBuf,
    pub output_dir: PathBuf,
    pub plugin_dir: PathBuf,
    /// Driver named on the command line
    pub driver: Option<String>,
    /// Driver used when neither the command line nor the environment names one
    pub default_driver: Option<String>,
    pub retry_budget: usize,
    pub dry_run: bool,
}

impl ApplyOptions {
    pub fn new(args: ApplyArgs, config: &Config) -> Result<Self> {
        Ok(Self {
            add: args.add,
            delete: args.delete,
            environment: args.environment,
            state_file: match args.state {
                Some(path) => path,
                None => config.state_file()?,
            },
            output_dir: args.output_dir.unwrap_or_else(|| config.output_dir()),
            plugin_dir: config.plugin_dir()?,
            driver: args.driver,
            default_driver: config.default_driver.clone(),
            retry_budget: args.retry_budget.unwrap_or(config.retry_budget),
            dry_run: args.dry_run,
        })
    }
}

/// What an apply run did
#[derive(Debug, Default)]
pub struct ApplySummary {
    pub driver: String,
    pub removed: Vec<String>,
    pub resolved: Vec<String>,
    pub saved: bool,
}

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let config = Config::load()?;
    let options = ApplyOptions::new(args, &config)?;
    log::info!("Plugin directory: {}", options.plugin_dir.display());

    let summary = apply(&options, &drivers::registry())?;

    if ctx.quiet {
        return Ok(());
    }

    ui::header("Apply");
    ui::kv("Driver", &summary.driver);
    ui::kv("State", &options.state_file.display().to_string());
    for key in &summary.removed {
        ui::dim(&format!("removed {key}"));
    }
    if ctx.verbose > 0 {
        for key in &summary.resolved {
            ui::dim(&format!("resolved {key}"));
        }
    }
    println!();
    if summary.saved {
        ui::success(&format!(
            "{} component(s) resolved and saved",
            summary.resolved.len()
        ));
    } else {
        ui::info(&format!(
            "Dry run: {} component(s) resolved; nothing written",
            summary.resolved.len()
        ));
    }
    Ok(())
}

/// Run one apply against `registry`.
///
/// Output is rendered and the state saved only after every component
/// resolved; any failure leaves the state file untouched.
pub fn apply(options: &ApplyOptions, registry: &DriverRegistry) -> Result<ApplySummary> {
    let added = options
        .add
        .iter()
        .map(|path| documents::load_component(path))
        .collect::<Result<Vec<Component>>>()?;

    let environment = match &options.environment {
        Some(path) => documents::load_environment(path)?,
        None => Component::default(),
    };

    let mut state = documents::load_state(&options.state_file)?;
    state.merge_environment(environment.provides.clone());

    let driver_name = select_driver(options, &environment)?;
    let driver = registry.get(&driver_name)?;
    let platform = platform_settings(&environment.uses);

    validate_state(&state).context("The current state is invalid")?;

    let plan = components_to_resolve(&mut state, added, &options.delete);

    let resolver = Resolver::with_retry_budget(options.retry_budget);
    log::info!(
        "Resolving components (retry budget {})...",
        resolver.retry_budget()
    );
    let resolved = resolver
        .resolve_all(&mut state, plan.components)
        .context("Resolution failed; the state was not changed")?;

    let mut summary = ApplySummary {
        driver: driver.name().to_string(),
        removed: plan.removed,
        resolved: resolved.keys().cloned().collect(),
        saved: false,
    };

    if options.dry_run {
        log::info!("Dry run; skipping output and state save");
        return Ok(summary);
    }

    log::info!("Transforming components...");
    driver
        .transform_components(
            &resolved,
            &state,
            &options.plugin_dir.join(driver.name()),
            &options.output_dir,
            &platform,
        )
        .with_context(|| format!("Driver '{}' failed", driver.name()))?;

    log::info!("Adding updated components to the state of the system...");
    state.merge(resolved);

    log::info!("Saving the system state...");
    documents::save_state(&options.state_file, &state)?;
    summary.saved = true;
    Ok(summary)
}

/// Command line first, then the environment file, then the config default
fn select_driver(options: &ApplyOptions, environment: &Component) -> Result<String> {
    if let Some(name) = &options.driver {
        return Ok(name.clone());
    }
    if !environment.driver.is_empty() {
        return Ok(environment.driver.clone());
    }
    match &options.default_driver {
        Some(name) => Ok(name.clone()),
        None => bail!("No driver selected: name one in the environment file or pass --driver"),
    }
}
