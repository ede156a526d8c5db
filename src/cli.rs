use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keystone")]
#[command(version)]
#[command(about = "Resolve component needs against provided resources and render deployment files", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Add or remove components, resolve, render and save the state
    Apply(ApplyArgs),

    /// Check that every need in a state file has a provider
    Validate(StateArgs),

    /// Print the components stored in a state file
    Show(ShowArgs),

    /// List the compiled-in drivers
    Drivers,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Apply
// ============================================================================

#[derive(Args)]
pub struct ApplyArgs {
    /// Component file(s) to add or replace
    #[arg(short = 'a', long = "add-component", visible_short_alias = 'r', value_name = "FILE")]
    pub add: Vec<PathBuf>,

    /// Key(s) of components to remove (`type:name`)
    #[arg(short = 'd', long = "delete-component", value_name = "KEY")]
    pub delete: Vec<String>,

    /// Environment file (driver, environment properties, platform settings)
    #[arg(short, long, value_name = "FILE")]
    pub environment: Option<PathBuf>,

    /// State file to read and update
    #[arg(short, long, value_name = "FILE", env = "KEYSTONE_STATE_FILE")]
    pub state: Option<PathBuf>,

    /// Directory the driver writes its output to
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Driver to use instead of the one named by the environment file
    #[arg(long)]
    pub driver: Option<String>,

    /// Resolution rounds allowed before giving up
    #[arg(long, value_name = "ROUNDS")]
    pub retry_budget: Option<usize>,

    /// Resolve only; do not render output or save the state
    #[arg(long)]
    pub dry_run: bool,
}

// ============================================================================
// State inspection
// ============================================================================

#[derive(Args)]
pub struct StateArgs {
    /// State file to read
    #[arg(short, long, value_name = "FILE", env = "KEYSTONE_STATE_FILE")]
    pub state: Option<PathBuf>,
}

#[derive(Args)]
pub struct ShowArgs {
    #[command(flatten)]
    pub state: StateArgs,

    /// Only show components whose key contains this text
    pub filter: Option<String>,

    /// Include formulas, defaults and required flags
    #[arg(short, long)]
    pub detailed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_args() {
        let cli = Cli::try_parse_from([
            "keystone",
            "-vv",
            "apply",
            "-a",
            "web.yaml",
            "-a",
            "db.yaml",
            "-d",
            "component.cache:redis",
            "-e",
            "env.yaml",
            "-s",
            "state.yaml",
            "--retry-budget",
            "5",
            "--dry-run",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.add, vec![PathBuf::from("web.yaml"), PathBuf::from("db.yaml")]);
        assert_eq!(args.delete, vec!["component.cache:redis".to_string()]);
        assert_eq!(args.environment, Some(PathBuf::from("env.yaml")));
        assert_eq!(args.state, Some(PathBuf::from("state.yaml")));
        assert_eq!(args.retry_budget, Some(5));
        assert!(args.dry_run);
    }

    #[test]
    fn test_show_filter() {
        let cli = Cli::try_parse_from(["keystone", "show", "web", "--detailed"]).unwrap();
        let Command::Show(args) = cli.command else {
            panic!("expected show");
        };
        assert_eq!(args.filter.as_deref(), Some("web"));
        assert!(args.detailed);
    }
}
