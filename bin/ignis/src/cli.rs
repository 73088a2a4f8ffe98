use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// How command results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "ignis")]
#[command(
    author,
    version,
    about = "Plan and track declarative smart-contract deployments"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "IGNIS_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file.
    ///
    /// Defaults to `Ignis.toml` in the current directory. Values can be overridden
    /// with `IGNIS_`-prefixed environment variables.
    #[arg(short, long, alias = "conf", env = "IGNIS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write the effective configuration to the config file.
    Init {
        /// Overwrite an existing config file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Build, validate and lower a module manifest, then print its execution plan.
    Plan {
        /// The module manifest (TOML).
        manifest: PathBuf,

        /// Output format.
        #[arg(long, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Run a module manifest against a simulated chain, recording the configured journal.
    ///
    /// An existing journal for the same plan is resumed.
    Simulate {
        /// The module manifest (TOML).
        manifest: PathBuf,

        /// Labels of vertices whose transaction should revert (e.g. `MyModule:bar`).
        #[arg(long = "revert", value_name = "LABEL")]
        revert: Vec<String>,

        /// Start a fresh journal instead of resuming the existing one.
        #[arg(long, default_value_t = false)]
        fresh: bool,
    },

    /// Replay the configured journal and print the state of each vertex.
    Status {
        /// Print the module results as JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}
