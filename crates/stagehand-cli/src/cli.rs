//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

/// Stagehand - integration-test orchestrator for multi-process clusters.
#[derive(Parser, Debug, Clone)]
#[command(name = "stagehand")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output format of the end-of-run summary.
    #[arg(short, long, value_enum, default_value_t = Format::Table, global = true)]
    pub format: Format,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace). `RUST_LOG` wins.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default log filter for the selected verbosity.
    #[must_use]
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run every scenario of a suite in order, stopping at the first failure.
    Suite(SuiteArgs),

    /// Run one cluster fixture from a scenario plan.
    Fixture(FixtureArgs),
}

/// Arguments for `stagehand suite`.
#[derive(Args, Debug, Clone)]
pub struct SuiteArgs {
    /// Repeat the suite until a scenario fails.
    #[arg(short = 'l', long = "loop")]
    pub looping: bool,

    /// Suite manifest.
    #[arg(short, long, env = "STAGEHAND_SUITE", default_value = "suite.toml")]
    pub manifest: PathBuf,
}

/// Arguments for `stagehand fixture`.
#[derive(Args, Debug, Clone)]
pub struct FixtureArgs {
    /// Scenario plan (TOML).
    pub plan: PathBuf,
}
