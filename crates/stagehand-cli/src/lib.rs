//! # stagehand-cli
//!
//! Command-line front end for `stagehand-core`.
//!
//! Provides commands for:
//! - Running an ordered suite of scenario scripts, once or in a soak loop
//! - Running one cluster fixture from a scenario plan
//!
//! Both commands exit with the status of the first failure, so a suite
//! script can simply call `stagehand fixture plan.toml` and a CI job can call
//! `stagehand suite`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{Cli, Commands, FixtureArgs, Format, SuiteArgs};
pub use error::CliError;
pub use output::OutputFormat;
