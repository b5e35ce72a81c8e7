//! Orchestration of multi-process integration tests.
//!
//! `stagehand-core` starts a registry and node in dependency order, waits for
//! each to announce readiness on its standard output, drives the cluster
//! through a short-lived admin CLI, runs client/server scenarios, and tears
//! everything down again. A suite runner strings scenarios together with
//! fail-fast exit-status propagation.
//!
//! # Building blocks
//!
//! - [`command`]: structured command lines with a single quoting routine
//! - [`launcher`]: child processes with piped streams and best-effort kill
//! - [`readiness`]: the pid / adapter-ready / named-ready handshake
//! - [`drain`]: per-pipe drain tasks with signal-and-join shutdown
//! - [`admin`]: typed admin verbs and the [`AdminRunner`] seam
//! - [`fixture`]: the cluster state machine
//! - [`suite`]: ordered suite execution, once or in a soak loop
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stagehand_core::{ClusterFixture, ConsoleSink, ScenarioPlan};
//!
//! # async fn example() -> stagehand_core::Result<()> {
//! let plan = ScenarioPlan::from_file("test/IcePack/simple/plan.toml")?;
//! let report = ClusterFixture::from_plan(plan, Arc::new(ConsoleSink)).run().await;
//! std::process::exit(report.exit_code);
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod command;
pub mod config;
pub mod drain;
mod error;
pub mod fixture;
pub mod launcher;
pub mod readiness;
pub mod suite;

pub use admin::{AdminClient, AdminClientConfig, AdminCommand, AdminOutput, AdminRunner};
pub use command::{CommandLine, quote_arg, split_command_line};
pub use config::{ClientStep, HarnessSettings, NodeSpec, ScenarioPlan, ServerStep, ServiceSpec};
pub use drain::{ConsoleSink, DrainHandle, DrainOutcome, MemorySink, OutputSink, SharedSink};
pub use error::{HarnessError, Result};
pub use fixture::{ClusterFixture, FixtureContext, FixtureReport, FixtureState};
pub use launcher::{ManagedProcess, ProcessLauncher};
pub use readiness::{ReadinessContract, ReadinessProtocol, ServiceKind};
pub use suite::{
    RunMode, ScenarioExecutor, ScriptExecutor, SuiteManifest, SuiteReport, SuiteRunner, TestCase,
    TestRecord,
};
