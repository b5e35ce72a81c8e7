//! Fixture command implementation.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use stagehand_core::{ClusterFixture, ConsoleSink, ScenarioPlan, SharedSink};
use tracing::info;

use crate::error::CliError;
use crate::output::OutputFormat;

/// Fixture command executor.
#[derive(Debug)]
pub struct FixtureCommand {
    plan: PathBuf,
    sink: SharedSink,
}

impl FixtureCommand {
    /// Create a fixture command writing child output to the console.
    #[must_use]
    pub fn new(plan: impl Into<PathBuf>) -> Self {
        Self {
            plan: plan.into(),
            sink: Arc::new(ConsoleSink),
        }
    }

    /// Send child output to `sink` instead of the console.
    #[must_use]
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Run the fixture and return its exit status.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan cannot be loaded or the summary cannot be
    /// written.
    pub async fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<i32, CliError> {
        let plan = ScenarioPlan::from_file(&self.plan)?;
        info!(plan = %self.plan.display(), scenario = %plan.name, "loaded scenario plan");

        let report = ClusterFixture::from_plan(plan, Arc::clone(&self.sink))
            .run()
            .await;
        format.write(writer, &report)?;
        Ok(report.exit_code)
    }
}
