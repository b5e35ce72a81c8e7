//! Suite command implementation.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use stagehand_core::{ConsoleSink, RunMode, SharedSink, SuiteManifest, SuiteRunner};
use tracing::error;

use crate::error::CliError;
use crate::output::OutputFormat;

/// Suite command executor.
#[derive(Debug)]
pub struct SuiteCommand {
    manifest: PathBuf,
    mode: RunMode,
    sink: SharedSink,
}

impl SuiteCommand {
    /// Create a suite command writing child diagnostics to the console.
    #[must_use]
    pub fn new(manifest: impl Into<PathBuf>, looping: bool) -> Self {
        Self {
            manifest: manifest.into(),
            mode: if looping { RunMode::Loop } else { RunMode::Once },
            sink: Arc::new(ConsoleSink),
        }
    }

    /// Send diagnostics to `sink` instead of the console.
    #[must_use]
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Execute the suite and return its exit status.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be loaded or the summary
    /// cannot be written.
    pub async fn execute<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<i32, CliError> {
        let manifest = SuiteManifest::from_file(&self.manifest)?;
        let report = SuiteRunner::new(manifest, Arc::clone(&self.sink))
            .run(self.mode)
            .await;

        if let Some(e) = report.failure_error() {
            error!(error = %e, iterations = report.iterations, "suite failed");
        }
        format.write(writer, &report)?;
        Ok(report.exit_code())
    }
}
