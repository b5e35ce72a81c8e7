//! Output formatting for end-of-run summaries.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;

use serde::Serialize;
use stagehand_core::{FixtureReport, SuiteReport};

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Write a serializable value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        Ok(())
    }

    /// Write a serializable value to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_string<T>(&self, value: &T) -> Result<String, CliError>
    where
        T: Serialize + TableDisplay,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("UTF-8 error: {e}")))
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

fn verdict(exit_code: i32) -> String {
    if exit_code == 0 {
        "✓ passed".to_string()
    } else {
        format!("✗ failed (exit status {exit_code})")
    }
}

impl TableDisplay for SuiteReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer)?;
        writeln!(writer, "Suite Summary")?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Passes:           {}", self.iterations)?;
        writeln!(writer, "Result:           {}", verdict(self.exit_code()))?;
        writeln!(writer)?;

        if self.records.is_empty() {
            writeln!(writer, "No tests ran")?;
            return Ok(());
        }

        writeln!(writer, "{:<40}  {:>6}", "TEST", "STATUS")?;
        writeln!(writer, "{}", "─".repeat(48))?;
        for record in &self.records {
            writeln!(writer, "{:<40}  {:>6}", record.name, record.exit_code)?;
        }

        if let Some(failure) = &self.failure {
            writeln!(writer)?;
            writeln!(writer, "Failed in:        {}", failure.directory.display())?;
        }
        Ok(())
    }
}

impl TableDisplay for FixtureReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer)?;
        writeln!(writer, "Fixture: {}", self.scenario)?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Reached:          {}", self.reached)?;
        writeln!(writer, "Result:           {}", verdict(self.exit_code))?;
        if let Some(error) = &self.error {
            writeln!(writer, "Error:            {error}")?;
        }
        if !self.killed.is_empty() {
            writeln!(writer, "Killed:           {}", self.killed.join(", "))?;
        }
        Ok(())
    }
}
