//! Error taxonomy for the harness.
//!
//! Every failure is terminal for its enclosing scope and ends up as a process
//! exit status; [`HarnessError::exit_code`] defines that mapping.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while orchestrating processes.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Process creation failed. Surfaces on the first readiness read.
    #[error("failed to spawn '{label}': {reason}")]
    SpawnFailure {
        /// Label of the process that could not be started.
        label: String,
        /// Reason reported by the operating system.
        reason: String,
    },

    /// A readiness line did not have the expected shape.
    #[error("protocol violation from '{label}': expected {expected}, got {actual:?}")]
    ProtocolViolation {
        /// Label of the offending process.
        label: String,
        /// Description of the expected marker.
        expected: String,
        /// The line actually read.
        actual: String,
    },

    /// The process closed its output before the handshake completed.
    #[error("process '{label}' exited early while waiting for {expected}")]
    ProcessExitedEarly {
        /// Label of the process.
        label: String,
        /// Description of the marker that never arrived.
        expected: String,
    },

    /// A readiness read did not complete within the configured timeout.
    #[error("timed out after {timeout:?} waiting for {expected} from '{label}'")]
    ReadinessTimeout {
        /// Label of the process.
        label: String,
        /// Description of the marker that never arrived.
        expected: String,
        /// The timeout that expired.
        timeout: Duration,
    },

    /// The admin CLI exited with a nonzero status.
    #[error("admin command '{verb}' failed with exit status {exit_code}")]
    AdminCommandFailure {
        /// Verb of the failed command.
        verb: String,
        /// Exit status of the admin CLI.
        exit_code: i32,
        /// Captured output of the admin CLI.
        output: String,
    },

    /// A scenario client/server step exited with a nonzero status.
    #[error("scenario step '{step}' failed with exit status {exit_code}")]
    ScenarioFailure {
        /// Label of the failing step.
        step: String,
        /// Exit status of the step.
        exit_code: i32,
    },

    /// A suite test case exited with a nonzero status.
    #[error("test '{name}' failed with exit status {exit_code}")]
    SuiteFailure {
        /// Name of the failing test case.
        name: String,
        /// Exit status of the test case.
        exit_code: i32,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A command line could not be parsed or contains forbidden characters.
    #[error("invalid command line: {0}")]
    InvalidCommand(String),

    /// A persistent directory could not be removed or recreated.
    #[error("failed to clean '{}': {source}", path.display())]
    Cleanup {
        /// Directory being cleaned.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an invalid command error.
    #[must_use]
    pub fn invalid_command(message: impl Into<String>) -> Self {
        Self::InvalidCommand(message.into())
    }

    /// The exit status a run terminates with when this error ends it.
    ///
    /// Child exit statuses are propagated unchanged; everything else is `1`.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::AdminCommandFailure { exit_code, .. }
            | Self::ScenarioFailure { exit_code, .. }
            | Self::SuiteFailure { exit_code, .. }
                if *exit_code != 0 =>
            {
                *exit_code
            }
            _ => 1,
        }
    }

    /// Check if this error came from the readiness handshake.
    #[must_use]
    pub fn is_readiness_error(&self) -> bool {
        matches!(
            self,
            Self::SpawnFailure { .. }
                | Self::ProtocolViolation { .. }
                | Self::ProcessExitedEarly { .. }
                | Self::ReadinessTimeout { .. }
        )
    }
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_failure_propagates_child_status() {
        let err = HarnessError::AdminCommandFailure {
            verb: "application add".into(),
            exit_code: 3,
            output: String::new(),
        };
        assert_eq!(err.exit_code(), 3);
        assert_eq!(
            err.to_string(),
            "admin command 'application add' failed with exit status 3"
        );
    }

    #[test]
    fn scenario_failure_propagates_child_status() {
        let err = HarnessError::ScenarioFailure {
            step: "client".into(),
            exit_code: 42,
        };
        assert_eq!(err.exit_code(), 42);
    }

    #[test]
    fn zero_status_never_reports_success() {
        let err = HarnessError::ScenarioFailure {
            step: "client".into(),
            exit_code: 0,
        };
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn readiness_errors_exit_with_one() {
        let err = HarnessError::ProcessExitedEarly {
            label: "node".into(),
            expected: "adapter ready marker".into(),
        };
        assert!(err.is_readiness_error());
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn cleanup_error_names_path() {
        let err = HarnessError::Cleanup {
            path: PathBuf::from("/tmp/db/registry"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.to_string().contains("/tmp/db/registry"));
        assert!(!err.is_readiness_error());
    }
}
