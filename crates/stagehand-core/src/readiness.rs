//! The line-oriented readiness handshake.
//!
//! A service announces readiness on stdout in a fixed order:
//!
//! ```text
//! 4711                  <- decimal process id
//! Client ready          <- one "<adapter> ready" line per bound endpoint
//! Server ready
//! Internal ready
//! Admin ready
//! node ready            <- optional named marker for sub-components
//! ```
//!
//! The number of adapter lines is a fixed contract per service type. Reading
//! fewer lines than the service emits leaves markers unread; reading more
//! would wait forever, which is why every read here is bounded by an optional
//! timeout.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{HarnessError, Result};
use crate::launcher::ManagedProcess;

/// Marker text closing every adapter-ready line.
pub const ADAPTER_READY_MARKER: &str = "ready";

/// Default bound on a single readiness read.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// The kinds of background service a fixture starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// The registry/locator service.
    Registry,
    /// A per-host node activator.
    Node,
    /// The session router.
    Router,
    /// A scenario server running alongside the clients.
    Server,
}

impl ServiceKind {
    /// Name used in labels and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Node => "node",
            Self::Router => "router",
            Self::Server => "server",
        }
    }

    /// The fixed readiness contract of this service type.
    #[must_use]
    pub fn contract(&self) -> ReadinessContract {
        match self {
            // Client, server, internal and admin endpoints.
            Self::Registry => ReadinessContract::new(4),
            Self::Node => ReadinessContract::new(1).with_named_ready("node"),
            Self::Router | Self::Server => ReadinessContract::new(1),
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected readiness sequence after the pid line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessContract {
    /// Number of adapter-ready lines.
    pub adapters: usize,
    /// Component announced by a final `"<component> ready"` line.
    #[serde(default)]
    pub named_ready: Option<String>,
}

impl ReadinessContract {
    /// A contract with `adapters` adapter-ready lines and no named marker.
    #[must_use]
    pub fn new(adapters: usize) -> Self {
        Self {
            adapters,
            named_ready: None,
        }
    }

    /// Expect a final `"<component> ready"` line.
    #[must_use]
    pub fn with_named_ready(mut self, component: impl Into<String>) -> Self {
        self.named_ready = Some(component.into());
        self
    }
}

fn is_adapter_ready(line: &str) -> bool {
    let line = line.trim();
    line == ADAPTER_READY_MARKER
        || line
            .strip_suffix(ADAPTER_READY_MARKER)
            .is_some_and(|prefix| prefix.ends_with(' '))
}

/// Performs handshake reads against a launched process.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessProtocol {
    timeout: Option<Duration>,
}

impl Default for ReadinessProtocol {
    fn default() -> Self {
        Self::new(Some(DEFAULT_HANDSHAKE_TIMEOUT))
    }
}

impl ReadinessProtocol {
    /// Create a protocol reader. `None` waits indefinitely on every read.
    #[must_use]
    pub const fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// The bound applied to each read.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn next_line(&self, process: &mut ManagedProcess, expected: &str) -> Result<String> {
        let label = process.label().to_string();
        let line = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, process.read_line())
                .await
                .map_err(|_| HarnessError::ReadinessTimeout {
                    label: label.clone(),
                    expected: expected.to_string(),
                    timeout,
                })??,
            None => process.read_line().await?,
        };

        match line {
            Some(line) => Ok(line),
            None => Err(match process.spawn_error() {
                Some(reason) => HarnessError::SpawnFailure {
                    label,
                    reason: reason.to_string(),
                },
                None => HarnessError::ProcessExitedEarly {
                    label,
                    expected: expected.to_string(),
                },
            }),
        }
    }

    /// Read the first line and parse it as the process id.
    ///
    /// # Errors
    ///
    /// Fails with a protocol violation if the line is not a decimal integer.
    pub async fn await_pid(&self, process: &mut ManagedProcess) -> Result<u32> {
        let expected = "process id";
        let line = self.next_line(process, expected).await?;
        let pid = line
            .trim()
            .parse::<u32>()
            .map_err(|_| HarnessError::ProtocolViolation {
                label: process.label().to_string(),
                expected: expected.to_string(),
                actual: line.clone(),
            })?;
        process.set_discovered_pid(pid);
        debug!(process = %process.label(), pid, "process id received");
        Ok(pid)
    }

    /// Read the next line and check it is an adapter-ready marker.
    ///
    /// # Errors
    ///
    /// Fails with a protocol violation on any other line.
    pub async fn await_adapter_ready(&self, process: &mut ManagedProcess) -> Result<()> {
        let expected = "adapter ready marker";
        let line = self.next_line(process, expected).await?;
        if !is_adapter_ready(&line) {
            return Err(HarnessError::ProtocolViolation {
                label: process.label().to_string(),
                expected: expected.to_string(),
                actual: line,
            });
        }
        debug!(process = %process.label(), marker = %line.trim(), "adapter ready");
        Ok(())
    }

    /// Discard lines until `"<token> ready"` appears.
    ///
    /// # Errors
    ///
    /// Fails if the output ends first.
    pub async fn await_named_ready(&self, process: &mut ManagedProcess, token: &str) -> Result<()> {
        let marker = format!("{token} {ADAPTER_READY_MARKER}");
        let expected = format!("'{marker}' marker");
        loop {
            let line = self.next_line(process, &expected).await?;
            if line.trim() == marker {
                debug!(process = %process.label(), %marker, "named marker received");
                return Ok(());
            }
            debug!(process = %process.label(), discarded = %line, "skipping line before named marker");
        }
    }

    /// Run the full handshake for `contract`, returning the announced pid.
    ///
    /// # Errors
    ///
    /// Returns the first failing read.
    pub async fn handshake(
        &self,
        process: &mut ManagedProcess,
        contract: &ReadinessContract,
    ) -> Result<u32> {
        let pid = self.await_pid(process).await?;
        for _ in 0..contract.adapters {
            self.await_adapter_ready(process).await?;
        }
        if let Some(token) = &contract.named_ready {
            self.await_named_ready(process, token).await?;
        }
        info!(process = %process.label(), pid, adapters = contract.adapters, "readiness handshake complete");
        Ok(pid)
    }
}
