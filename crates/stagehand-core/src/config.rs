//! Scenario plans.
//!
//! A plan describes one cluster fixture in TOML:
//!
//! ```toml
//! name = "IcePack/deployer"
//! test_dir = "test/IcePack/deployer"
//! port = 12346
//!
//! [admin]
//! binary = "bin/icepackadmin"
//!
//! [registry]
//! binary = "bin/icepackregistry"
//! options = ["--nowarn"]
//!
//! [node]
//! name = "localnode"
//! binary = "bin/icepacknode"
//!
//! [[provision]]
//! verb = "application-add"
//! descriptor = "application.xml"
//!
//! [[server]]
//! label = "server"
//! command = "server --Ice.Default.Locator=\"{locator}\""
//!
//! [[client]]
//! label = "client"
//! command = "client --Ice.Default.Locator=\"{locator}\""
//!
//! [[deprovision]]
//! verb = "application-remove"
//! descriptor = "application.xml"
//! ```
//!
//! Relative binaries and `test_dir` resolve against the directory holding the
//! plan file; admin descriptor paths resolve against `test_dir`. A server or
//! client program found in `test_dir` runs from there. Options, server and
//! client commands and environment values may use the `{port}`, `{locator}`
//! and `{test_dir}` placeholders.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::admin::{AdminClientConfig, AdminCommand};
use crate::command::CommandLine;
use crate::error::{HarnessError, Result};
use crate::readiness::{ReadinessContract, ServiceKind};

/// Harness tunables shared by every step of a fixture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessSettings {
    /// Bound on each readiness read in seconds; `0` waits indefinitely.
    pub handshake_timeout_secs: u64,
    /// How long a stopped service may keep its output open.
    pub shutdown_grace_secs: u64,
    /// Object identity of the registry's locator.
    pub locator_identity: String,
    /// Connection timeout placed in the registry client endpoint.
    pub endpoint_timeout_ms: u64,
    /// Trace verbosity passed to the registry and node.
    pub trace_level: u8,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: 60,
            shutdown_grace_secs: 10,
            locator_identity: "IcePack/Locator".to_string(),
            endpoint_timeout_ms: 5000,
            trace_level: 0,
        }
    }
}

impl HarnessSettings {
    /// Readiness read bound, `None` when disabled.
    #[must_use]
    pub fn handshake_timeout(&self) -> Option<Duration> {
        (self.handshake_timeout_secs > 0).then(|| Duration::from_secs(self.handshake_timeout_secs))
    }

    /// Grace period for a service's output to close after shutdown.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// A background service binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Path to the service binary.
    pub binary: String,
    /// Extra options placed before the harness-managed ones.
    #[serde(default)]
    pub options: Vec<String>,
    /// Override of the fixed readiness contract.
    #[serde(default)]
    pub readiness: Option<ReadinessContract>,
}

impl ServiceSpec {
    /// A service running `binary` with no extra options.
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            options: Vec::new(),
            readiness: None,
        }
    }

    /// The readiness contract for this service.
    #[must_use]
    pub fn contract(&self, kind: ServiceKind) -> ReadinessContract {
        self.readiness.clone().unwrap_or_else(|| kind.contract())
    }
}

fn default_node_name() -> String {
    "localnode".to_string()
}

/// The node activator of a fixture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Name the node registers under.
    #[serde(default = "default_node_name")]
    pub name: String,
    /// The node binary.
    #[serde(flatten)]
    pub service: ServiceSpec,
}

/// A client (or client/server pair driver) run to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStep {
    /// Label for drained output.
    pub label: String,
    /// Command line template.
    pub command: String,
}

fn default_server_contract() -> ReadinessContract {
    ServiceKind::Server.contract()
}

/// A scenario server started before the clients and reaped after them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStep {
    /// Label for drained output and the kill list.
    pub label: String,
    /// Command line template.
    pub command: String,
    /// Readiness the server announces before clients start.
    #[serde(default = "default_server_contract")]
    pub readiness: ReadinessContract,
}

/// One cluster fixture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioPlan {
    /// Scenario name used in logs and reports.
    pub name: String,
    /// Directory owning the scenario's persistent state.
    pub test_dir: PathBuf,
    /// Registry client port.
    pub port: u16,
    /// Harness tunables.
    #[serde(default)]
    pub harness: HarnessSettings,
    /// Extra environment for every launched process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// The admin CLI.
    pub admin: AdminClientConfig,
    /// The registry service.
    pub registry: ServiceSpec,
    /// The node activator, if the scenario needs one.
    #[serde(default)]
    pub node: Option<NodeSpec>,
    /// Admin commands run once the cluster is ready.
    #[serde(default)]
    pub provision: Vec<AdminCommand>,
    /// Servers started, in order, before the clients.
    #[serde(default, rename = "server")]
    pub servers: Vec<ServerStep>,
    /// Client steps, run in order.
    #[serde(default, rename = "client")]
    pub clients: Vec<ClientStep>,
    /// Admin commands run after the clients finish.
    #[serde(default)]
    pub deprovision: Vec<AdminCommand>,
}

fn resolve_binary(base: &Path, binary: &str) -> String {
    let path = Path::new(binary);
    // Bare program names are looked up on PATH.
    if path.is_absolute() || path.components().count() == 1 {
        binary.to_string()
    } else {
        base.join(path).to_string_lossy().into_owned()
    }
}

impl ScenarioPlan {
    /// Load a plan from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::config(format!(
                "failed to read plan file '{}': {e}",
                path.display()
            ))
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self::from_toml(&content)?.resolve_relative_to(base))
    }

    /// Parse a plan from a TOML string without resolving paths.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or the plan fails validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let plan: Self =
            toml::from_str(content).map_err(|e| HarnessError::config(format!("invalid TOML: {e}")))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Resolve relative paths against `base`.
    #[must_use]
    pub fn resolve_relative_to(mut self, base: &Path) -> Self {
        if self.test_dir.is_relative() {
            self.test_dir = base.join(&self.test_dir);
        }
        self.admin.binary = resolve_binary(base, &self.admin.binary);
        self.registry.binary = resolve_binary(base, &self.registry.binary);
        if let Some(node) = &mut self.node {
            node.service.binary = resolve_binary(base, &node.service.binary);
        }
        self
    }

    /// Validate the plan.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(HarnessError::config("scenario name cannot be empty"));
        }
        if self.port == 0 {
            return Err(HarnessError::config("port cannot be 0"));
        }
        if self.admin.binary.is_empty() {
            return Err(HarnessError::config("admin binary cannot be empty"));
        }
        if self.registry.binary.is_empty() {
            return Err(HarnessError::config("registry binary cannot be empty"));
        }
        if let Some(node) = &self.node {
            if node.service.binary.is_empty() {
                return Err(HarnessError::config("node binary cannot be empty"));
            }
            if node.name.is_empty()
                || !node
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
            {
                return Err(HarnessError::config(format!(
                    "invalid node name '{}'",
                    node.name
                )));
            }
        }
        for step in &self.servers {
            if step.label.is_empty() {
                return Err(HarnessError::config("server label cannot be empty"));
            }
            CommandLine::parse(&step.command)?;
        }
        for step in &self.clients {
            if step.label.is_empty() {
                return Err(HarnessError::config("client label cannot be empty"));
            }
            CommandLine::parse(&step.command)?;
        }
        Ok(())
    }

    /// The locator endpoint admin commands and clients are pointed at.
    #[must_use]
    pub fn locator(&self) -> String {
        format!("{}:default -p {}", self.harness.locator_identity, self.port)
    }

    /// Substitute `{port}`, `{locator}` and `{test_dir}` in `template`.
    #[must_use]
    pub fn expand(&self, template: &str) -> String {
        template
            .replace("{port}", &self.port.to_string())
            .replace("{locator}", &self.locator())
            .replace("{test_dir}", &self.test_dir.to_string_lossy())
    }

    /// The expanded command line of a client step.
    ///
    /// # Errors
    ///
    /// Returns an error if the expanded line does not parse.
    pub fn client_command(&self, step: &ClientStep) -> Result<CommandLine> {
        self.scenario_command(&step.command)
    }

    /// The expanded command line of a server step.
    ///
    /// # Errors
    ///
    /// Returns an error if the expanded line does not parse.
    pub fn server_command(&self, step: &ServerStep) -> Result<CommandLine> {
        self.scenario_command(&step.command)
    }

    /// Expand `template` and run its program from `test_dir` when it lives there.
    fn scenario_command(&self, template: &str) -> Result<CommandLine> {
        let command = CommandLine::parse(&self.expand(template))?;
        let program = Path::new(command.program());
        if program.is_absolute() {
            return Ok(command);
        }
        let local = self.test_dir.join(program);
        if !local.is_file() {
            return Ok(command);
        }
        Ok(CommandLine::new(local.to_string_lossy().into_owned())
            .args(command.arguments().iter().cloned()))
    }

    /// Root of the scenario's persistent state.
    #[must_use]
    pub fn db_dir(&self) -> PathBuf {
        self.test_dir.join("db")
    }

    /// Registry data directory.
    #[must_use]
    pub fn registry_data_dir(&self) -> PathBuf {
        self.db_dir().join("registry")
    }

    /// Node data directory.
    #[must_use]
    pub fn node_data_dir(&self) -> PathBuf {
        self.db_dir().join("node")
    }

    /// Every directory cleaned before first use, in cleaning order.
    #[must_use]
    pub fn persistent_dirs(&self) -> Vec<PathBuf> {
        let node = self.node_data_dir();
        vec![node.join("servers"), node.join("db"), self.registry_data_dir()]
    }
}
