//! The administrative command channel.
//!
//! Each call spawns the short-lived admin CLI once, pointed at a running
//! registry through a locator override, with a single `-e "<verb> <args>"`
//! payload. The call blocks until the CLI exits and captures all of its
//! output. Nothing here retries: a nonzero exit is fatal to the caller.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::command::{CommandLine, join_args};
use crate::drain::SharedSink;
use crate::error::{HarnessError, Result};
use crate::launcher::exit_code_of;

/// Label admin output is written under.
pub const ADMIN_LABEL: &str = "admin";

/// One administrative operation: a verb and its typed arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "kebab-case")]
pub enum AdminCommand {
    /// Deploy an application descriptor, optionally restricted to targets.
    ApplicationAdd {
        /// Path to the application descriptor.
        descriptor: PathBuf,
        /// Deployment targets.
        #[serde(default)]
        targets: Vec<String>,
    },
    /// Remove an application, named by the descriptor it was deployed from.
    ApplicationRemove {
        /// Path to the application descriptor.
        descriptor: PathBuf,
    },
    /// Register a server entry on a node.
    ServerAdd {
        /// Node that activates the server.
        node: String,
        /// Server name.
        name: String,
        /// Path to the server descriptor.
        descriptor: PathBuf,
        /// Path to the server executable.
        executable: PathBuf,
        /// Library search path for the server.
        #[serde(default)]
        library_path: String,
        /// Deployment targets.
        #[serde(default)]
        targets: Vec<String>,
    },
    /// Unregister a server entry.
    ServerRemove {
        /// Server name.
        name: String,
    },
    /// Start a registered server.
    ServerStart {
        /// Server name.
        name: String,
    },
    /// List registered adapters.
    AdapterList,
    /// Shut down the registry.
    Shutdown,
    /// Shut down a node.
    NodeShutdown {
        /// Node name.
        node: String,
    },
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl AdminCommand {
    /// The verb words, e.g. `"server add"`.
    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            Self::ApplicationAdd { .. } => "application add",
            Self::ApplicationRemove { .. } => "application remove",
            Self::ServerAdd { .. } => "server add",
            Self::ServerRemove { .. } => "server remove",
            Self::ServerStart { .. } => "server start",
            Self::AdapterList => "adapter list",
            Self::Shutdown => "shutdown",
            Self::NodeShutdown { .. } => "node shutdown",
        }
    }

    /// The arguments, in the order the admin CLI expects them.
    #[must_use]
    pub fn arguments(&self) -> Vec<String> {
        match self {
            Self::ApplicationAdd {
                descriptor,
                targets,
            } => std::iter::once(path_arg(descriptor))
                .chain(targets.iter().cloned())
                .collect(),
            Self::ApplicationRemove { descriptor } => vec![path_arg(descriptor)],
            Self::ServerAdd {
                node,
                name,
                descriptor,
                executable,
                library_path,
                targets,
            } => [
                node.clone(),
                name.clone(),
                path_arg(descriptor),
                path_arg(executable),
                library_path.clone(),
            ]
            .into_iter()
            .chain(targets.iter().cloned())
            .collect(),
            Self::ServerRemove { name } | Self::ServerStart { name } => vec![name.clone()],
            Self::NodeShutdown { node } => vec![node.clone()],
            Self::AdapterList | Self::Shutdown => Vec::new(),
        }
    }

    /// Render the `-e` payload: the verb followed by quoted arguments.
    #[must_use]
    pub fn render(&self) -> String {
        let args = self.arguments();
        if args.is_empty() {
            self.verb().to_string()
        } else {
            format!("{} {}", self.verb(), join_args(&args))
        }
    }

    /// Resolve relative descriptor and executable paths against `base`.
    #[must_use]
    pub fn resolve_paths(self, base: &Path) -> Self {
        match self {
            Self::ApplicationAdd {
                descriptor,
                targets,
            } => Self::ApplicationAdd {
                descriptor: resolve(base, &descriptor),
                targets,
            },
            Self::ApplicationRemove { descriptor } => Self::ApplicationRemove {
                descriptor: resolve(base, &descriptor),
            },
            Self::ServerAdd {
                node,
                name,
                descriptor,
                executable,
                library_path,
                targets,
            } => Self::ServerAdd {
                node,
                name,
                descriptor: resolve(base, &descriptor),
                executable: resolve(base, &executable),
                library_path,
                targets,
            },
            other => other,
        }
    }
}

/// Result of one admin CLI invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminOutput {
    /// Exit status of the admin CLI.
    pub exit_code: i32,
    /// Captured stdout followed by stderr.
    pub output: String,
}

impl AdminOutput {
    /// Check if the command succeeded (exit code 0).
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Configuration for the admin CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminClientConfig {
    /// Path to the admin binary.
    pub binary: String,
    /// Extra client options placed before the locator override.
    #[serde(default)]
    pub options: Vec<String>,
    /// Flag that overrides the default locator.
    #[serde(default = "default_locator_flag")]
    pub locator_flag: String,
}

fn default_locator_flag() -> String {
    "--Ice.Default.Locator".to_string()
}

impl AdminClientConfig {
    /// Configuration for `binary` with default options.
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            options: Vec::new(),
            locator_flag: default_locator_flag(),
        }
    }
}

/// The administrative channel a fixture drives.
pub trait AdminRunner: Send + Sync {
    /// Run one command against the registry behind `locator`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the admin CLI could not be run at all.
    fn execute(
        &self,
        locator: &str,
        command: &AdminCommand,
    ) -> impl Future<Output = Result<AdminOutput>> + Send;

    /// Run one command and treat a nonzero exit as fatal.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::AdminCommandFailure`] on a nonzero exit.
    fn execute_checked(
        &self,
        locator: &str,
        command: &AdminCommand,
    ) -> impl Future<Output = Result<AdminOutput>> + Send {
        async move {
            let output = self.execute(locator, command).await?;
            if output.success() {
                Ok(output)
            } else {
                Err(HarnessError::AdminCommandFailure {
                    verb: command.verb().to_string(),
                    exit_code: output.exit_code,
                    output: output.output,
                })
            }
        }
    }
}

/// Runs the real admin CLI as a child process.
#[derive(Debug, Clone)]
pub struct AdminClient {
    config: AdminClientConfig,
    sink: SharedSink,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl AdminClient {
    /// Create a client that echoes admin output to `sink`.
    #[must_use]
    pub fn new(config: AdminClientConfig, sink: SharedSink) -> Self {
        Self {
            config,
            sink,
            working_dir: None,
            env: Vec::new(),
        }
    }

    /// Run the admin CLI in `dir`.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment variable for every admin invocation.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Assemble the admin command line for `command`.
    #[must_use]
    pub fn command_line(&self, locator: &str, command: &AdminCommand) -> CommandLine {
        CommandLine::new(self.config.binary.clone())
            .args(self.config.options.iter().cloned())
            .arg(format!("{}={locator}", self.config.locator_flag))
            .arg("-e")
            .arg(command.render())
    }
}

impl AdminRunner for AdminClient {
    async fn execute(&self, locator: &str, command: &AdminCommand) -> Result<AdminOutput> {
        let line = self.command_line(locator, command);
        line.validate()?;
        debug!(verb = command.verb(), command = %line, "running admin command");

        let mut cmd = Command::new(line.program());
        cmd.args(line.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| HarnessError::SpawnFailure {
                label: ADMIN_LABEL.to_string(),
                reason: e.to_string(),
            })?;

        let exit_code = exit_code_of(output.status);
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        for captured in text.lines() {
            self.sink.line(ADMIN_LABEL, captured);
        }

        if exit_code == 0 {
            info!(verb = command.verb(), "admin command succeeded");
        } else {
            warn!(verb = command.verb(), exit_code, "admin command failed");
        }
        Ok(AdminOutput {
            exit_code,
            output: text,
        })
    }
}
