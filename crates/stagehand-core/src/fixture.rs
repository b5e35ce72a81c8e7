//! One integration scenario, from clean state to teardown.
//!
//! The fixture walks a linear state machine:
//!
//! ```text
//! Clean -> RegistryStarting -> RegistryReady -> NodeStarting -> NodeReady
//!       -> Provisioning -> ClientServerRunning -> Deprovisioning
//!       -> NodeStopping -> RegistryStopping -> Done
//! ```
//!
//! Node states are skipped when the plan has no node. Any failure stops
//! forward progress and force-kills every process the fixture started, in
//! reverse start order.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::admin::{AdminClient, AdminCommand, AdminRunner};
use crate::command::CommandLine;
use crate::config::{NodeSpec, ScenarioPlan};
use crate::drain::{self, DrainHandle, DrainOutcome, SharedSink};
use crate::error::{HarnessError, Result};
use crate::launcher::{ManagedProcess, ProcessLauncher};
use crate::readiness::{ReadinessContract, ReadinessProtocol, ServiceKind};

/// Fixture lifecycle states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixtureState {
    /// Persistent state is being wiped.
    Clean,
    /// The registry is launched and handshaking.
    RegistryStarting,
    /// The registry announced every adapter.
    RegistryReady,
    /// The node is launched and handshaking.
    NodeStarting,
    /// The node announced its adapter and named marker.
    NodeReady,
    /// Admin provisioning commands are running.
    Provisioning,
    /// Scenario servers and client steps are running.
    ClientServerRunning,
    /// Admin deprovisioning commands are running.
    Deprovisioning,
    /// The node is shutting down.
    NodeStopping,
    /// The registry is shutting down.
    RegistryStopping,
    /// Teardown finished.
    Done,
}

impl FixtureState {
    /// Stable name for logs and reports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::RegistryStarting => "registry-starting",
            Self::RegistryReady => "registry-ready",
            Self::NodeStarting => "node-starting",
            Self::NodeReady => "node-ready",
            Self::Provisioning => "provisioning",
            Self::ClientServerRunning => "client-server-running",
            Self::Deprovisioning => "deprovisioning",
            Self::NodeStopping => "node-stopping",
            Self::RegistryStopping => "registry-stopping",
            Self::Done => "done",
        }
    }

    /// Check if this state only exists for fixtures with a node.
    #[must_use]
    pub fn is_node_state(&self) -> bool {
        matches!(
            self,
            Self::NodeStarting | Self::NodeReady | Self::NodeStopping
        )
    }
}

impl fmt::Display for FixtureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one fixture run.
#[derive(Debug, Clone, Serialize)]
pub struct FixtureReport {
    /// Scenario name.
    pub scenario: String,
    /// Last state entered.
    pub reached: FixtureState,
    /// Every state entered, in order.
    pub history: Vec<FixtureState>,
    /// The fixture's result status.
    pub exit_code: i32,
    /// The failure, if any.
    pub error: Option<String>,
    /// Labels of processes force-killed on the failure path.
    pub killed: Vec<String>,
}

impl FixtureReport {
    /// Check if the fixture passed.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Check if the fixture entered `state`.
    #[must_use]
    pub fn visited(&self, state: FixtureState) -> bool {
        self.history.contains(&state)
    }
}

fn remove_tree(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(HarnessError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Wipe and recreate the plan's persistent directories.
///
/// Absent directories are not an error, so cleaning twice is harmless.
///
/// # Errors
///
/// Returns [`HarnessError::Cleanup`] if a directory cannot be removed or
/// recreated.
pub fn clean_data_dirs(plan: &ScenarioPlan) -> Result<()> {
    for dir in plan.persistent_dirs() {
        remove_tree(&dir)?;
        std::fs::create_dir_all(&dir).map_err(|source| HarnessError::Cleanup {
            path: dir.clone(),
            source,
        })?;
        debug!(path = %dir.display(), "data directory cleaned");
    }
    Ok(())
}

fn trace_flags(prefix: &str, categories: &[&str], level: u8) -> Vec<String> {
    categories
        .iter()
        .map(|category| format!("--{prefix}.Trace.{category}={level}"))
        .collect()
}

/// Command line starting the registry for `plan`.
#[must_use]
pub fn registry_command(plan: &ScenarioPlan) -> CommandLine {
    let harness = &plan.harness;
    CommandLine::new(&plan.registry.binary)
        .args(plan.registry.options.iter().map(|o| plan.expand(o)))
        .arg(format!(
            "--IcePack.Registry.Client.Endpoints=default -p {} -t {}",
            plan.port, harness.endpoint_timeout_ms
        ))
        .arg("--IcePack.Registry.Server.Endpoints=default")
        .arg("--IcePack.Registry.Internal.Endpoints=default")
        .arg("--IcePack.Registry.Admin.Endpoints=default")
        .arg(format!(
            "--IcePack.Registry.Data={}",
            plan.registry_data_dir().display()
        ))
        .arg("--IcePack.Registry.DynamicRegistration")
        .args(trace_flags(
            "IcePack.Registry",
            &["ServerRegistry", "AdapterRegistry", "ObjectRegistry", "NodeRegistry"],
            harness.trace_level,
        ))
        .arg("--Ice.ProgramName=icepackregistry")
}

/// Command line starting `node` for `plan`.
#[must_use]
pub fn node_command(plan: &ScenarioPlan, node: &NodeSpec) -> CommandLine {
    CommandLine::new(&node.service.binary)
        .args(node.service.options.iter().map(|o| plan.expand(o)))
        .arg(format!("--Ice.Default.Locator={}", plan.locator()))
        .arg("--IcePack.Node.Endpoints=default")
        .arg(format!(
            "--IcePack.Node.Data={}",
            plan.node_data_dir().display()
        ))
        .arg(format!("--IcePack.Node.Name={}", node.name))
        .arg("--Ice.ProgramName=icepacknode")
        .args(trace_flags(
            "IcePack.Node",
            &["Activator", "Adapter", "Server"],
            plan.harness.trace_level,
        ))
        .arg("--IcePack.Node.PrintServersReady=node")
}

/// A background service on the kill list.
#[derive(Debug)]
struct Started {
    kind: ServiceKind,
    process: ManagedProcess,
    drain: Option<DrainHandle>,
}

/// Everything one fixture run mutates.
///
/// Owned by the orchestrating task and passed by reference through every
/// step; drain tasks never touch it.
#[derive(Debug)]
pub struct FixtureContext<'a, A> {
    plan: &'a ScenarioPlan,
    admin: &'a A,
    locator: String,
    launcher: ProcessLauncher,
    protocol: ReadinessProtocol,
    started: Vec<Started>,
    state: FixtureState,
    history: Vec<FixtureState>,
}

impl<'a, A: AdminRunner> FixtureContext<'a, A> {
    /// Create a context in the [`FixtureState::Clean`] state.
    #[must_use]
    pub fn new(plan: &'a ScenarioPlan, admin: &'a A, sink: SharedSink) -> Self {
        let mut launcher = ProcessLauncher::new(sink).with_working_dir(&plan.test_dir);
        for (key, value) in &plan.env {
            launcher = launcher.with_env(key, plan.expand(value));
        }
        Self {
            plan,
            admin,
            locator: plan.locator(),
            launcher,
            protocol: ReadinessProtocol::new(plan.harness.handshake_timeout()),
            started: Vec::new(),
            state: FixtureState::Clean,
            history: vec![FixtureState::Clean],
        }
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> FixtureState {
        self.state
    }

    fn enter(&mut self, state: FixtureState) {
        info!(scenario = %self.plan.name, from = %self.state, to = %state, "fixture transition");
        self.state = state;
        self.history.push(state);
    }

    fn skip(&self, state: FixtureState) {
        debug!(scenario = %self.plan.name, %state, "no node configured, skipping state");
    }

    async fn start_service(
        &mut self,
        kind: ServiceKind,
        label: &str,
        command: CommandLine,
        contract: ReadinessContract,
    ) -> Result<()> {
        let mut service = Started {
            kind,
            process: self.launcher.launch(label, &command),
            drain: None,
        };

        let result = self.protocol.handshake(&mut service.process, &contract).await;
        if result.is_ok() {
            if let Some(lines) = service.process.take_stdout() {
                service.drain = Some(drain::start(
                    lines,
                    label,
                    Arc::clone(self.launcher.sink()),
                ));
            }
        }
        // A failed handshake still leaves the process on the kill list.
        self.started.push(service);
        result.map(|_| ())
    }

    async fn run_admin(&self, commands: &[AdminCommand]) -> Result<()> {
        for command in commands {
            let command = command.clone().resolve_paths(&self.plan.test_dir);
            self.admin.execute_checked(&self.locator, &command).await?;
        }
        Ok(())
    }

    async fn run_clients(&self) -> Result<()> {
        let grace = self.plan.harness.shutdown_grace();
        for step in &self.plan.clients {
            let command = self.plan.client_command(step)?;
            let mut process = self.launcher.launch(&step.label, &command);
            let drain = process
                .take_stdout()
                .map(|lines| drain::start(lines, &step.label, Arc::clone(self.launcher.sink())));

            let code = process.wait().await?;
            if let Some(drain) = drain {
                drain.join_timeout(grace).await;
            }
            if code != 0 {
                return Err(HarnessError::ScenarioFailure {
                    step: step.label.clone(),
                    exit_code: code,
                });
            }
            info!(scenario = %self.plan.name, step = %step.label, "client step passed");
        }
        Ok(())
    }

    async fn run_servers(&mut self) -> Result<()> {
        let plan = self.plan;
        for step in &plan.servers {
            let command = plan.server_command(step)?;
            self.start_service(ServiceKind::Server, &step.label, command, step.readiness.clone())
                .await?;
        }
        Ok(())
    }

    /// Wait for every scenario server to exit on its own, in start order.
    async fn reap_servers(&mut self) -> Result<()> {
        while let Some(index) = self.started.iter().position(|s| s.kind == ServiceKind::Server) {
            let service = self.started.remove(index);
            let label = service.process.label().to_string();
            let code = self.reap(service).await?;
            if code != 0 {
                return Err(HarnessError::ScenarioFailure {
                    step: label,
                    exit_code: code,
                });
            }
            info!(scenario = %self.plan.name, step = %label, "server exited cleanly");
        }
        Ok(())
    }

    /// Join a service's output and wait for it to exit, killing it once the
    /// grace period runs out.
    async fn reap(&self, mut service: Started) -> Result<i32> {
        let grace = self.plan.harness.shutdown_grace();
        let label = service.process.label().to_string();

        let mut hung = false;
        if let Some(drain) = service.drain.take() {
            hung = drain.join_timeout(grace).await == DrainOutcome::Cancelled;
        }
        if hung {
            warn!(scenario = %self.plan.name, process = %label, ?grace, "output still open after grace period, killing");
            service.process.kill().await;
        }

        let waited = tokio::time::timeout(grace, service.process.wait()).await;
        let code = match waited {
            Ok(code) => code?,
            Err(_) => {
                warn!(scenario = %self.plan.name, process = %label, ?grace, "process did not exit within grace period, killing");
                service.process.kill().await;
                service.process.wait().await?
            }
        };
        debug!(scenario = %self.plan.name, process = %label, exit_code = code, "process reaped");
        Ok(code)
    }

    async fn stop_service(&mut self, kind: ServiceKind, shutdown: AdminCommand) -> Result<()> {
        self.admin.execute_checked(&self.locator, &shutdown).await?;

        let Some(index) = self.started.iter().position(|s| s.kind == kind) else {
            return Ok(());
        };
        let service = self.started.remove(index);
        self.reap(service).await?;
        Ok(())
    }

    /// Force-kill every started process in reverse start order.
    ///
    /// Returns the labels of the killed processes.
    pub async fn abort(&mut self) -> Vec<String> {
        let mut killed = Vec::with_capacity(self.started.len());
        while let Some(mut service) = self.started.pop() {
            service.process.kill().await;
            if let Some(drain) = service.drain.take() {
                drain.stop().await;
            }
            warn!(scenario = %self.plan.name, process = %service.process.label(), "process force-killed");
            killed.push(service.process.label().to_string());
        }
        killed
    }

    /// Drive the fixture from clean state to [`FixtureState::Done`].
    ///
    /// # Errors
    ///
    /// Returns the first failure; the caller is expected to [`abort`](Self::abort).
    pub async fn drive(&mut self) -> Result<()> {
        let plan = self.plan;

        clean_data_dirs(plan)?;

        self.enter(FixtureState::RegistryStarting);
        self.start_service(
            ServiceKind::Registry,
            ServiceKind::Registry.as_str(),
            registry_command(plan),
            plan.registry.contract(ServiceKind::Registry),
        )
        .await?;
        self.enter(FixtureState::RegistryReady);

        match &plan.node {
            Some(node) => {
                self.enter(FixtureState::NodeStarting);
                self.start_service(
                    ServiceKind::Node,
                    ServiceKind::Node.as_str(),
                    node_command(plan, node),
                    node.service.contract(ServiceKind::Node),
                )
                .await?;
                self.enter(FixtureState::NodeReady);
            }
            None => {
                self.skip(FixtureState::NodeStarting);
                self.skip(FixtureState::NodeReady);
            }
        }

        self.enter(FixtureState::Provisioning);
        self.run_admin(&plan.provision).await?;

        self.enter(FixtureState::ClientServerRunning);
        self.run_servers().await?;
        self.run_clients().await?;
        self.reap_servers().await?;

        self.enter(FixtureState::Deprovisioning);
        self.run_admin(&plan.deprovision).await?;

        match &plan.node {
            Some(node) => {
                self.enter(FixtureState::NodeStopping);
                self.stop_service(
                    ServiceKind::Node,
                    AdminCommand::NodeShutdown {
                        node: node.name.clone(),
                    },
                )
                .await?;
            }
            None => self.skip(FixtureState::NodeStopping),
        }

        self.enter(FixtureState::RegistryStopping);
        self.stop_service(ServiceKind::Registry, AdminCommand::Shutdown)
            .await?;

        self.enter(FixtureState::Done);
        Ok(())
    }
}

/// Runs one [`ScenarioPlan`] against an admin runner.
#[derive(Debug)]
pub struct ClusterFixture<A = AdminClient> {
    plan: ScenarioPlan,
    admin: A,
    sink: SharedSink,
}

impl ClusterFixture<AdminClient> {
    /// Fixture driving the plan's admin CLI.
    #[must_use]
    pub fn from_plan(plan: ScenarioPlan, sink: SharedSink) -> Self {
        let mut admin = AdminClient::new(plan.admin.clone(), Arc::clone(&sink))
            .with_working_dir(&plan.test_dir);
        for (key, value) in &plan.env {
            admin = admin.with_env(key, plan.expand(value));
        }
        Self { plan, admin, sink }
    }
}

impl<A: AdminRunner> ClusterFixture<A> {
    /// Fixture driving a custom admin runner.
    #[must_use]
    pub fn with_admin(plan: ScenarioPlan, admin: A, sink: SharedSink) -> Self {
        Self { plan, admin, sink }
    }

    /// The plan being run.
    #[must_use]
    pub fn plan(&self) -> &ScenarioPlan {
        &self.plan
    }

    /// The admin runner.
    #[must_use]
    pub fn admin(&self) -> &A {
        &self.admin
    }

    /// Run the fixture to completion. Never fails: errors land in the report.
    pub async fn run(&self) -> FixtureReport {
        let mut context = FixtureContext::new(&self.plan, &self.admin, Arc::clone(&self.sink));
        info!(scenario = %self.plan.name, test_dir = %self.plan.test_dir.display(), "starting fixture");

        let result = context.drive().await;
        let (exit_code, error, killed) = match result {
            Ok(()) => (0, None, Vec::new()),
            Err(e) => {
                warn!(scenario = %self.plan.name, state = %context.state(), error = %e, "fixture failed");
                let killed = context.abort().await;
                (e.exit_code(), Some(e.to_string()), killed)
            }
        };

        FixtureReport {
            scenario: self.plan.name.clone(),
            reached: context.state,
            history: context.history,
            exit_code,
            error,
            killed,
        }
    }
}
