//! Shared helpers for fixture and suite integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use stagehand_core::{
    AdminClientConfig, AdminCommand, AdminOutput, AdminRunner, ClientStep, HarnessSettings,
    NodeSpec, ReadinessContract, Result, ScenarioPlan, ServerStep, ServiceSpec,
};

/// Upper bound for any single fixture run in tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A registry announcing its pid and all four adapters.
pub const REGISTRY_OK: &str = "echo 1234\n\
    for adapter in Client Server Internal Admin; do echo \"IcePack.Registry.$adapter ready\"; done\n";

/// A node announcing its pid, its adapter and the named marker.
pub const NODE_OK: &str = "echo 5678\necho 'IcePack.Node ready'\necho 'node ready'\n";

/// Write `body` as a shell script in `dir` and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write script");
    path
}

/// A service run through `sh`, so freshly written scripts need no exec bit.
pub fn sh_service(script: &Path) -> ServiceSpec {
    let mut spec = ServiceSpec::new("sh");
    spec.options.push(script.to_string_lossy().into_owned());
    spec
}

/// A plan with fake registry and node scripts in `test_dir`.
pub fn plan(test_dir: &Path, registry: &str, node: Option<&str>) -> ScenarioPlan {
    let registry = write_script(test_dir, "registry.sh", registry);
    let node = node.map(|body| NodeSpec {
        name: "localnode".to_string(),
        service: sh_service(&write_script(test_dir, "node.sh", body)),
    });

    ScenarioPlan {
        name: "IcePack/simple".to_string(),
        test_dir: test_dir.to_path_buf(),
        port: 12345,
        harness: HarnessSettings {
            handshake_timeout_secs: 10,
            shutdown_grace_secs: 5,
            ..HarnessSettings::default()
        },
        env: BTreeMap::new(),
        admin: AdminClientConfig::new("icepackadmin"),
        registry: sh_service(&registry),
        node,
        provision: Vec::new(),
        servers: Vec::new(),
        clients: Vec::new(),
        deprovision: Vec::new(),
    }
}

/// A client step running `body` through `sh`.
pub fn client_step(test_dir: &Path, label: &str, body: &str) -> ClientStep {
    let script = format!("{label}.sh");
    write_script(test_dir, &script, body);
    ClientStep {
        label: label.to_string(),
        command: format!("sh {script}"),
    }
}

/// A server step running `body` through `sh`, announcing one adapter.
pub fn server_step(test_dir: &Path, label: &str, body: &str) -> ServerStep {
    let script = format!("{label}.sh");
    write_script(test_dir, &script, body);
    ServerStep {
        label: label.to_string(),
        command: format!("sh {script}"),
        readiness: ReadinessContract::new(1),
    }
}

/// Admin runner that records every rendered command.
#[derive(Debug, Default)]
pub struct RecordingAdmin {
    calls: Mutex<Vec<String>>,
    locators: Mutex<Vec<String>>,
    failure: Option<(&'static str, i32)>,
}

impl RecordingAdmin {
    /// Runner failing every `verb` call with `exit_code`.
    pub fn failing(verb: &'static str, exit_code: i32) -> Self {
        Self {
            failure: Some((verb, exit_code)),
            ..Self::default()
        }
    }

    /// Rendered commands, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Locators the commands targeted.
    pub fn locators(&self) -> Vec<String> {
        self.locators.lock().clone()
    }
}

impl AdminRunner for RecordingAdmin {
    async fn execute(&self, locator: &str, command: &AdminCommand) -> Result<AdminOutput> {
        self.calls.lock().push(command.render());
        self.locators.lock().push(locator.to_string());
        let exit_code = match self.failure {
            Some((verb, code)) if verb == command.verb() => code,
            _ => 0,
        };
        Ok(AdminOutput {
            exit_code,
            output: String::new(),
        })
    }
}
