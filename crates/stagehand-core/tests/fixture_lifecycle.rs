//! End-to-end fixture runs against fake shell services.

#![cfg(unix)]

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use common::{
    NODE_OK, REGISTRY_OK, RecordingAdmin, TEST_TIMEOUT, client_step, plan, server_step, write_script,
};
use stagehand_core::{
    AdminClientConfig, AdminCommand, ClusterFixture, FixtureReport, FixtureState, MemorySink,
    ScenarioPlan,
};

async fn run_with(plan: ScenarioPlan, admin: RecordingAdmin) -> (FixtureReport, Vec<String>, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let fixture = ClusterFixture::with_admin(plan, admin, sink.clone());
    let report = tokio::time::timeout(TEST_TIMEOUT, fixture.run())
        .await
        .expect("fixture run timed out");
    let calls = fixture.admin().calls();
    (report, calls, sink)
}

fn deploy() -> AdminCommand {
    AdminCommand::ApplicationAdd {
        descriptor: PathBuf::from("application.xml"),
        targets: Vec::new(),
    }
}

#[tokio::test]
async fn ready_cluster_provisions_and_runs_client() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut plan = plan(dir.path(), REGISTRY_OK, Some(NODE_OK));
    plan.provision.push(deploy());
    plan.clients
        .push(client_step(dir.path(), "client", "echo 'testing deployment... ok'\n"));
    plan.deprovision.push(AdminCommand::ApplicationRemove {
        descriptor: PathBuf::from("application.xml"),
    });

    let (report, calls, sink) = run_with(plan, RecordingAdmin::default()).await;

    assert!(report.success(), "fixture failed: {:?}", report.error);
    assert_eq!(report.reached, FixtureState::Done);
    assert!(report.visited(FixtureState::Provisioning));
    assert!(report.visited(FixtureState::ClientServerRunning));
    assert!(report.killed.is_empty());

    let descriptor = dir.path().join("application.xml");
    assert_eq!(
        calls,
        vec![
            format!("application add {}", descriptor.display()),
            format!("application remove {}", descriptor.display()),
            "node shutdown localnode".to_string(),
            "shutdown".to_string(),
        ]
    );
    assert!(sink.contains("client: testing deployment... ok"));
}

#[tokio::test]
async fn history_follows_state_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let plan = plan(dir.path(), REGISTRY_OK, Some(NODE_OK));

    let (report, _, _) = run_with(plan, RecordingAdmin::default()).await;

    assert_eq!(
        report.history,
        vec![
            FixtureState::Clean,
            FixtureState::RegistryStarting,
            FixtureState::RegistryReady,
            FixtureState::NodeStarting,
            FixtureState::NodeReady,
            FixtureState::Provisioning,
            FixtureState::ClientServerRunning,
            FixtureState::Deprovisioning,
            FixtureState::NodeStopping,
            FixtureState::RegistryStopping,
            FixtureState::Done,
        ]
    );
}

#[tokio::test]
async fn registry_only_plan_skips_node_states() {
    let dir = tempfile::tempdir().expect("tempdir");
    let plan = plan(dir.path(), REGISTRY_OK, None);

    let (report, calls, _) = run_with(plan, RecordingAdmin::default()).await;

    assert!(report.success());
    assert!(report.history.iter().all(|state| !state.is_node_state()));
    assert_eq!(calls, vec!["shutdown"]);
}

#[tokio::test]
async fn node_without_adapter_marker_aborts_before_admin() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut plan = plan(dir.path(), REGISTRY_OK, Some("echo 5678\n"));
    plan.provision.push(deploy());

    let (report, calls, _) = run_with(plan, RecordingAdmin::default()).await;

    assert_ne!(report.exit_code, 0);
    assert_eq!(report.reached, FixtureState::NodeStarting);
    assert_eq!(report.killed, vec!["node", "registry"]);
    assert!(calls.is_empty(), "admin called: {calls:?}");
    assert!(report.error.is_some());
}

#[tokio::test]
async fn failed_node_start_kills_live_registry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pid_file = dir.path().join("registry.pid");
    let registry = format!(
        "echo $$ > '{}'\n{REGISTRY_OK}exec sleep 60\n",
        pid_file.display()
    );
    let plan = plan(dir.path(), &registry, Some("echo 5678\n"));

    let (report, calls, _) = run_with(plan, RecordingAdmin::default()).await;

    assert_eq!(report.killed, vec!["node", "registry"]);
    assert!(calls.is_empty());

    let pid = std::fs::read_to_string(&pid_file).expect("pid file");
    let alive = std::process::Command::new("kill")
        .args(["-0", pid.trim()])
        .stderr(std::process::Stdio::null())
        .status()
        .expect("kill -0");
    assert!(!alive.success(), "registry {} still running", pid.trim());
}

#[tokio::test]
async fn registry_short_of_markers_never_reaches_admin() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = "echo 1234\necho 'Client ready'\necho 'Server ready'\necho 'Internal ready'\n";
    let mut plan = plan(dir.path(), registry, Some(NODE_OK));
    plan.provision.push(deploy());

    let (report, calls, _) = run_with(plan, RecordingAdmin::default()).await;

    assert_eq!(report.exit_code, 1);
    assert_eq!(report.reached, FixtureState::RegistryStarting);
    assert_eq!(report.killed, vec!["registry"]);
    assert!(calls.is_empty());
}

#[tokio::test]
async fn silent_registry_times_out() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut plan = plan(dir.path(), "exec sleep 60\n", None);
    plan.harness.handshake_timeout_secs = 1;

    let (report, calls, _) = run_with(plan, RecordingAdmin::default()).await;

    assert_eq!(report.exit_code, 1);
    assert!(report.error.as_deref().is_some_and(|e| e.contains("timed out")));
    assert_eq!(report.killed, vec!["registry"]);
    assert!(calls.is_empty());
}

#[tokio::test]
async fn admin_failure_propagates_status() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut plan = plan(dir.path(), REGISTRY_OK, Some(NODE_OK));
    plan.provision.push(deploy());
    plan.clients.push(client_step(dir.path(), "client", "exit 0\n"));

    let (report, calls, _) =
        run_with(plan, RecordingAdmin::failing("application add", 7)).await;

    assert_eq!(report.exit_code, 7);
    assert_eq!(report.reached, FixtureState::Provisioning);
    assert_eq!(report.killed, vec!["node", "registry"]);
    assert_eq!(calls.len(), 1);
}

#[tokio::test]
async fn client_status_becomes_fixture_status() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut plan = plan(dir.path(), REGISTRY_OK, Some(NODE_OK));
    plan.clients
        .push(client_step(dir.path(), "client", "echo 'test failed' >&2\nexit 5\n"));
    plan.clients.push(client_step(dir.path(), "second", "exit 0\n"));

    let (report, calls, sink) = run_with(plan, RecordingAdmin::default()).await;

    assert_eq!(report.exit_code, 5);
    assert_eq!(report.reached, FixtureState::ClientServerRunning);
    assert!(calls.is_empty());
    assert!(sink.contains("client (stderr): test failed"));
    assert!(!sink.lines().iter().any(|line| line.starts_with("second")));
}

#[tokio::test]
async fn stale_state_is_wiped_before_start() {
    let dir = tempfile::tempdir().expect("tempdir");
    let plan = plan(dir.path(), REGISTRY_OK, Some(NODE_OK));
    let stale = plan.node_data_dir().join("servers").join("server.pid");
    std::fs::create_dir_all(stale.parent().expect("parent")).expect("mkdir");
    std::fs::write(&stale, b"999").expect("write");

    let (report, _, _) = run_with(plan, RecordingAdmin::default()).await;

    assert!(report.success());
    assert!(!stale.exists());
    assert!(dir.path().join("db/registry").is_dir());
}

#[tokio::test]
async fn real_admin_client_receives_locator_and_payload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("admin.log");
    let admin = write_script(
        dir.path(),
        "admin.sh",
        &format!("echo \"$1|$3\" >> '{}'\n", log.display()),
    );

    let mut plan = plan(dir.path(), REGISTRY_OK, Some(NODE_OK));
    plan.admin = AdminClientConfig::new("sh");
    plan.admin.options.push(admin.to_string_lossy().into_owned());
    plan.provision.push(AdminCommand::ServerStart {
        name: "my server".to_string(),
    });

    let sink = Arc::new(MemorySink::new());
    let report = tokio::time::timeout(TEST_TIMEOUT, ClusterFixture::from_plan(plan, sink).run())
        .await
        .expect("fixture run timed out");
    assert!(report.success(), "fixture failed: {:?}", report.error);

    let logged = std::fs::read_to_string(&log).expect("admin log");
    let locator = "--Ice.Default.Locator=IcePack/Locator:default -p 12345";
    assert_eq!(
        logged.lines().collect::<Vec<_>>(),
        vec![
            format!("{locator}|server start \"my server\""),
            format!("{locator}|node shutdown localnode"),
            format!("{locator}|shutdown"),
        ]
    );
}

#[tokio::test]
async fn server_runs_alongside_client_and_is_reaped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut plan = plan(dir.path(), REGISTRY_OK, Some(NODE_OK));
    plan.servers.push(server_step(
        dir.path(),
        "server",
        "echo $$\necho 'TestAdapter ready'\n\
         while [ ! -f client.done ]; do sleep 0.1; done\n\
         echo 'client finished'\n",
    ));
    plan.clients
        .push(client_step(dir.path(), "client", "touch client.done\n"));

    let (report, calls, sink) = run_with(plan, RecordingAdmin::default()).await;

    assert!(report.success(), "fixture failed: {:?}", report.error);
    assert_eq!(report.reached, FixtureState::Done);
    assert!(sink.contains("server: client finished"));
    assert_eq!(calls, vec!["node shutdown localnode", "shutdown"]);
}

#[tokio::test]
async fn failing_client_kills_running_server() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut plan = plan(dir.path(), REGISTRY_OK, Some(NODE_OK));
    plan.servers.push(server_step(
        dir.path(),
        "server",
        "echo $$\necho 'TestAdapter ready'\nexec sleep 60\n",
    ));
    plan.clients.push(client_step(dir.path(), "client", "exit 3\n"));

    let (report, calls, _) = run_with(plan, RecordingAdmin::default()).await;

    assert_eq!(report.exit_code, 3);
    assert_eq!(report.reached, FixtureState::ClientServerRunning);
    assert_eq!(report.killed, vec!["server", "node", "registry"]);
    assert!(calls.is_empty());
}

#[tokio::test]
async fn server_exit_status_fails_scenario() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut plan = plan(dir.path(), REGISTRY_OK, None);
    plan.servers.push(server_step(
        dir.path(),
        "server",
        "echo $$\necho 'TestAdapter ready'\nexit 4\n",
    ));
    plan.clients.push(client_step(dir.path(), "client", "exit 0\n"));

    let (report, calls, _) = run_with(plan, RecordingAdmin::default()).await;

    assert_eq!(report.exit_code, 4);
    assert_eq!(report.reached, FixtureState::ClientServerRunning);
    assert_eq!(report.killed, vec!["registry"]);
    assert!(calls.is_empty());
}

#[tokio::test]
async fn server_missing_its_adapter_marker_aborts_before_clients() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut plan = plan(dir.path(), REGISTRY_OK, None);
    plan.servers
        .push(server_step(dir.path(), "server", "echo $$\n"));
    plan.clients
        .push(client_step(dir.path(), "client", "echo 'client ran'\n"));

    let (report, _, sink) = run_with(plan, RecordingAdmin::default()).await;

    assert_eq!(report.exit_code, 1);
    assert_eq!(report.killed, vec!["server", "registry"]);
    assert!(!sink.contains("client ran"));
}
