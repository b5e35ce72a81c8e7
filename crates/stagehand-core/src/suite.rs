//! Ordered, fail-fast execution of test scenarios.
//!
//! A suite manifest lists the scenarios in run order:
//!
//! ```toml
//! root = "test"
//!
//! [[test]]
//! name = "Ice/operations"
//! script = "Ice/operations/run.sh"
//!
//! [[test]]
//! name = "IcePack/simple"
//! script = "IcePack/simple/run.sh"
//! args = ["--with-deploy"]
//! ```
//!
//! The first scenario to exit nonzero stops the run, and its status becomes
//! the suite's status. Loop mode repeats the whole pass until a failure.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::drain::SharedSink;
use crate::error::{HarnessError, Result};
use crate::launcher::exit_code_of;

/// One scenario in a suite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Scenario name, conventionally its directory under the suite root.
    pub name: String,
    /// Run script, relative to the suite root.
    pub script: PathBuf,
    /// Arguments passed to the script.
    #[serde(default)]
    pub args: Vec<String>,
    /// Program the script is handed to instead of being executed directly.
    #[serde(default)]
    pub interpreter: Option<String>,
}

impl TestCase {
    /// A case running `script` directly.
    #[must_use]
    pub fn new(name: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            args: Vec::new(),
            interpreter: None,
        }
    }

    /// Run the script through `interpreter`.
    #[must_use]
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    /// Full path of the run script.
    #[must_use]
    pub fn script_path(&self, root: &Path) -> PathBuf {
        root.join(&self.script)
    }

    /// Directory the script runs in.
    #[must_use]
    pub fn directory(&self, root: &Path) -> PathBuf {
        let script = self.script_path(root);
        script
            .parent()
            .map_or_else(|| root.to_path_buf(), Path::to_path_buf)
    }
}

/// The ordered scenario list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteManifest {
    /// Directory scripts are relative to.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Scenarios in run order.
    #[serde(default, rename = "test")]
    pub tests: Vec<TestCase>,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

impl SuiteManifest {
    /// Load a manifest, resolving `root` against the manifest's directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::config(format!(
                "failed to read suite manifest '{}': {e}",
                path.display()
            ))
        })?;
        let mut manifest = Self::from_toml(&content)?;
        if manifest.root.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            manifest.root = base.join(&manifest.root);
        }
        Ok(manifest)
    }

    /// Parse a manifest from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or the manifest fails
    /// validation.
    pub fn from_toml(content: &str) -> Result<Self> {
        let manifest: Self = toml::from_str(content)
            .map_err(|e| HarnessError::config(format!("invalid TOML: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validate the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the suite is empty or a case is malformed.
    pub fn validate(&self) -> Result<()> {
        if self.tests.is_empty() {
            return Err(HarnessError::config("suite has no tests"));
        }
        for case in &self.tests {
            if case.name.is_empty() {
                return Err(HarnessError::config("test name cannot be empty"));
            }
            if case.script.as_os_str().is_empty() {
                return Err(HarnessError::config(format!(
                    "test '{}' has no script",
                    case.name
                )));
            }
        }
        Ok(())
    }
}

/// Single pass or repeat until failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunMode {
    /// Run every scenario once.
    #[default]
    Once,
    /// Repeat full passes until a scenario fails.
    Loop,
}

/// Executes one scenario and reports its exit status.
pub trait ScenarioExecutor: Send + Sync {
    /// Run `case` to completion.
    fn execute(
        &self,
        case: &TestCase,
        root: &Path,
    ) -> impl std::future::Future<Output = i32> + Send;
}

/// Runs each scenario's script as a child process with inherited stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptExecutor;

impl ScenarioExecutor for ScriptExecutor {
    async fn execute(&self, case: &TestCase, root: &Path) -> i32 {
        let script = case.script_path(root);
        let mut cmd = match &case.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&script);
                cmd
            }
            None => Command::new(&script),
        };
        cmd.args(&case.args)
            .current_dir(case.directory(root))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(test = %case.name, script = %script.display(), "running test script");
        match cmd.status().await {
            Ok(status) => exit_code_of(status),
            Err(e) => {
                warn!(test = %case.name, script = %script.display(), error = %e, "failed to run test script");
                1
            }
        }
    }
}

/// One executed scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestRecord {
    /// Scenario name.
    pub name: String,
    /// Directory the scenario ran in.
    pub directory: PathBuf,
    /// Pass the scenario ran in, starting at 1.
    pub iteration: u64,
    /// The script's exit status.
    pub exit_code: i32,
}

impl TestRecord {
    /// Check if the scenario passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Outcome of a suite run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteReport {
    /// Scenarios executed in the last pass, in order.
    pub records: Vec<TestRecord>,
    /// Passes started.
    pub iterations: u64,
    /// The failing scenario, if any.
    pub failure: Option<TestRecord>,
}

impl SuiteReport {
    /// The suite's exit status: the failing scenario's status, else 0.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.failure.as_ref().map_or(0, |f| f.exit_code)
    }

    /// The failure as an error, if the suite failed.
    #[must_use]
    pub fn failure_error(&self) -> Option<HarnessError> {
        self.failure.as_ref().map(|f| HarnessError::SuiteFailure {
            name: f.name.clone(),
            exit_code: f.exit_code,
        })
    }
}

/// Runs a suite manifest, fail-fast.
#[derive(Debug)]
pub struct SuiteRunner<E = ScriptExecutor> {
    manifest: SuiteManifest,
    executor: E,
    sink: SharedSink,
    iteration_limit: Option<u64>,
}

impl SuiteRunner<ScriptExecutor> {
    /// Runner executing each scenario's script.
    #[must_use]
    pub fn new(manifest: SuiteManifest, sink: SharedSink) -> Self {
        Self::with_executor(manifest, ScriptExecutor, sink)
    }
}

impl<E: ScenarioExecutor> SuiteRunner<E> {
    /// Runner with a custom executor.
    #[must_use]
    pub fn with_executor(manifest: SuiteManifest, executor: E, sink: SharedSink) -> Self {
        Self {
            manifest,
            executor,
            sink,
            iteration_limit: None,
        }
    }

    /// Stop loop mode after `limit` passing passes.
    #[must_use]
    pub fn with_iteration_limit(mut self, limit: u64) -> Self {
        self.iteration_limit = Some(limit);
        self
    }

    /// The executor.
    #[must_use]
    pub fn executor(&self) -> &E {
        &self.executor
    }

    fn notice(&self, iteration: Option<u64>, text: &str) {
        match iteration {
            Some(n) => self.sink.notice(&format!("[{n}] {text}")),
            None => self.sink.notice(text),
        }
    }

    /// Run one full pass, stopping at the first failure.
    async fn pass(&self, iteration: u64, prefix: Option<u64>) -> (Vec<TestRecord>, Option<TestRecord>) {
        let root = &self.manifest.root;
        let mut records = Vec::with_capacity(self.manifest.tests.len());

        for case in &self.manifest.tests {
            let directory = case.directory(root);
            self.notice(
                prefix,
                &format!("*** running tests in {}", directory.display()),
            );

            let exit_code = self.executor.execute(case, root).await;
            let record = TestRecord {
                name: case.name.clone(),
                directory,
                iteration,
                exit_code,
            };
            records.push(record.clone());

            if !record.passed() {
                self.notice(
                    prefix,
                    &format!(
                        "test in {} failed with exit status {exit_code}",
                        record.directory.display()
                    ),
                );
                return (records, Some(record));
            }
            debug!(test = %case.name, iteration, "test passed");
        }
        (records, None)
    }

    /// Run the suite.
    ///
    /// In [`RunMode::Loop`] every diagnostic is prefixed with the pass
    /// number, and only the last pass's records are kept.
    pub async fn run(&self, mode: RunMode) -> SuiteReport {
        let mut report = SuiteReport::default();
        let tests = self.manifest.tests.len();

        loop {
            report.iterations += 1;
            let iteration = report.iterations;
            let prefix = match mode {
                RunMode::Once => None,
                RunMode::Loop => {
                    self.notice(Some(iteration), "*** starting pass");
                    Some(iteration)
                }
            };
            info!(iteration, tests, "starting suite pass");

            let (records, failure) = self.pass(iteration, prefix).await;
            report.records = records;
            if let Some(failure) = failure {
                warn!(test = %failure.name, exit_code = failure.exit_code, iteration, "suite failed");
                report.failure = Some(failure);
                return report;
            }

            let done = match mode {
                RunMode::Once => true,
                RunMode::Loop => self.iteration_limit.is_some_and(|limit| iteration >= limit),
            };
            if done {
                info!(iterations = report.iterations, "suite passed");
                return report;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drain::MemorySink;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct FakeExecutor {
        statuses: HashMap<String, i32>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeExecutor {
        fn failing(name: &str, status: i32) -> Self {
            let mut statuses = HashMap::new();
            statuses.insert(name.to_string(), status);
            Self {
                statuses,
                calls: Mutex::default(),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    impl ScenarioExecutor for FakeExecutor {
        async fn execute(&self, case: &TestCase, _root: &Path) -> i32 {
            self.calls.lock().push(case.name.clone());
            self.statuses.get(&case.name).copied().unwrap_or(0)
        }
    }

    fn manifest(names: &[&str]) -> SuiteManifest {
        SuiteManifest {
            root: PathBuf::from("test"),
            tests: names
                .iter()
                .map(|name| TestCase::new(*name, format!("{name}/run.sh")))
                .collect(),
        }
    }

    #[tokio::test]
    async fn stops_at_first_failure_with_its_status() {
        let sink = Arc::new(MemorySink::new());
        let runner = SuiteRunner::with_executor(
            manifest(&["Ice/operations", "Ice/exceptions", "Ice/facets", "Ice/objects"]),
            FakeExecutor::failing("Ice/exceptions", 3),
            sink.clone(),
        );

        let report = runner.run(RunMode::Once).await;

        assert_eq!(runner.executor().calls(), vec!["Ice/operations", "Ice/exceptions"]);
        assert_eq!(report.exit_code(), 3);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.failure.as_ref().map(|f| f.name.as_str()), Some("Ice/exceptions"));
        assert!(sink.contains("test in test/Ice/exceptions failed with exit status 3"));
        assert!(matches!(
            report.failure_error(),
            Some(HarnessError::SuiteFailure { exit_code: 3, .. })
        ));
    }

    #[tokio::test]
    async fn passing_suite_runs_everything_once() {
        let sink = Arc::new(MemorySink::new());
        let runner = SuiteRunner::with_executor(
            manifest(&["IceUtil/thread", "IceUtil/uuid"]),
            FakeExecutor::default(),
            sink.clone(),
        );

        let report = runner.run(RunMode::Once).await;

        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.iterations, 1);
        assert_eq!(
            sink.lines(),
            vec![
                "*** running tests in test/IceUtil/thread",
                "*** running tests in test/IceUtil/uuid",
            ]
        );
    }

    #[tokio::test]
    async fn loop_mode_counts_passes_from_one() {
        let sink = Arc::new(MemorySink::new());
        let runner = SuiteRunner::with_executor(
            manifest(&["Ice/gc"]),
            FakeExecutor::default(),
            sink.clone(),
        )
        .with_iteration_limit(3);

        let report = runner.run(RunMode::Loop).await;

        assert_eq!(report.iterations, 3);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(runner.executor().calls().len(), 3);
        assert_eq!(
            sink.lines(),
            vec![
                "[1] *** starting pass",
                "[1] *** running tests in test/Ice/gc",
                "[2] *** starting pass",
                "[2] *** running tests in test/Ice/gc",
                "[3] *** starting pass",
                "[3] *** running tests in test/Ice/gc",
            ]
        );
    }

    #[tokio::test]
    async fn loop_mode_prefixes_failure() {
        let sink = Arc::new(MemorySink::new());
        let runner = SuiteRunner::with_executor(
            manifest(&["Freeze/evictor"]),
            FakeExecutor::failing("Freeze/evictor", 1),
            sink.clone(),
        );

        let report = runner.run(RunMode::Loop).await;

        assert_eq!(report.iterations, 1);
        assert!(sink.contains("[1] test in test/Freeze/evictor failed with exit status 1"));
    }

    #[test]
    fn manifest_parses_ordered_tests() {
        let manifest = SuiteManifest::from_toml(
            r#"
            root = "test"

            [[test]]
            name = "Ice/operations"
            script = "Ice/operations/run.sh"

            [[test]]
            name = "IcePack/simple"
            script = "IcePack/simple/run.sh"
            args = ["--with-deploy"]
            "#,
        )
        .expect("parse");

        assert_eq!(manifest.root, PathBuf::from("test"));
        assert_eq!(manifest.tests.len(), 2);
        assert_eq!(manifest.tests[1].args, vec!["--with-deploy"]);
        assert_eq!(
            manifest.tests[1].directory(&manifest.root),
            PathBuf::from("test/IcePack/simple")
        );
    }

    #[test]
    fn empty_manifest_is_rejected() {
        assert!(SuiteManifest::from_toml("root = \"test\"").is_err());
    }

    #[test]
    fn manifest_root_resolves_against_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("suite.toml");
        std::fs::write(&path, "root = \"test\"\n[[test]]\nname = \"a\"\nscript = \"a/run.sh\"\n")
            .expect("write");

        let manifest = SuiteManifest::from_file(&path).expect("load");
        assert_eq!(manifest.root, dir.path().join("test"));
    }
}
