// Isolated Task Executor
// One attempt: secrets -> provisioning (locked) -> staging -> child process -> cleanup
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::application::constants::{
    DEFAULT_ENV_PASSTHROUGH, PATH_LIST_SEPARATOR, SOURCE_ENV_VAR,
};
use crate::application::locks::ProvisioningLocks;
use crate::domain::{
    DispatchFailure, EnvironmentSpec, ErrorKind, ExecutionRequest, ExecutionResult,
    RETURN_CODE_SENTINEL,
};
use crate::port::{
    EnvSource, ProcessInvocation, ProcessOutcome, ProcessRunner, Provisioner, RunError,
    ScriptStager, StagedScript, TaskExecutor, TimeProvider, TranscriptSink,
};

/// Static knobs for building child processes
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Child working directory and PYTHONPATH
    pub project_root: PathBuf,
    /// Parent variables copied into the child when set
    pub env_passthrough: Vec<String>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            env_passthrough: DEFAULT_ENV_PASSTHROUGH
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Production task executor
pub struct IsolatedTaskExecutor {
    provisioner: Arc<dyn Provisioner>,
    runner: Arc<dyn ProcessRunner>,
    stager: Arc<dyn ScriptStager>,
    env: Arc<dyn EnvSource>,
    time_provider: Arc<dyn TimeProvider>,
    locks: Arc<ProvisioningLocks>,
    transcript: Option<Arc<dyn TranscriptSink>>,
    settings: ExecutorSettings,
}

impl IsolatedTaskExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        runner: Arc<dyn ProcessRunner>,
        stager: Arc<dyn ScriptStager>,
        env: Arc<dyn EnvSource>,
        time_provider: Arc<dyn TimeProvider>,
        locks: Arc<ProvisioningLocks>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            provisioner,
            runner,
            stager,
            env,
            time_provider,
            locks,
            transcript: None,
            settings,
        }
    }

    pub fn with_transcript(mut self, sink: Arc<dyn TranscriptSink>) -> Self {
        self.transcript = Some(sink);
        self
    }

    /// Resolve every required secret; Err lists all missing names
    fn resolve_secrets(&self, spec: &EnvironmentSpec) -> Result<Vec<(String, String)>, Vec<String>> {
        let mut found = Vec::with_capacity(spec.required_secrets.len());
        let mut missing = Vec::new();

        for name in &spec.required_secrets {
            match self.env.var(name) {
                Some(value) if !value.is_empty() => found.push((name.clone(), value)),
                _ => missing.push(name.clone()),
            }
        }

        if missing.is_empty() {
            Ok(found)
        } else {
            Err(missing)
        }
    }

    /// Child environment, built from scratch
    ///
    /// Order (later wins): passthrough, interpreter vars, secrets, request extras.
    fn build_child_env(
        &self,
        spec: &EnvironmentSpec,
        request: &ExecutionRequest,
        secrets: Vec<(String, String)>,
    ) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();

        for name in &self.settings.env_passthrough {
            if let Some(value) = self.env.var(name) {
                env.insert(name.clone(), value);
            }
        }

        if let Some(bin_dir) = spec.bin_dir() {
            let bin_dir = bin_dir.display().to_string();
            let path = match env.get("PATH") {
                Some(inherited) if !inherited.is_empty() => {
                    format!("{bin_dir}{PATH_LIST_SEPARATOR}{inherited}")
                }
                _ => bin_dir,
            };
            env.insert("PATH".to_string(), path);
        }

        env.insert(
            "VIRTUAL_ENV".to_string(),
            spec.env_root.display().to_string(),
        );
        env.insert(
            "PYTHONPATH".to_string(),
            self.settings.project_root.display().to_string(),
        );
        env.insert(SOURCE_ENV_VAR.to_string(), spec.source_id.clone());

        env.extend(secrets);
        env.extend(
            request
                .extra_env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        env
    }

    /// Serialized per source so concurrent callers never race an install
    async fn ensure_provisioned(&self, spec: &EnvironmentSpec) -> Result<(), String> {
        let lock = self.locks.for_source(&spec.source_id);
        let _guard = lock.lock().await;

        match self.provisioner.ensure_ready(spec, false).await {
            Ok(outcome) => {
                debug!(source_id = %spec.source_id, outcome = %outcome, "Environment ready");
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    fn early_failure(
        &self,
        request: &ExecutionRequest,
        kind: ErrorKind,
        message: String,
        started_at: DateTime<Utc>,
    ) -> ExecutionResult {
        warn!(
            source_id = %request.source_id,
            kind = %kind,
            message = %message,
            "Dispatch failed before spawn"
        );
        ExecutionResult::not_started(request, kind, message, started_at, self.time_provider.now())
    }

    /// Spawn the staged script and classify the outcome
    async fn run_staged(
        &self,
        spec: &EnvironmentSpec,
        request: &ExecutionRequest,
        staged: &StagedScript,
        secrets: Vec<(String, String)>,
        started_at: DateTime<Utc>,
    ) -> ExecutionResult {
        let mut args = Vec::with_capacity(request.script_args.len() + 1);
        args.push(staged.path.display().to_string());
        args.extend(request.script_args.iter().cloned());

        let invocation = ProcessInvocation {
            program: spec.interpreter_path.clone(),
            args,
            env: self.build_child_env(spec, request, secrets),
            inherit_parent_env: false,
            working_dir: self.settings.project_root.clone(),
            timeout: spec.timeout(),
        };

        info!(
            source_id = %spec.source_id,
            script = %request.script_path.display(),
            interpreter = %spec.interpreter_path.display(),
            timeout_secs = spec.timeout_seconds,
            "Executing script in isolated environment"
        );

        let output = self.runner.run(invocation).await;
        let finished_at = self.time_provider.now();

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                let message = match &e {
                    RunError::SpawnFailed(msg) => format!("failed to spawn interpreter: {msg}"),
                    RunError::IoError(msg) => format!("failed while waiting on child: {msg}"),
                };
                error!(source_id = %spec.source_id, error = %e, "Child process launch failed");
                return ExecutionResult::not_started(
                    request,
                    ErrorKind::LaunchFailed,
                    message,
                    started_at,
                    finished_at,
                );
            }
        };

        let (return_code, error) = match output.outcome {
            ProcessOutcome::Exited(0) => (0, None),
            ProcessOutcome::Exited(code) => (
                code,
                Some(DispatchFailure::new(
                    ErrorKind::ScriptFailed,
                    format!("script exited with return code {code}"),
                )),
            ),
            ProcessOutcome::Signalled(signal) => (
                RETURN_CODE_SENTINEL,
                Some(DispatchFailure::new(
                    ErrorKind::ScriptFailed,
                    match signal {
                        Some(sig) => format!("script terminated by signal {sig}"),
                        None => "script terminated abnormally".to_string(),
                    },
                )),
            ),
            ProcessOutcome::TimedOut => (
                RETURN_CODE_SENTINEL,
                Some(DispatchFailure::new(
                    ErrorKind::Timeout,
                    format!(
                        "execution timed out after {} seconds",
                        spec.timeout_seconds
                    ),
                )),
            ),
        };

        let result = ExecutionResult {
            success: error.is_none(),
            return_code,
            stdout: output.stdout.text,
            stderr: output.stderr.text,
            stdout_truncated: output.stdout.truncated,
            stderr_truncated: output.stderr.truncated,
            source_id: request.source_id.clone(),
            script_path: request.script_path.clone(),
            started_at,
            finished_at,
            error,
            attempt_count: 1,
        };

        match &result.error {
            None => info!(
                source_id = %spec.source_id,
                pid = ?output.pid,
                duration_ms = result.duration_ms(),
                "Script executed successfully"
            ),
            Some(failure) => error!(
                source_id = %spec.source_id,
                pid = ?output.pid,
                exit_code = result.return_code,
                kind = %failure.kind,
                duration_ms = result.duration_ms(),
                "Script execution failed"
            ),
        }

        result
    }

    fn record_transcript(&self, result: &ExecutionResult) {
        if let Some(sink) = &self.transcript {
            if let Err(e) = sink.record(result) {
                warn!(source_id = %result.source_id, error = %e, "Failed to write transcript");
            }
        }
    }
}

#[async_trait]
impl TaskExecutor for IsolatedTaskExecutor {
    async fn execute(&self, spec: &EnvironmentSpec, request: &ExecutionRequest) -> ExecutionResult {
        let started_at = self.time_provider.now();

        // 1. Secrets first: a missing key never costs a provisioning run
        let secrets = match self.resolve_secrets(spec) {
            Ok(secrets) => secrets,
            Err(missing) => {
                return self.early_failure(
                    request,
                    ErrorKind::MissingConfiguration,
                    format!("missing required secrets: {}", missing.join(", ")),
                    started_at,
                );
            }
        };

        // 2. Lazy provisioning
        if let Err(message) = self.ensure_provisioned(spec).await {
            return self.early_failure(request, ErrorKind::ProvisioningFailed, message, started_at);
        }

        // 3. Stage the transient artifact
        let staged = match self
            .stager
            .stage(&spec.source_id, &request.script_path, spec.wrapper)
        {
            Ok(staged) => staged,
            Err(e) => {
                return self.early_failure(
                    request,
                    ErrorKind::LaunchFailed,
                    e.to_string(),
                    started_at,
                );
            }
        };

        // 4. Run; every path below reaches cleanup
        let result = self
            .run_staged(spec, request, &staged, secrets, started_at)
            .await;

        if let Err(e) = self.stager.cleanup(&staged) {
            warn!(source_id = %spec.source_id, error = %e, "Failed to clean up staged script");
        }

        self.record_transcript(&result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WrapperMode;
    use crate::port::env_source::mocks::StaticEnv;
    use crate::port::env_source::MockEnvSource;
    use crate::port::process_runner::mocks::MockProcessRunner;
    use crate::port::provisioner::MockProvisioner;
    use crate::port::script_stager::mocks::RecordingStager;
    use crate::port::time_provider::SystemTimeProvider;
    use crate::port::{ProvisionOutcome, ProvisioningError};

    fn ready_provisioner() -> MockProvisioner {
        let mut provisioner = MockProvisioner::new();
        provisioner
            .expect_ensure_ready()
            .returning(|_, _| Ok(ProvisionOutcome::AlreadyProvisioned));
        provisioner
    }

    fn executor(
        provisioner: MockProvisioner,
        runner: Arc<MockProcessRunner>,
        stager: Arc<RecordingStager>,
        env: Arc<dyn EnvSource>,
    ) -> IsolatedTaskExecutor {
        IsolatedTaskExecutor::new(
            Arc::new(provisioner),
            runner,
            stager,
            env,
            Arc::new(SystemTimeProvider),
            Arc::new(ProvisioningLocks::new()),
            ExecutorSettings {
                project_root: PathBuf::from("/project"),
                env_passthrough: vec!["PATH".to_string(), "HOME".to_string()],
            },
        )
    }

    fn spec() -> EnvironmentSpec {
        EnvironmentSpec::new("benzinga", "/envs/benzinga")
            .with_secrets(["BENZINGA_API_KEY"])
            .with_timeout_seconds(5)
            .with_wrapper(WrapperMode::Python)
    }

    fn env_with_secret() -> Arc<dyn EnvSource> {
        Arc::new(
            StaticEnv::new()
                .with("BENZINGA_API_KEY", "secret-value")
                .with("PATH", "/usr/bin")
                .with("HOME", "/home/me")
                .with("AWS_SECRET_ACCESS_KEY", "must-not-leak"),
        )
    }

    #[tokio::test]
    async fn test_success_builds_explicit_environment() {
        let runner = Arc::new(MockProcessRunner::exiting(0));
        let stager = Arc::new(RecordingStager::new());
        let exec = executor(
            ready_provisioner(),
            runner.clone(),
            stager.clone(),
            env_with_secret(),
        );

        let request = ExecutionRequest::new("benzinga", "fetch.py")
            .with_args(["--symbol", "AAPL"])
            .with_env("MODE", "daily");
        let result = exec.execute(&spec(), &request).await;

        assert!(result.success);
        assert_eq!(result.return_code, 0);
        assert!(result.error.is_none());
        assert!(result.finished_at >= result.started_at);

        let invocations = runner.invocations();
        assert_eq!(invocations.len(), 1);
        let inv = &invocations[0];
        assert_eq!(inv.program, PathBuf::from("/envs/benzinga/bin/python"));
        assert_eq!(inv.args[0], "/staged/benzinga-1.py");
        assert_eq!(&inv.args[1..], &["--symbol", "AAPL"]);
        assert!(!inv.inherit_parent_env);
        assert_eq!(inv.working_dir, PathBuf::from("/project"));
        assert_eq!(inv.env["BENZINGA_API_KEY"], "secret-value");
        assert_eq!(inv.env["MODE"], "daily");
        assert_eq!(inv.env["VIRTUAL_ENV"], "/envs/benzinga");
        assert_eq!(inv.env["PYTHONPATH"], "/project");
        assert_eq!(inv.env[SOURCE_ENV_VAR], "benzinga");
        assert!(inv.env["PATH"].starts_with("/envs/benzinga/bin"));
        assert!(!inv.env.contains_key("AWS_SECRET_ACCESS_KEY"));

        assert!(stager.live_artifacts().is_empty());
    }

    #[tokio::test]
    async fn test_missing_secret_skips_provisioning_and_spawn() {
        let mut provisioner = MockProvisioner::new();
        provisioner.expect_ensure_ready().times(0);

        let mut env = MockEnvSource::new();
        env.expect_var().times(1).returning(|_| None);

        let runner = Arc::new(MockProcessRunner::exiting(0));
        let stager = Arc::new(RecordingStager::new());
        let exec = executor(provisioner, runner.clone(), stager.clone(), Arc::new(env));

        let result = exec
            .execute(&spec(), &ExecutionRequest::new("benzinga", "fetch.py"))
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::MissingConfiguration));
        assert!(result
            .error
            .as_ref()
            .is_some_and(|e| e.message.contains("BENZINGA_API_KEY")));
        assert_eq!(runner.call_count(), 0);
        assert_eq!(stager.staged_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_secret_counts_as_missing() {
        let env = Arc::new(StaticEnv::new().with("BENZINGA_API_KEY", ""));
        let runner = Arc::new(MockProcessRunner::exiting(0));
        let exec = executor(
            ready_provisioner(),
            runner.clone(),
            Arc::new(RecordingStager::new()),
            env,
        );

        let result = exec
            .execute(&spec(), &ExecutionRequest::new("benzinga", "fetch.py"))
            .await;

        assert_eq!(result.error_kind(), Some(ErrorKind::MissingConfiguration));
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_provisioning_failure_does_not_spawn() {
        let mut provisioner = MockProvisioner::new();
        provisioner.expect_ensure_ready().times(1).returning(|spec, _| {
            Err(ProvisioningError::InstallFailed {
                source_id: spec.source_id.clone(),
                package: "urllib3==1.25.10".to_string(),
                message: "no matching distribution".to_string(),
            })
        });

        let runner = Arc::new(MockProcessRunner::exiting(0));
        let stager = Arc::new(RecordingStager::new());
        let exec = executor(provisioner, runner.clone(), stager.clone(), env_with_secret());

        let result = exec
            .execute(&spec(), &ExecutionRequest::new("benzinga", "fetch.py"))
            .await;

        assert_eq!(result.error_kind(), Some(ErrorKind::ProvisioningFailed));
        assert_eq!(result.return_code, RETURN_CODE_SENTINEL);
        assert!(result
            .error
            .as_ref()
            .is_some_and(|e| e.message.contains("no matching distribution")));
        assert_eq!(runner.call_count(), 0);
        assert_eq!(stager.staged_count(), 0);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_script_failed() {
        let runner = Arc::new(MockProcessRunner::exiting(3));
        let stager = Arc::new(RecordingStager::new());
        let exec = executor(
            ready_provisioner(),
            runner,
            stager.clone(),
            env_with_secret(),
        );

        let result = exec
            .execute(&spec(), &ExecutionRequest::new("benzinga", "fetch.py"))
            .await;

        assert!(!result.success);
        assert_eq!(result.return_code, 3);
        assert_eq!(result.error_kind(), Some(ErrorKind::ScriptFailed));
        assert_eq!(result.stdout, "mock stdout");
        assert!(stager.live_artifacts().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_reports_sentinel_and_cleans_up() {
        let runner = Arc::new(MockProcessRunner::new(vec![Ok(MockProcessRunner::output(
            ProcessOutcome::TimedOut,
        ))]));
        let stager = Arc::new(RecordingStager::new());
        let exec = executor(
            ready_provisioner(),
            runner,
            stager.clone(),
            env_with_secret(),
        );

        let result = exec
            .execute(&spec(), &ExecutionRequest::new("benzinga", "fetch.py"))
            .await;

        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(result.return_code, RETURN_CODE_SENTINEL);
        assert_eq!(result.stdout, "mock stdout");
        assert_eq!(stager.staged_count(), 1);
        assert!(stager.live_artifacts().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_launch_failed_and_cleans_up() {
        let runner = Arc::new(MockProcessRunner::new(vec![Err(RunError::SpawnFailed(
            "No such file or directory".to_string(),
        ))]));
        let stager = Arc::new(RecordingStager::new());
        let exec = executor(
            ready_provisioner(),
            runner,
            stager.clone(),
            env_with_secret(),
        );

        let result = exec
            .execute(&spec(), &ExecutionRequest::new("benzinga", "fetch.py"))
            .await;

        assert_eq!(result.error_kind(), Some(ErrorKind::LaunchFailed));
        assert!(stager.live_artifacts().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_failure_never_fails_success() {
        let stager = Arc::new(RecordingStager::failing_cleanup());
        let exec = executor(
            ready_provisioner(),
            Arc::new(MockProcessRunner::exiting(0)),
            stager,
            env_with_secret(),
        );

        let result = exec
            .execute(&spec(), &ExecutionRequest::new("benzinga", "fetch.py"))
            .await;

        assert!(result.success);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_request_env_overrides_last() {
        let runner = Arc::new(MockProcessRunner::exiting(0));
        let exec = executor(
            ready_provisioner(),
            runner.clone(),
            Arc::new(RecordingStager::new()),
            env_with_secret(),
        );

        let request = ExecutionRequest::new("benzinga", "fetch.py").with_env("HOME", "/sandbox");
        exec.execute(&spec(), &request).await;

        assert_eq!(runner.invocations()[0].env["HOME"], "/sandbox");
    }
}
