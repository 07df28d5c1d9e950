// Dispatcher facade: the only entry point collaborators call
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::executor::{ExecutorSettings, IsolatedTaskExecutor};
use crate::application::locks::ProvisioningLocks;
use crate::application::retry::{RetryController, RetryPolicy};
use crate::application::status::StatusReporter;
use crate::domain::{EnvironmentStatus, ErrorKind, ExecutionRequest, ExecutionResult, Registry};
use crate::error::{AppError, Result};
use crate::port::{
    CleanupError, EnvSource, ProcessRunner, ProvisionOutcome, Provisioner, ScriptStager,
    TaskExecutor, TimeProvider, TranscriptSink,
};

/// Adapters the dispatcher is wired with (composition root fills this in)
pub struct DispatcherDeps {
    pub provisioner: Arc<dyn Provisioner>,
    pub runner: Arc<dyn ProcessRunner>,
    pub stager: Arc<dyn ScriptStager>,
    pub env: Arc<dyn EnvSource>,
    pub time_provider: Arc<dyn TimeProvider>,
    pub transcript: Option<Arc<dyn TranscriptSink>>,
}

/// Environment-isolated task dispatcher
///
/// Holds the immutable registry plus per-source provisioning locks; nothing
/// else is shared between calls.
pub struct Dispatcher {
    registry: Arc<Registry>,
    retry: RetryController,
    status: StatusReporter,
    provisioner: Arc<dyn Provisioner>,
    stager: Arc<dyn ScriptStager>,
    locks: Arc<ProvisioningLocks>,
    time_provider: Arc<dyn TimeProvider>,
}

impl Dispatcher {
    /// Wire the production executor from adapters
    pub fn new(
        registry: Arc<Registry>,
        deps: DispatcherDeps,
        settings: ExecutorSettings,
        policy: RetryPolicy,
    ) -> Self {
        let locks = Arc::new(ProvisioningLocks::for_registry(&registry));

        let mut executor = IsolatedTaskExecutor::new(
            deps.provisioner.clone(),
            deps.runner,
            deps.stager.clone(),
            deps.env,
            deps.time_provider.clone(),
            locks.clone(),
            settings,
        );
        if let Some(sink) = deps.transcript {
            executor = executor.with_transcript(sink);
        }

        Self::with_executor(
            registry,
            Arc::new(executor),
            deps.provisioner,
            deps.stager,
            deps.time_provider,
            locks,
            policy,
        )
    }

    /// Wire an arbitrary executor (tests, alternative runtimes)
    pub fn with_executor(
        registry: Arc<Registry>,
        executor: Arc<dyn TaskExecutor>,
        provisioner: Arc<dyn Provisioner>,
        stager: Arc<dyn ScriptStager>,
        time_provider: Arc<dyn TimeProvider>,
        locks: Arc<ProvisioningLocks>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            retry: RetryController::new(executor, policy),
            status: StatusReporter::new(provisioner.clone(), time_provider.clone()),
            provisioner,
            stager,
            locks,
            time_provider,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Dispatch call: run `script_path args...` in `source_id`'s environment
    pub async fn dispatch(
        &self,
        source_id: &str,
        script_path: impl Into<PathBuf>,
        script_args: Vec<String>,
    ) -> ExecutionResult {
        let request = ExecutionRequest::new(source_id, script_path).with_args(script_args);
        self.dispatch_request(&request).await
    }

    /// Dispatch call with request-level env overrides
    ///
    /// Never fails: unknown sources come back as `ErrorKind::UnknownSource`.
    pub async fn dispatch_request(&self, request: &ExecutionRequest) -> ExecutionResult {
        let Some(spec) = self.registry.get(&request.source_id) else {
            let now = self.time_provider.now();
            let available: Vec<&str> = self.registry.source_ids().collect();
            warn!(source_id = %request.source_id, "Unknown source requested");
            // Nothing was attempted
            return ExecutionResult {
                attempt_count: 0,
                ..ExecutionResult::not_started(
                    request,
                    ErrorKind::UnknownSource,
                    format!(
                        "unknown source '{}'; available: {}",
                        request.source_id,
                        available.join(", ")
                    ),
                    now,
                    now,
                )
            };
        };

        info!(
            source_id = %request.source_id,
            script = %request.script_path.display(),
            args = request.script_args.len(),
            "Dispatching task"
        );

        self.retry.dispatch(spec, request).await
    }

    /// Status call: per-source environment health
    pub fn status(&self) -> BTreeMap<String, EnvironmentStatus> {
        self.status.status(&self.registry)
    }

    /// Operator-driven create or repair of one environment
    pub async fn provision(&self, source_id: &str, force: bool) -> Result<ProvisionOutcome> {
        let spec = self
            .registry
            .get(source_id)
            .ok_or_else(|| AppError::UnknownSource(source_id.to_string()))?;

        let lock = self.locks.for_source(source_id);
        let _guard = lock.lock().await;

        info!(source_id = %source_id, force = force, "Provisioning environment");
        let outcome = self.provisioner.ensure_ready(spec, force).await?;
        info!(source_id = %source_id, outcome = %outcome, "Provisioning finished");
        Ok(outcome)
    }

    /// Teardown call: release transient resources; idempotent
    pub fn teardown(&self) -> std::result::Result<(), CleanupError> {
        match self.stager.teardown() {
            Ok(()) => {
                info!("Dispatcher transient resources released");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Dispatcher teardown incomplete");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EnvironmentSpec;
    use crate::port::provisioner::MockProvisioner;
    use crate::port::script_stager::mocks::RecordingStager;
    use crate::port::task_executor::mocks::ScriptedExecutor;
    use crate::port::time_provider::SystemTimeProvider;

    fn registry() -> Arc<Registry> {
        Arc::new(
            Registry::new(vec![
                EnvironmentSpec::new("benzinga", "/envs/benzinga").with_max_retries(2),
                EnvironmentSpec::new("polygon", "/envs/polygon").with_max_retries(2),
            ])
            .unwrap(),
        )
    }

    fn dispatcher(
        executor: Arc<ScriptedExecutor>,
        provisioner: MockProvisioner,
        stager: Arc<RecordingStager>,
    ) -> Dispatcher {
        let registry = registry();
        let locks = Arc::new(ProvisioningLocks::for_registry(&registry));
        Dispatcher::with_executor(
            registry,
            executor,
            Arc::new(provisioner),
            stager,
            Arc::new(SystemTimeProvider),
            locks,
            RetryPolicy::immediate(),
        )
    }

    #[tokio::test]
    async fn test_unknown_source_has_no_side_effects() {
        let executor = Arc::new(ScriptedExecutor::new(vec![None]));
        let stager = Arc::new(RecordingStager::new());
        let mut provisioner = MockProvisioner::new();
        provisioner.expect_ensure_ready().times(0);

        let dispatcher = dispatcher(executor.clone(), provisioner, stager.clone());
        let result = dispatcher
            .dispatch("alpha_vantage", "fetch.py", vec![])
            .await;

        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ErrorKind::UnknownSource));
        assert_eq!(result.attempt_count, 0);
        assert!(result
            .error
            .as_ref()
            .is_some_and(|e| e.message.contains("benzinga, polygon")));
        assert_eq!(executor.call_count(), 0);
        assert_eq!(stager.staged_count(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_goes_through_retry_controller() {
        let executor = Arc::new(ScriptedExecutor::new(vec![
            Some(ErrorKind::Timeout),
            Some(ErrorKind::Timeout),
            None,
        ]));
        let dispatcher = dispatcher(
            executor.clone(),
            MockProvisioner::new(),
            Arc::new(RecordingStager::new()),
        );

        let result = dispatcher
            .dispatch("polygon", "news.py", vec!["--symbol".into(), "AAPL".into()])
            .await;

        assert!(result.success);
        assert_eq!(result.attempt_count, 3);
        assert_eq!(result.source_id, "polygon");
    }

    #[tokio::test]
    async fn test_provision_unknown_source_is_error() {
        let dispatcher = dispatcher(
            Arc::new(ScriptedExecutor::new(vec![None])),
            MockProvisioner::new(),
            Arc::new(RecordingStager::new()),
        );

        let err = dispatcher.provision("nope", false).await.unwrap_err();
        assert!(matches!(err, AppError::UnknownSource(id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_provision_force_passes_through() {
        let mut provisioner = MockProvisioner::new();
        provisioner
            .expect_ensure_ready()
            .withf(|spec, force| spec.source_id == "benzinga" && *force)
            .times(1)
            .returning(|_, _| Ok(ProvisionOutcome::Recreated));

        let dispatcher = dispatcher(
            Arc::new(ScriptedExecutor::new(vec![None])),
            provisioner,
            Arc::new(RecordingStager::new()),
        );

        let outcome = dispatcher.provision("benzinga", true).await.unwrap();
        assert_eq!(outcome, ProvisionOutcome::Recreated);
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let dispatcher = dispatcher(
            Arc::new(ScriptedExecutor::new(vec![None])),
            MockProvisioner::new(),
            Arc::new(RecordingStager::new()),
        );

        assert!(dispatcher.teardown().is_ok());
        assert!(dispatcher.teardown().is_ok());
    }
}
