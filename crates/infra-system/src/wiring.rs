// Composition root for the system adapters
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use isoenv_core::application::constants::{
    DEFAULT_ENV_PASSTHROUGH, DEFAULT_KILL_GRACE, DEFAULT_OUTPUT_CAP_BYTES,
    DEFAULT_PROVISION_STEP_TIMEOUT,
};
use isoenv_core::application::{Dispatcher, DispatcherDeps, ExecutorSettings, RetryPolicy};
use isoenv_core::domain::Registry;
use isoenv_core::port::time_provider::SystemTimeProvider;
use isoenv_core::port::{ProcessEnv, TranscriptSink};

use crate::{
    FileTranscriptSink, ProvisionCommands, SubprocessRunner, TempScriptStager, VenvProvisioner,
};

/// Everything the system adapters need besides the registry
#[derive(Debug, Clone)]
pub struct SystemSettings {
    pub project_root: PathBuf,
    pub temp_dir: PathBuf,
    /// None disables the stdout/stderr transcript files
    pub transcript_dir: Option<PathBuf>,
    pub output_cap_bytes: usize,
    pub kill_grace: Duration,
    pub retry_policy: RetryPolicy,
    pub env_passthrough: Vec<String>,
    pub provision_commands: ProvisionCommands,
    pub provision_step_timeout: Duration,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            temp_dir: std::env::temp_dir().join("isoenv_dispatcher"),
            transcript_dir: None,
            output_cap_bytes: DEFAULT_OUTPUT_CAP_BYTES,
            kill_grace: DEFAULT_KILL_GRACE,
            retry_policy: RetryPolicy::default(),
            env_passthrough: DEFAULT_ENV_PASSTHROUGH
                .iter()
                .map(|s| s.to_string())
                .collect(),
            provision_commands: ProvisionCommands::default(),
            provision_step_timeout: DEFAULT_PROVISION_STEP_TIMEOUT,
        }
    }
}

/// Wire a Dispatcher with subprocess, venv and temp-dir adapters
pub fn build_dispatcher(registry: Arc<Registry>, settings: SystemSettings) -> Dispatcher {
    let runner = Arc::new(SubprocessRunner::new(
        settings.output_cap_bytes,
        settings.kill_grace,
    ));

    let provisioner = Arc::new(
        VenvProvisioner::new(runner.clone(), settings.provision_commands.clone())
            .with_step_timeout(settings.provision_step_timeout),
    );

    let stager = Arc::new(TempScriptStager::new(
        &settings.temp_dir,
        &settings.project_root,
    ));

    let transcript = settings
        .transcript_dir
        .as_ref()
        .map(|dir| Arc::new(FileTranscriptSink::new(dir)) as Arc<dyn TranscriptSink>);

    info!(
        sources = registry.len(),
        project_root = %settings.project_root.display(),
        temp_dir = %settings.temp_dir.display(),
        transcripts = transcript.is_some(),
        "Dispatcher wired"
    );

    Dispatcher::new(
        registry,
        DispatcherDeps {
            provisioner,
            runner,
            stager,
            env: Arc::new(ProcessEnv),
            time_provider: Arc::new(SystemTimeProvider),
            transcript,
        },
        ExecutorSettings {
            project_root: settings.project_root,
            env_passthrough: settings.env_passthrough,
        },
        settings.retry_policy,
    )
}
