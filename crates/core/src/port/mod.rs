// Port Layer - Interfaces for external dependencies

pub mod env_source;
pub mod process_runner;
pub mod provisioner;
pub mod script_stager;
pub mod task_executor;
pub mod time_provider;
pub mod transcript;

// Re-exports
pub use env_source::{EnvSource, ProcessEnv};
pub use process_runner::{
    CapturedStream, ProcessInvocation, ProcessOutcome, ProcessOutput, ProcessRunner, RunError,
};
pub use provisioner::{EnvironmentProbe, ProvisionOutcome, Provisioner, ProvisioningError};
pub use script_stager::{CleanupError, ScriptStager, StageError, StagedScript};
pub use task_executor::TaskExecutor;
pub use time_provider::TimeProvider;
pub use transcript::{TranscriptError, TranscriptSink};
