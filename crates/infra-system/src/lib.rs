// isoenv Infrastructure - System Adapters
// Implements: ProcessRunner, Provisioner, ScriptStager, TranscriptSink

pub mod script_stager;
pub mod subprocess_runner;
pub mod transcript;
pub mod venv_provisioner;
pub mod wiring;

pub use script_stager::TempScriptStager;
pub use subprocess_runner::SubprocessRunner;
pub use transcript::FileTranscriptSink;
pub use venv_provisioner::{ProvisionCommands, VenvProvisioner};
pub use wiring::{build_dispatcher, SystemSettings};
