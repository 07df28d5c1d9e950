// Environment Provisioner Port
// Creates/verifies/repairs the isolated runtime behind one EnvironmentSpec

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::EnvironmentSpec;

/// What ensure_ready actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Cheap check passed, nothing installed
    AlreadyProvisioned,
    /// Runtime created from scratch and dependencies installed
    Created,
    /// Runtime existed but was incomplete; dependencies installed
    Completed,
    /// Forced repair: runtime removed and recreated
    Recreated,
}

impl std::fmt::Display for ProvisionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisionOutcome::AlreadyProvisioned => write!(f, "already provisioned"),
            ProvisionOutcome::Created => write!(f, "created"),
            ProvisionOutcome::Completed => write!(f, "completed"),
            ProvisionOutcome::Recreated => write!(f, "recreated"),
        }
    }
}

/// Provisioning errors, carrying the underlying diagnostic text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    #[error("Failed to create environment for '{source_id}': {message}")]
    CreateFailed { source_id: String, message: String },

    #[error("Failed to install '{package}' for '{source_id}': {message}")]
    InstallFailed {
        source_id: String,
        package: String,
        message: String,
    },

    #[error("Provisioning step '{step}' for '{source_id}' timed out after {seconds}s")]
    StepTimeout {
        source_id: String,
        step: String,
        seconds: u64,
    },

    #[error("IO error while provisioning '{source_id}': {message}")]
    Io { source_id: String, message: String },
}

/// Result of the cheap, side-effect-free existence check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentProbe {
    pub root_exists: bool,
    pub interpreter_exists: bool,
    /// Installed manifest matches the environment's dependency list
    pub dependencies_recorded: bool,
    pub detail: String,
}

impl EnvironmentProbe {
    pub fn is_provisioned(&self) -> bool {
        self.root_exists && self.interpreter_exists && self.dependencies_recorded
    }
}

/// Provisioner trait
///
/// Implementations:
/// - VenvProvisioner: venv creation + per-package install via configurable commands
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Make the environment usable; `force` recreates it from scratch
    ///
    /// Idempotent. Never retries internally.
    async fn ensure_ready(
        &self,
        spec: &EnvironmentSpec,
        force: bool,
    ) -> Result<ProvisionOutcome, ProvisioningError>;

    /// Existence checks only: never installs, spawns, or touches the network
    fn probe(&self, spec: &EnvironmentSpec) -> EnvironmentProbe;
}
