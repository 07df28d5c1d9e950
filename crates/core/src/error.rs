// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
///
/// Dispatch itself never returns this: failures there are data inside
/// `ExecutionResult`. Operator calls (provision, teardown, registry build) do.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Provisioning error: {0}")]
    Provisioning(#[from] crate::port::ProvisioningError),

    #[error("Cleanup error: {0}")]
    Cleanup(#[from] crate::port::CleanupError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
