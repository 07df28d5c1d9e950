// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DomainError {
    #[error("Duplicate source id: {0}")]
    DuplicateSource(String),

    #[error("Invalid source id '{0}': must be non-empty ASCII alphanumerics, '-' or '_'")]
    InvalidSourceId(String),

    #[error("Environment roots overlap: '{first}' ({first_root}) and '{second}' ({second_root})")]
    OverlappingRoots {
        first: String,
        first_root: String,
        second: String,
        second_root: String,
    },

    #[error("Validation error for '{source_id}': {reason}")]
    InvalidSpec { source_id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, DomainError>;
