// Configuration errors

use std::path::PathBuf;
use thiserror::Error;

use isoenv_core::domain::DomainError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No configuration file found (searched: {})", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("Configuration file does not exist: {0}")]
    Missing(PathBuf),

    #[error("Failed to read configuration: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid source registry: {0}")]
    Registry(#[from] DomainError),

    #[error("Failed to load dotenv file {path}: {message}")]
    Dotenv { path: PathBuf, message: String },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
