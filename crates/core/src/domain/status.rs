// Environment Status Domain Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Health of one source's environment, from cheap on-disk checks only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentStatus {
    pub source_id: String,
    pub provisioned: bool,
    pub interpreter_exists: bool,
    pub root_exists: bool,
    pub env_root: PathBuf,
    pub interpreter_path: PathBuf,
    pub last_checked_at: DateTime<Utc>,
    pub detail: String,
}
