// Raw configuration model, as deserialized from TOML + env overrides
// Paths here are unresolved; see LoadedConfig for the resolved view.
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use isoenv_core::application::constants::{
    DEFAULT_ENV_PASSTHROUGH, DEFAULT_KILL_GRACE, DEFAULT_OUTPUT_CAP_BYTES,
    DEFAULT_PROVISION_STEP_TIMEOUT, DEFAULT_RETRY_BASE_DELAY, DEFAULT_RETRY_MAX_DELAY,
};
use isoenv_core::domain::WrapperMode;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dispatcher: DispatcherSection,
    pub provisioner: ProvisionerSection,
    pub sources: BTreeMap<String, SourceSection>,
}

/// `[dispatcher]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherSection {
    pub project_root: PathBuf,
    /// None means `<system temp>/isoenv_dispatcher`
    pub temp_dir: Option<PathBuf>,
    pub transcript_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub dotenv_path: Option<PathBuf>,
    pub output_cap_bytes: usize,
    pub kill_grace_ms: u64,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub env_passthrough: Vec<String>,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            temp_dir: None,
            transcript_dir: None,
            log_dir: None,
            dotenv_path: None,
            output_cap_bytes: DEFAULT_OUTPUT_CAP_BYTES,
            kill_grace_ms: DEFAULT_KILL_GRACE.as_millis() as u64,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY.as_millis() as u64,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY.as_millis() as u64,
            env_passthrough: DEFAULT_ENV_PASSTHROUGH
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// `[provisioner]`; unset commands fall back to `python3 -m venv` / pip
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvisionerSection {
    pub create_command: Option<Vec<String>>,
    pub install_command: Option<Vec<String>>,
    pub timeout_seconds: u64,
}

impl Default for ProvisionerSection {
    fn default() -> Self {
        Self {
            create_command: None,
            install_command: None,
            timeout_seconds: DEFAULT_PROVISION_STEP_TIMEOUT.as_secs(),
        }
    }
}

fn default_source_timeout() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

/// `[sources.<id>]`
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSection {
    pub env_root: PathBuf,
    #[serde(default)]
    pub interpreter_path: Option<PathBuf>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub required_secrets: Vec<String>,
    #[serde(default = "default_source_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub wrapper: WrapperMode,
}
