// Environment Spec Domain Model

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{DomainError, Result};

/// Logical data source name (e.g. "benzinga", "polygon")
pub type SourceId = String;

/// How a script is staged before it is handed to the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WrapperMode {
    /// Python bootstrap that puts the project root on `sys.path` and runs the
    /// script through `runpy` as `__main__`
    #[default]
    Python,
    /// Verbatim copy of the script into the dispatcher temp dir
    Copy,
    /// Run the caller's file in place; nothing is staged
    None,
}

impl std::fmt::Display for WrapperMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WrapperMode::Python => write!(f, "python"),
            WrapperMode::Copy => write!(f, "copy"),
            WrapperMode::None => write!(f, "none"),
        }
    }
}

/// Isolation requirements of one source
///
/// Built once from configuration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    pub source_id: SourceId,
    pub env_root: PathBuf,
    pub interpreter_path: PathBuf,
    /// Install order
    pub dependencies: Vec<String>,
    pub required_secrets: BTreeSet<String>,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    #[serde(default)]
    pub wrapper: WrapperMode,
}

impl EnvironmentSpec {
    /// Minimal spec with an interpreter at the platform default location
    pub fn new(source_id: impl Into<String>, env_root: impl Into<PathBuf>) -> Self {
        let env_root = env_root.into();
        Self {
            source_id: source_id.into(),
            interpreter_path: default_interpreter_path(&env_root),
            env_root,
            dependencies: Vec::new(),
            required_secrets: BTreeSet::new(),
            timeout_seconds: 300,
            max_retries: 3,
            wrapper: WrapperMode::default(),
        }
    }

    pub fn with_interpreter(mut self, path: impl Into<PathBuf>) -> Self {
        self.interpreter_path = path.into();
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_secrets<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_secrets = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout_seconds(mut self, secs: u64) -> Self {
        self.timeout_seconds = secs;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_wrapper(mut self, wrapper: WrapperMode) -> Self {
        self.wrapper = wrapper;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Total attempts the retry controller may make
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Directory holding the interpreter (prepended to the child's PATH)
    pub fn bin_dir(&self) -> Option<&Path> {
        self.interpreter_path.parent()
    }

    /// Validate per-spec invariants
    pub fn validate(&self) -> Result<()> {
        let id_ok = !self.source_id.is_empty()
            && self
                .source_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !id_ok {
            return Err(DomainError::InvalidSourceId(self.source_id.clone()));
        }

        if self.timeout_seconds == 0 {
            return Err(self.invalid("timeout_seconds must be greater than zero"));
        }

        if self.env_root.as_os_str().is_empty() {
            return Err(self.invalid("env_root is empty"));
        }

        if self.interpreter_path.as_os_str().is_empty() {
            return Err(self.invalid("interpreter_path is empty"));
        }

        if let Some(dep) = self.dependencies.iter().find(|d| d.trim().is_empty()) {
            return Err(self.invalid(format!("blank dependency specifier '{dep}'")));
        }

        if let Some(name) = self
            .required_secrets
            .iter()
            .find(|n| n.is_empty() || n.contains('='))
        {
            return Err(self.invalid(format!("invalid secret name '{name}'")));
        }

        Ok(())
    }

    fn invalid(&self, reason: impl Into<String>) -> DomainError {
        DomainError::InvalidSpec {
            source_id: self.source_id.clone(),
            reason: reason.into(),
        }
    }
}

/// Interpreter location inside a venv-style environment root
pub fn default_interpreter_path(env_root: &Path) -> PathBuf {
    if cfg!(windows) {
        env_root.join("Scripts").join("python.exe")
    } else {
        env_root.join("bin").join("python")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_interpreter_inside_root() {
        let spec = EnvironmentSpec::new("polygon", "/opt/envs/polygon");
        assert!(spec.interpreter_path.starts_with("/opt/envs/polygon"));
        assert_eq!(spec.max_attempts(), 4);
    }

    #[test]
    fn test_validate_rejects_bad_source_id() {
        let spec = EnvironmentSpec::new("bad id!", "/tmp/x");
        assert_eq!(
            spec.validate(),
            Err(DomainError::InvalidSourceId("bad id!".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let spec = EnvironmentSpec::new("fmp", "/tmp/fmp").with_timeout_seconds(0);
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("timeout_seconds"));
    }

    #[test]
    fn test_validate_rejects_bad_secret_name() {
        let spec = EnvironmentSpec::new("fmp", "/tmp/fmp").with_secrets(["A=B"]);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_wrapper_mode_serde() {
        let mode: WrapperMode = serde_json::from_str("\"copy\"").unwrap();
        assert_eq!(mode, WrapperMode::Copy);
        assert_eq!(WrapperMode::default(), WrapperMode::Python);
    }
}
