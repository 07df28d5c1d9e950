// Execution Domain Model: request, result and the closed failure taxonomy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// `return_code` when the process never started or was killed on timeout
pub const RETURN_CODE_SENTINEL: i32 = -1;

/// One request to run a script inside a source's environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub source_id: String,
    pub script_path: PathBuf,
    #[serde(default)]
    pub script_args: Vec<String>,
    /// Applied last when building the child environment
    #[serde(default)]
    pub extra_env: BTreeMap<String, String>,
}

impl ExecutionRequest {
    pub fn new(source_id: impl Into<String>, script_path: impl Into<PathBuf>) -> Self {
        Self {
            source_id: source_id.into(),
            script_path: script_path.into(),
            script_args: Vec::new(),
            extra_env: BTreeMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.insert(key.into(), value.into());
        self
    }
}

/// Failure tag carried by `ExecutionResult.error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownSource,
    ProvisioningFailed,
    MissingConfiguration,
    Timeout,
    ScriptFailed,
    /// Script file missing or the child could not be spawned
    LaunchFailed,
}

impl ErrorKind {
    /// Dispatch-level failures that another attempt may fix
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::ProvisioningFailed | ErrorKind::Timeout)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::UnknownSource => "UnknownSource",
            ErrorKind::ProvisioningFailed => "ProvisioningFailed",
            ErrorKind::MissingConfiguration => "MissingConfiguration",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::ScriptFailed => "ScriptFailed",
            ErrorKind::LaunchFailed => "LaunchFailed",
        };
        f.write_str(s)
    }
}

/// Structured error: kind + human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl DispatchFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Uniform result of one dispatch, whichever environment ran it
///
/// Failures are values here; the dispatch boundary never returns `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(default)]
    pub stdout_truncated: bool,
    #[serde(default)]
    pub stderr_truncated: bool,
    pub source_id: String,
    pub script_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DispatchFailure>,
    pub attempt_count: u32,
}

impl ExecutionResult {
    /// Result for a call that never reached a child process
    pub fn not_started(
        request: &ExecutionRequest,
        kind: ErrorKind,
        message: impl Into<String>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            success: false,
            return_code: RETURN_CODE_SENTINEL,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            source_id: request.source_id.clone(),
            script_path: request.script_path.clone(),
            started_at,
            finished_at,
            error: Some(DispatchFailure::new(kind, message)),
            attempt_count: 1,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
