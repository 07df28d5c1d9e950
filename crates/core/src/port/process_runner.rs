// Process Runner Port
// Abstraction over spawning one supervised child process with capture + deadline

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Everything needed to launch one child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// When false the child starts from an empty environment plus `env`
    pub inherit_parent_env: bool,
    pub working_dir: PathBuf,
    pub timeout: Duration,
}

impl ProcessInvocation {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            inherit_parent_env: false,
            working_dir: PathBuf::from("."),
            timeout,
        }
    }
}

/// How the child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Exited(i32),
    /// Terminated by a signal we did not send
    Signalled(Option<i32>),
    /// Deadline hit; the process group was terminated
    TimedOut,
}

/// Captured output of one stream, bounded by the runner's cap
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedStream {
    pub text: String,
    pub truncated: bool,
}

impl CapturedStream {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            truncated: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub outcome: ProcessOutcome,
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
    pub pid: Option<u32>,
}

/// Runner errors (the process never produced an outcome)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Process runner trait
///
/// Implementations:
/// - SubprocessRunner: tokio child process in its own process group
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion or deadline
    ///
    /// # Errors
    /// - RunError::SpawnFailed if the process cannot be started
    /// - RunError::IoError if waiting on the process fails
    async fn run(&self, invocation: ProcessInvocation) -> Result<ProcessOutput, RunError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Runner that replays canned outcomes and records invocations
    pub struct MockProcessRunner {
        responses: Mutex<VecDeque<Result<ProcessOutput, RunError>>>,
        invocations: Mutex<Vec<ProcessInvocation>>,
    }

    impl MockProcessRunner {
        pub fn new(responses: Vec<Result<ProcessOutput, RunError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                invocations: Mutex::new(Vec::new()),
            }
        }

        /// Always exits with `code`
        pub fn exiting(code: i32) -> Self {
            Self::new(vec![Ok(Self::output(ProcessOutcome::Exited(code)))])
        }

        pub fn output(outcome: ProcessOutcome) -> ProcessOutput {
            ProcessOutput {
                outcome,
                stdout: CapturedStream::new("mock stdout"),
                stderr: CapturedStream::default(),
                pid: Some(4242),
            }
        }

        pub fn call_count(&self) -> usize {
            self.invocations.lock().unwrap().len()
        }

        pub fn invocations(&self) -> Vec<ProcessInvocation> {
            self.invocations.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProcessRunner for MockProcessRunner {
        async fn run(&self, invocation: ProcessInvocation) -> Result<ProcessOutput, RunError> {
            self.invocations.lock().unwrap().push(invocation);
            let mut responses = self.responses.lock().unwrap();
            // Last response repeats once the queue is drained
            if responses.len() > 1 {
                responses.pop_front().unwrap_or(Ok(Self::output(ProcessOutcome::Exited(0))))
            } else {
                responses
                    .front()
                    .cloned()
                    .unwrap_or(Ok(Self::output(ProcessOutcome::Exited(0))))
            }
        }
    }
}
