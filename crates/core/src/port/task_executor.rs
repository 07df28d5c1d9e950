// Task Executor Port
// One attempt at running a request inside its source's environment

use async_trait::async_trait;

use crate::domain::{EnvironmentSpec, ExecutionRequest, ExecutionResult};

/// Task Executor trait
///
/// Implementations:
/// - IsolatedTaskExecutor: secrets check, provisioning, staging, child process
///
/// Never fails: every outcome is encoded in the returned ExecutionResult.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, spec: &EnvironmentSpec, request: &ExecutionRequest)
        -> ExecutionResult;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::{DispatchFailure, ErrorKind, RETURN_CODE_SENTINEL};
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Executor that replays a script of outcomes: None = success
    ///
    /// The last entry repeats once the script is exhausted.
    pub struct ScriptedExecutor {
        script: Mutex<VecDeque<Option<ErrorKind>>>,
        call_count: Mutex<usize>,
    }

    impl ScriptedExecutor {
        pub fn new(script: Vec<Option<ErrorKind>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                call_count: Mutex::new(0),
            }
        }

        pub fn always(kind: ErrorKind) -> Self {
            Self::new(vec![Some(kind)])
        }

        pub fn call_count(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl TaskExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            _spec: &EnvironmentSpec,
            request: &ExecutionRequest,
        ) -> ExecutionResult {
            *self.call_count.lock().unwrap() += 1;

            let next = {
                let mut script = self.script.lock().unwrap();
                if script.len() > 1 {
                    script.pop_front().flatten()
                } else {
                    script.front().copied().flatten()
                }
            };

            let now = Utc::now();
            match next {
                None => ExecutionResult {
                    success: true,
                    return_code: 0,
                    stdout: "mock output".to_string(),
                    stderr: String::new(),
                    stdout_truncated: false,
                    stderr_truncated: false,
                    source_id: request.source_id.clone(),
                    script_path: request.script_path.clone(),
                    started_at: now,
                    finished_at: now,
                    error: None,
                    attempt_count: 1,
                },
                Some(kind) => {
                    let return_code = if kind == ErrorKind::ScriptFailed {
                        1
                    } else {
                        RETURN_CODE_SENTINEL
                    };
                    ExecutionResult {
                        return_code,
                        error: Some(DispatchFailure::new(kind, "scripted failure")),
                        ..ExecutionResult::not_started(request, kind, "", now, now)
                    }
                }
            }
        }
    }
}
