// Script Stager Port (Cleanup Manager)
// Writes per-request transient artifacts and removes them on every exit path

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::WrapperMode;

/// A script ready to hand to the interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedScript {
    pub path: PathBuf,
    /// The caller's script the staged file stands in for
    pub original: PathBuf,
    /// True when `path` is a transient artifact that cleanup must remove
    pub owned: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("Script not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to stage {path}: {message}")]
    Io { path: PathBuf, message: String },
}

/// Non-fatal: logged by callers, never surfaced as a dispatch failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cleanup failed for {path}: {message}")]
pub struct CleanupError {
    pub path: PathBuf,
    pub message: String,
}

/// Script stager trait
///
/// Implementations:
/// - TempScriptStager: wrapper/copy under the dispatcher temp dir
pub trait ScriptStager: Send + Sync {
    /// Prepare `script` for `source_id` according to `mode`
    fn stage(
        &self,
        source_id: &str,
        script: &Path,
        mode: WrapperMode,
    ) -> Result<StagedScript, StageError>;

    /// Remove one staged artifact; absent files are not an error
    fn cleanup(&self, staged: &StagedScript) -> Result<(), CleanupError>;

    /// Remove every transient resource the stager holds; idempotent
    fn teardown(&self) -> Result<(), CleanupError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Stager that tracks live artifacts without touching the filesystem
    #[derive(Default)]
    pub struct RecordingStager {
        live: Mutex<Vec<PathBuf>>,
        staged_count: Mutex<usize>,
        fail_cleanup: bool,
    }

    impl RecordingStager {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every cleanup call reports an error (artifact still removed)
        pub fn failing_cleanup() -> Self {
            Self {
                fail_cleanup: true,
                ..Self::default()
            }
        }

        pub fn live_artifacts(&self) -> Vec<PathBuf> {
            self.live.lock().unwrap().clone()
        }

        pub fn staged_count(&self) -> usize {
            *self.staged_count.lock().unwrap()
        }
    }

    impl ScriptStager for RecordingStager {
        fn stage(
            &self,
            source_id: &str,
            script: &Path,
            _mode: WrapperMode,
        ) -> Result<StagedScript, StageError> {
            let mut count = self.staged_count.lock().unwrap();
            *count += 1;
            let path = PathBuf::from(format!("/staged/{}-{}.py", source_id, *count));
            self.live.lock().unwrap().push(path.clone());
            Ok(StagedScript {
                path,
                original: script.to_path_buf(),
                owned: true,
            })
        }

        fn cleanup(&self, staged: &StagedScript) -> Result<(), CleanupError> {
            self.live.lock().unwrap().retain(|p| p != &staged.path);
            if self.fail_cleanup {
                return Err(CleanupError {
                    path: staged.path.clone(),
                    message: "simulated cleanup failure".to_string(),
                });
            }
            Ok(())
        }

        fn teardown(&self) -> Result<(), CleanupError> {
            self.live.lock().unwrap().clear();
            Ok(())
        }
    }
}
