// Temp-dir script stager
// Writes the per-request bootstrap (or copy) under the dispatcher temp dir
use chrono::Utc;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use isoenv_core::domain::WrapperMode;
use isoenv_core::port::{CleanupError, ScriptStager, StageError, StagedScript};

/// Stager rooted at one temp directory owned by this dispatcher
pub struct TempScriptStager {
    temp_dir: PathBuf,
    project_root: PathBuf,
}

impl TempScriptStager {
    pub fn new(temp_dir: impl Into<PathBuf>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            project_root: project_root.into(),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Unique artifact path: `{source}_{timestamp}_{uuid}.{ext}`
    fn artifact_path(&self, source_id: &str, extension: Option<&str>) -> PathBuf {
        let mut name = format!(
            "{}_{}_{}",
            source_id,
            Utc::now().format("%Y%m%dT%H%M%S%3f"),
            Uuid::new_v4().simple()
        );
        if let Some(ext) = extension.filter(|e| !e.is_empty()) {
            name.push('.');
            name.push_str(ext);
        }
        self.temp_dir.join(name)
    }

    fn bootstrap_source(&self, source_id: &str, script: &Path) -> String {
        // JSON string literals are valid Python string literals
        let project_root = serde_json::Value::from(self.project_root.display().to_string());
        let script_path = serde_json::Value::from(script.display().to_string());

        format!(
            "# isoenv bootstrap for source '{source_id}'; removed after the run\n\
             import runpy\n\
             import sys\n\
             \n\
             PROJECT_ROOT = {project_root}\n\
             SCRIPT = {script_path}\n\
             \n\
             if PROJECT_ROOT not in sys.path:\n    sys.path.insert(0, PROJECT_ROOT)\n\
             sys.argv[0] = SCRIPT\n\
             runpy.run_path(SCRIPT, run_name=\"__main__\")\n"
        )
    }

    fn io_error(path: &Path, e: std::io::Error) -> StageError {
        StageError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    }
}

impl ScriptStager for TempScriptStager {
    fn stage(
        &self,
        source_id: &str,
        script: &Path,
        mode: WrapperMode,
    ) -> Result<StagedScript, StageError> {
        let original = match script.canonicalize() {
            Ok(path) if path.is_file() => path,
            Ok(_) => return Err(StageError::NotFound(script.to_path_buf())),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                return Err(StageError::NotFound(script.to_path_buf()))
            }
            Err(e) => return Err(Self::io_error(script, e)),
        };

        let extension = match mode {
            WrapperMode::None => {
                return Ok(StagedScript {
                    path: original.clone(),
                    original,
                    owned: false,
                })
            }
            WrapperMode::Python => Some("py"),
            WrapperMode::Copy => original.extension().and_then(|e| e.to_str()),
        };

        std::fs::create_dir_all(&self.temp_dir).map_err(|e| Self::io_error(&self.temp_dir, e))?;
        let path = self.artifact_path(source_id, extension);

        if mode == WrapperMode::Python {
            std::fs::write(&path, self.bootstrap_source(source_id, &original))
                .map_err(|e| Self::io_error(&path, e))?;
        } else {
            std::fs::copy(&original, &path).map_err(|e| Self::io_error(&path, e))?;
        }

        debug!(
            source_id = %source_id,
            staged = %path.display(),
            mode = ?mode,
            "Script staged"
        );

        Ok(StagedScript {
            path,
            original,
            owned: true,
        })
    }

    fn cleanup(&self, staged: &StagedScript) -> Result<(), CleanupError> {
        if !staged.owned {
            return Ok(());
        }

        match std::fs::remove_file(&staged.path) {
            Ok(()) => {
                debug!(staged = %staged.path.display(), "Staged script removed");
                Ok(())
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(CleanupError {
                path: staged.path.clone(),
                message: e.to_string(),
            }),
        }
    }

    fn teardown(&self) -> Result<(), CleanupError> {
        match std::fs::remove_dir_all(&self.temp_dir) {
            Ok(()) => {
                info!(temp_dir = %self.temp_dir.display(), "Dispatcher temp dir removed");
                Ok(())
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(temp_dir = %self.temp_dir.display(), error = %e, "Temp dir removal failed");
                Err(CleanupError {
                    path: self.temp_dir.clone(),
                    message: e.to_string(),
                })
            }
        }
    }
}
