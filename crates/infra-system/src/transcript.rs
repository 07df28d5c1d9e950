// File transcript sink
// Appends every run's output to dispatcher_stdout.log / dispatcher_stderr.log
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use isoenv_core::domain::ExecutionResult;
use isoenv_core::port::{TranscriptError, TranscriptSink};

pub const STDOUT_TRANSCRIPT: &str = "dispatcher_stdout.log";
pub const STDERR_TRANSCRIPT: &str = "dispatcher_stderr.log";

pub struct FileTranscriptSink {
    dir: PathBuf,
    // Serializes appends so concurrent runs don't interleave blocks
    write_lock: Mutex<()>,
}

impl FileTranscriptSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn append(&self, file: &str, header: &str, body: &str) -> Result<(), TranscriptError> {
        let path = self.dir.join(file);
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error(&path, e))?;

        let mut block = format!("{header}\n{body}");
        if !block.ends_with('\n') {
            block.push('\n');
        }
        handle
            .write_all(block.as_bytes())
            .map_err(|e| io_error(&path, e))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> TranscriptError {
    TranscriptError(format!("{}: {}", path.display(), e))
}

impl TranscriptSink for FileTranscriptSink {
    fn record(&self, result: &ExecutionResult) -> Result<(), TranscriptError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;

        let source = result.source_id.to_uppercase();
        let stamp = result.finished_at.to_rfc3339();

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if !result.stdout.is_empty() {
            self.append(
                STDOUT_TRANSCRIPT,
                &format!("[{source} STDOUT @ {stamp}]"),
                &result.stdout,
            )?;
        }
        if !result.stderr.is_empty() {
            self.append(
                STDERR_TRANSCRIPT,
                &format!("[{source} STDERR @ {stamp}]"),
                &result.stderr,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use isoenv_core::domain::ExecutionRequest;
    use isoenv_core::domain::ErrorKind;

    fn result(stdout: &str, stderr: &str) -> ExecutionResult {
        let now = Utc::now();
        let mut result = ExecutionResult::not_started(
            &ExecutionRequest::new("benzinga", "fetch.py"),
            ErrorKind::ScriptFailed,
            "exit 1",
            now,
            now,
        );
        result.stdout = stdout.to_string();
        result.stderr = stderr.to_string();
        result
    }

    #[test]
    fn test_appends_labelled_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileTranscriptSink::new(dir.path().join("logs"));

        sink.record(&result("first run", "")).unwrap();
        sink.record(&result("second run\n", "boom")).unwrap();

        let stdout = std::fs::read_to_string(dir.path().join("logs").join(STDOUT_TRANSCRIPT)).unwrap();
        let stderr = std::fs::read_to_string(dir.path().join("logs").join(STDERR_TRANSCRIPT)).unwrap();

        assert_eq!(stdout.matches("[BENZINGA STDOUT @ ").count(), 2);
        assert!(stdout.contains("first run\n"));
        assert!(stdout.contains("second run\n"));
        assert_eq!(stderr.matches("[BENZINGA STDERR @ ").count(), 1);
        assert!(stderr.contains("boom\n"));
    }

    #[test]
    fn test_empty_output_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileTranscriptSink::new(dir.path());

        sink.record(&result("", "")).unwrap();

        assert!(!dir.path().join(STDOUT_TRANSCRIPT).exists());
        assert!(!dir.path().join(STDERR_TRANSCRIPT).exists());
    }
}
