// Transcript Sink Port
// Optional append-only record of every run's stdout/stderr

use thiserror::Error;

use crate::domain::ExecutionResult;

#[derive(Error, Debug)]
#[error("Transcript write failed: {0}")]
pub struct TranscriptError(pub String);

pub trait TranscriptSink: Send + Sync {
    fn record(&self, result: &ExecutionResult) -> Result<(), TranscriptError>;
}
