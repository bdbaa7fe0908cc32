//! Analyzer error types.

use crate::config::ConfigError;
use thiserror::Error;

/// Errors that stop an analysis run.
///
/// Per-payload parse failures are not among them: they are counted and the
/// run continues.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture error: {0}")]
    Capture(#[from] mongowire_capture::CaptureError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("sink error: {0}")]
    Sink(String),

    #[error("parse worker {0} stopped unexpectedly")]
    WorkerStopped(usize),
}
