//! Error types for watchme
//!
//! Every fallible operation in the crate returns [`Result`], which carries a
//! [`WatchmeError`].

use std::io;
use std::process::ExitStatus;

/// Errors raised while launching, sampling or collecting a monitored call
#[derive(Debug, thiserror::Error)]
pub enum WatchmeError {
    /// The worker process could not be forked
    #[error("failed to launch worker process: {0}")]
    ProcessLaunch(#[source] io::Error),

    /// The worker exited without writing its return value
    #[error("worker {pid} terminated without a result ({status})")]
    ResultUnavailable { pid: u32, status: ExitStatus },

    /// The wrapped function panicked inside the worker
    #[error("worker {pid} panicked: {message}")]
    WorkerPanicked { pid: u32, message: String },

    /// The function returned, but its value cannot be sent back as JSON
    /// (NaN or infinite floats, non-string map keys)
    #[error("worker {pid} returned a value that cannot be encoded: {reason}")]
    ResultEncode { pid: u32, reason: String },

    /// The worker wrote a result frame that could not be decoded
    #[error("failed to decode result from worker {pid}: {source}")]
    ResultDecode {
        pid: u32,
        #[source]
        source: serde_json::Error,
    },

    /// The sampled process no longer exists
    #[error("process {0} not found")]
    ProcessNotFound(u32),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An exporter was built without all of its required parameters
    #[error("exporter {exporter} is missing required parameters: {}", .missing.join(", "))]
    MissingParameters {
        exporter: String,
        missing: Vec<String>,
    },

    #[error("results sink failed: {0}")]
    Sink(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WatchmeError>;
