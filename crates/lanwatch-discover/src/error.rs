//! Error types for the lanwatch-discover crate.

use lanwatch_core::{CoreError, JobId, ScanMethod};
use lanwatch_history::HistoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("Backend unavailable: {method} ({reason})")]
    BackendUnavailable { method: ScanMethod, reason: String },

    #[error("Could not determine a subnet to scan: {0}")]
    ResolutionFailure(String),

    #[error("{probe} timed out after {timeout_ms} ms")]
    ProbeTimeout { probe: String, timeout_ms: u64 },

    #[error("{tool} exited with code {code}: {stderr}")]
    ToolFailed {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("Failed to parse {what}: {detail}")]
    Parse { what: String, detail: String },

    #[error("Unknown or expired job: {0}")]
    NotFound(JobId),

    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] CoreError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DiscoverError {
    pub(crate) fn parse(what: &str, detail: impl ToString) -> Self {
        Self::Parse {
            what: what.to_string(),
            detail: detail.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DiscoverError>;
