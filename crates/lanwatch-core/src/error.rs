use thiserror::Error;

use crate::types::JobStatus;

/// Errors raised while building or transitioning core values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Unknown scan method: {0} (expected auto, arp-scan, nmap or ping)")]
    InvalidMethod(String),

    #[error("Invalid subnet {value:?}: {reason}")]
    InvalidSubnet { value: String, reason: String },

    #[error("Invalid job id: {0}")]
    InvalidJobId(String),

    #[error("Illegal job transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}
