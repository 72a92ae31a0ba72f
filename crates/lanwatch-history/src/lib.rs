//! lanwatch-history: Durable record of finished scans.
//!
//! Every job that reaches a terminal state leaves one `HistoryRecord`
//! behind: what was asked for, how it ended, and how many hosts it found.
//! Records are content-hashed with BLAKE3 and appended one per line to a
//! JSON-lines file, so a damaged line can be detected and skipped without
//! losing the rest of the log.

pub mod hash;
pub mod store;

use chrono::{DateTime, Utc};
use lanwatch_core::{Job, JobId, JobStatus, ScanRequest};
use serde::{Deserialize, Serialize};

pub use store::{HistoryError, HistoryStore, JsonlHistoryStore};

/// Summary of one terminal job. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    /// Id of the job this record summarizes.
    pub id: JobId,
    /// The originating request.
    pub request: ScanRequest,
    /// `completed` or `failed`.
    pub status: JobStatus,
    /// Number of devices in the result set.
    pub device_count: usize,
    /// How many of those were online.
    pub online_count: usize,
    /// Failure reason, for failed jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// BLAKE3 content hash (hex), set by `seal`.
    #[serde(default)]
    pub content_hash: Option<String>,
}

impl HistoryRecord {
    /// Summarize a terminal job. Returns `None` while the job is still
    /// queued or running.
    pub fn from_job(job: &Job) -> Option<Self> {
        if !job.is_terminal() {
            return None;
        }
        let devices = job.result.as_deref().unwrap_or_default();

        let record = Self {
            id: job.id,
            request: job.request.clone(),
            status: job.status,
            device_count: devices.len(),
            online_count: devices.iter().filter(|d| d.is_online()).count(),
            error: job.error.clone(),
            created_at: job.created_at,
            completed_at: job.completed_at.unwrap_or_else(Utc::now),
            duration_ms: job.duration_ms,
            content_hash: None,
        };
        Some(record.seal())
    }

    /// Compute and store the content hash.
    pub fn seal(mut self) -> Self {
        self.content_hash = Some(self.compute_hash());
        self
    }

    pub fn compute_hash(&self) -> String {
        hash::compute_record_hash(self)
    }

    /// Verify that the stored content_hash matches a freshly computed hash.
    pub fn verify_integrity(&self) -> bool {
        match &self.content_hash {
            Some(stored) => stored == &self.compute_hash(),
            None => false,
        }
    }
}
