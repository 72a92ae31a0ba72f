//! BLAKE3 content hashing for tamper evidence.
//!
//! Computes a deterministic hash of all record fields (excluding the
//! content_hash itself) so that a damaged or edited line is detectable.

use chrono::{DateTime, Utc};
use lanwatch_core::{JobId, JobStatus, ScanRequest};
use serde::Serialize;

use crate::HistoryRecord;

/// Hashable representation of a HistoryRecord (excludes content_hash).
#[derive(Serialize)]
struct HashableRecord<'a> {
    id: &'a JobId,
    request: &'a ScanRequest,
    status: &'a JobStatus,
    device_count: usize,
    online_count: usize,
    error: &'a Option<String>,
    created_at: &'a DateTime<Utc>,
    completed_at: &'a DateTime<Utc>,
    duration_ms: &'a Option<u64>,
}

/// Compute the BLAKE3 hash of a record's content, hex-encoded.
pub fn compute_record_hash(record: &HistoryRecord) -> String {
    let hashable = HashableRecord {
        id: &record.id,
        request: &record.request,
        status: &record.status,
        device_count: record.device_count,
        online_count: record.online_count,
        error: &record.error,
        created_at: &record.created_at,
        completed_at: &record.completed_at,
        duration_ms: &record.duration_ms,
    };

    let json = serde_json::to_vec(&hashable).expect("HistoryRecord serialization should not fail");
    blake3::hash(&json).to_hex().to_string()
}
