//! History storage: trait plus a JSON-lines file implementation.
//!
//! Each record is one self-contained line. Appends never rewrite earlier
//! lines, and reading skips any line that fails to parse or fails its
//! integrity check instead of giving up on the whole file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::HistoryRecord;

/// Errors that can occur during history storage operations.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Record has no content hash (not sealed)")]
    NotSealed,

    #[error("History lock poisoned")]
    Poisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Trait for history persistence backends.
pub trait HistoryStore: Send + Sync {
    /// Append a sealed record. Earlier records are never touched.
    fn append(&self, record: &HistoryRecord) -> Result<(), HistoryError>;

    /// Up to `limit` records, most recently appended first.
    fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, HistoryError>;
}

/// File-backed history store.
///
/// ```text
/// {"id":"…","request":{…},"status":"completed","deviceCount":12,…}
/// {"id":"…","request":{…},"status":"failed","error":"…",…}
/// ```
pub struct JsonlHistoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlHistoryStore {
    /// Create a store writing to `path`. Creates the parent directory if
    /// it doesn't exist; the file itself appears on first append.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryStore for JsonlHistoryStore {
    fn append(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        if record.content_hash.is_none() {
            return Err(HistoryError::NotSealed);
        }

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        // One write per record, serialized, so concurrent completions never
        // interleave inside a line.
        let _guard = self.write_lock.lock().map_err(|_| HistoryError::Poisoned)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        file.flush()?;

        tracing::debug!(
            job_id = %record.id,
            status = %record.status,
            path = %self.path.display(),
            "History record appended"
        );

        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<HistoryRecord>, HistoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let content = String::from_utf8_lossy(&bytes);

        let mut results = Vec::with_capacity(limit);
        for (index, line) in content.lines().enumerate().collect::<Vec<_>>().into_iter().rev() {
            if results.len() == limit {
                break;
            }
            if let Some(record) = parse_line(index + 1, line) {
                results.push(record);
            }
        }

        Ok(results)
    }
}

/// Parse one stored line, or `None` if it is blank, malformed, or tampered.
fn parse_line(line_no: usize, line: &str) -> Option<HistoryRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<HistoryRecord>(line) {
        Ok(record) if record.verify_integrity() => Some(record),
        Ok(record) => {
            tracing::warn!(line = line_no, job_id = %record.id, "History record failed integrity check, skipping");
            None
        }
        Err(e) => {
            tracing::warn!(line = line_no, error = %e, "Malformed history record, skipping");
            None
        }
    }
}
