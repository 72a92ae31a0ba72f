//! Asynchronous scan jobs.
//!
//! The job table is a mutex-guarded map owned by the manager; callers only
//! ever get cloned snapshots. Every job runs on its own tokio task behind a
//! worker semaphore, so `start` returns before any discovery work begins
//! and `status` never waits on a scan.
//!
//! A terminal job is written to history *before* its terminal snapshot is
//! published, so any reader that sees `completed` or `failed` can already
//! find the record in `history`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use lanwatch_core::{Device, Job, JobId, ScanRequest};
use lanwatch_history::{HistoryRecord, HistoryStore};
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::config::DiscoverConfig;
use crate::engine::ScanEngine;
use crate::error::{DiscoverError, Result};

/// A job snapshot as served to polling clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    #[serde(flatten)]
    pub job: Job,
    /// How long clients should wait between polls.
    pub poll_interval_ms: u64,
}

#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Arc<ScanEngine>,
    history: Arc<dyn HistoryStore>,
    jobs: Mutex<HashMap<JobId, Job>>,
    workers: Arc<Semaphore>,
    retention: Duration,
    max_retained: usize,
    poll_interval: Duration,
}

impl JobManager {
    pub fn new(
        engine: Arc<ScanEngine>,
        history: Arc<dyn HistoryStore>,
        config: &DiscoverConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                history,
                jobs: Mutex::new(HashMap::new()),
                workers: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
                retention: config.job_retention(),
                max_retained: config.max_retained_jobs(),
                poll_interval: config.poll_interval(),
            }),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    /// Queue a scan and return its id. Must be called from within a tokio
    /// runtime; the scan itself runs on a spawned task.
    pub fn start(&self, request: ScanRequest) -> JobId {
        let job = Job::new(request.clone());
        let id = job.id;
        {
            let mut jobs = self.inner.lock();
            self.inner.evict(&mut jobs);
            jobs.insert(id, job);
        }

        tracing::info!(
            job_id = %id,
            subnet = %request.subnet,
            method = %request.method,
            deep = request.deep,
            "Job queued"
        );

        let inner = self.inner.clone();
        let scan = tokio::spawn(inner.clone().run(id, request));

        // Supervisor: a panicking scan still ends up `failed`.
        tokio::spawn(async move {
            if let Err(e) = scan.await {
                tracing::error!(job_id = %id, error = %e, "Scan task panicked");
                inner
                    .finish(id, Err(DiscoverError::Internal("scan task panicked".to_string())))
                    .await;
            }
        });

        id
    }

    /// Current snapshot of a job.
    pub fn status(&self, id: JobId) -> Result<Job> {
        let mut jobs = self.inner.lock();
        self.inner.evict(&mut jobs);
        jobs.get(&id).cloned().ok_or(DiscoverError::NotFound(id))
    }

    /// `status` with the advised polling interval attached.
    pub fn snapshot(&self, id: JobId) -> Result<JobSnapshot> {
        Ok(JobSnapshot {
            job: self.status(id)?,
            poll_interval_ms: self.inner.poll_interval.as_millis() as u64,
        })
    }

    /// Most recent history records, newest first.
    pub async fn history(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        let history = self.inner.history.clone();
        let records = tokio::task::spawn_blocking(move || history.recent(limit))
            .await
            .map_err(|e| DiscoverError::Internal(e.to_string()))??;
        Ok(records)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to a live job.
    fn update(&self, id: JobId, f: impl FnOnce(&mut Job)) {
        if let Some(job) = self.lock().get_mut(&id) {
            f(job);
        }
    }

    async fn run(self: Arc<Self>, id: JobId, request: ScanRequest) {
        let _permit = match self.workers.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                self.finish(id, Err(DiscoverError::Internal(e.to_string()))).await;
                return;
            }
        };

        self.update(id, |job| {
            if let Err(e) = job.start() {
                tracing::warn!(job_id = %id, error = %e, "Job could not start");
            }
        });
        tracing::info!(job_id = %id, "Job running");

        let progress = {
            let inner = self.clone();
            move |p: u8| inner.update(id, |job| job.advance(p))
        };
        let outcome = self.engine.run(&request, progress).await;

        self.finish(id, outcome).await;
    }

    /// Move a job to its terminal state, record it, then publish it.
    async fn finish(&self, id: JobId, outcome: Result<Vec<Device>>) {
        let Some(mut job) = self.lock().get(&id).cloned() else {
            tracing::warn!(job_id = %id, "Finished job no longer tracked");
            return;
        };

        let transition = match outcome {
            Ok(devices) => job.complete(devices),
            Err(e) => job.fail(e.to_string()),
        };
        if let Err(e) = transition {
            tracing::warn!(job_id = %id, error = %e, "Ignoring terminal transition");
            return;
        }

        if let Some(record) = HistoryRecord::from_job(&job) {
            let history = self.history.clone();
            match tokio::task::spawn_blocking(move || history.append(&record)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(job_id = %id, error = %e, "History append failed"),
                Err(e) => tracing::error!(job_id = %id, error = %e, "History task failed"),
            }
        }

        tracing::info!(
            job_id = %id,
            status = %job.status,
            devices = job.result.as_ref().map_or(0, Vec::len),
            duration_ms = job.duration_ms.unwrap_or_default(),
            error = job.error.as_deref().unwrap_or(""),
            "Job finished"
        );

        self.lock().insert(id, job);
    }

    /// Drop terminal jobs older than the retention window, then the oldest
    /// terminal jobs beyond `max_retained`. Live jobs are never evicted.
    fn evict(&self, jobs: &mut HashMap<JobId, Job>) {
        let now = Utc::now();
        jobs.retain(|_, job| {
            !job.is_terminal()
                || job
                    .completed_at
                    .and_then(|at| (now - at).to_std().ok())
                    .map_or(true, |age| age < self.retention)
        });

        let mut terminal: Vec<_> = jobs
            .values()
            .filter(|j| j.is_terminal())
            .map(|j| (j.completed_at.unwrap_or(j.created_at), j.id))
            .collect();
        if terminal.len() > self.max_retained {
            terminal.sort();
            let excess = terminal.len() - self.max_retained;
            for (_, id) in terminal.into_iter().take(excess) {
                jobs.remove(&id);
            }
        }
    }
}
