//! Background indexing jobs.
//!
//! Submissions return a job id at once; the run itself waits for a worker
//! permit, executes on the blocking pool, and records its outcome on the
//! job record. Status reads never wait on a run. Only the most recent
//! finished jobs are kept; active jobs are never evicted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{CgcError, Result};
use crate::indexer::{absolute_unresolved, canonical_root, IndexControl, IndexProgress, IndexSummary};

/// Finished jobs kept for status queries before the oldest are dropped.
pub const FINISHED_JOB_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Snapshot of a job as reported to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_id: String,
    pub path: PathBuf,
    pub status: JobStatus,
    pub progress: IndexProgress,
    pub summary: Option<IndexSummary>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub job_id: String,
    /// True when an active job for the same path was returned instead.
    pub coalesced: bool,
}

/// Executes one indexing run on behalf of a job. `path` is the path as the
/// caller submitted it, made absolute but not canonicalized.
pub trait IndexRunner: Send + Sync + 'static {
    fn run(&self, path: &Path, control: &IndexControl, job_id: &str) -> Result<IndexSummary>;
}

struct JobEntry {
    info: JobInfo,
    control: IndexControl,
}

type JobTable = Arc<RwLock<HashMap<String, JobEntry>>>;

pub struct JobManager {
    jobs: JobTable,
    permits: Arc<Semaphore>,
    runner: Arc<dyn IndexRunner>,
    finished_limit: usize,
}

impl JobManager {
    pub fn new(runner: Arc<dyn IndexRunner>, workers: usize) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(workers.max(1))),
            runner,
            finished_limit: FINISHED_JOB_LIMIT,
        }
    }

    /// Keep at most `limit` finished jobs in the table.
    pub fn with_finished_limit(mut self, limit: usize) -> Self {
        self.finished_limit = limit;
        self
    }

    /// Queue an indexing run for `path`. Must be called inside a tokio runtime.
    pub fn submit(&self, path: &Path) -> Result<Submission> {
        let root = canonical_root(path)?;
        let requested = absolute_unresolved(path);
        let job_id = {
            let mut jobs = self.jobs.write().map_err(|_| CgcError::poisoned("job table"))?;
            if let Some(active) = jobs
                .values()
                .find(|j| j.info.path == root && !j.info.status.is_terminal())
            {
                info!(job_id = %active.info.job_id, path = %root.display(), "coalesced duplicate submission");
                return Ok(Submission {
                    job_id: active.info.job_id.clone(),
                    coalesced: true,
                });
            }

            evict_finished(&mut jobs, self.finished_limit);
            let job_id = Uuid::new_v4().to_string();
            let control = {
                let table = Arc::clone(&self.jobs);
                let id = job_id.clone();
                IndexControl::new().with_progress(move |progress| {
                    if let Ok(mut jobs) = table.write() {
                        if let Some(entry) = jobs.get_mut(&id) {
                            entry.info.progress = progress.clone();
                        }
                    }
                })
            };
            jobs.insert(
                job_id.clone(),
                JobEntry {
                    info: JobInfo {
                        job_id: job_id.clone(),
                        path: root.clone(),
                        status: JobStatus::Queued,
                        progress: IndexProgress::default(),
                        summary: None,
                        error: None,
                        created_at: Utc::now(),
                        started_at: None,
                        finished_at: None,
                    },
                    control: control.clone(),
                },
            );
            tokio::spawn(run_job(
                Arc::clone(&self.jobs),
                Arc::clone(&self.permits),
                Arc::clone(&self.runner),
                job_id.clone(),
                requested,
                control,
            ));
            job_id
        };
        info!(job_id = %job_id, path = %root.display(), "job queued");
        Ok(Submission {
            job_id,
            coalesced: false,
        })
    }

    pub fn status(&self, job_id: &str) -> Result<JobInfo> {
        let jobs = self.jobs.read().map_err(|_| CgcError::poisoned("job table"))?;
        jobs.get(job_id)
            .map(|entry| entry.info.clone())
            .ok_or_else(|| CgcError::not_found(format!("Job not found: {job_id}")))
    }

    /// Request cancellation. Queued jobs end immediately; running jobs stop
    /// at their next chunk boundary; finished jobs are returned unchanged.
    pub fn cancel(&self, job_id: &str) -> Result<JobInfo> {
        let mut jobs = self.jobs.write().map_err(|_| CgcError::poisoned("job table"))?;
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| CgcError::not_found(format!("Job not found: {job_id}")))?;
        match entry.info.status {
            JobStatus::Queued => {
                entry.control.cancel();
                entry.info.status = JobStatus::Cancelled;
                entry.info.finished_at = Some(Utc::now());
                info!(job_id, "queued job cancelled");
            }
            JobStatus::Running => {
                entry.control.cancel();
                info!(job_id, "cancellation requested");
            }
            _ => {}
        }
        Ok(entry.info.clone())
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Result<Vec<JobInfo>> {
        let jobs = self.jobs.read().map_err(|_| CgcError::poisoned("job table"))?;
        let mut list: Vec<JobInfo> = jobs.values().map(|e| e.info.clone()).collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    /// Poll until the job reaches a terminal state or `timeout` elapses.
    pub async fn wait(&self, job_id: &str, timeout: Duration) -> Result<JobInfo> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let info = self.status(job_id)?;
            if info.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(info);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Cancel every active job and stop handing out worker permits.
    pub fn shutdown(&self) {
        let active: Vec<String> = match self.jobs.read() {
            Ok(jobs) => jobs
                .values()
                .filter(|e| !e.info.status.is_terminal())
                .map(|e| e.info.job_id.clone())
                .collect(),
            Err(_) => Vec::new(),
        };
        for id in &active {
            if let Err(e) = self.cancel(id) {
                warn!(job_id = %id, error = %e, "failed to cancel job during shutdown");
            }
        }
        self.permits.close();
        if !active.is_empty() {
            info!(cancelled = active.len(), "job manager shut down");
        }
    }
}

/// Drop the oldest finished jobs beyond `limit`.
fn evict_finished(jobs: &mut HashMap<String, JobEntry>, limit: usize) {
    let mut finished: Vec<(DateTime<Utc>, String)> = jobs
        .values()
        .filter(|e| e.info.status.is_terminal())
        .map(|e| (e.info.finished_at.unwrap_or(e.info.created_at), e.info.job_id.clone()))
        .collect();
    if finished.len() <= limit {
        return;
    }
    finished.sort();
    let excess = finished.len() - limit;
    for (_, id) in finished.into_iter().take(excess) {
        jobs.remove(&id);
    }
    debug!(evicted = excess, "dropped old finished jobs");
}

/// Apply `update` unless the job already reached a terminal state.
fn transition(jobs: &JobTable, job_id: &str, update: impl FnOnce(&mut JobInfo)) -> bool {
    let Ok(mut jobs) = jobs.write() else {
        return false;
    };
    match jobs.get_mut(job_id) {
        Some(entry) if !entry.info.status.is_terminal() => {
            update(&mut entry.info);
            true
        }
        _ => false,
    }
}

async fn run_job(
    jobs: JobTable,
    permits: Arc<Semaphore>,
    runner: Arc<dyn IndexRunner>,
    job_id: String,
    path: PathBuf,
    control: IndexControl,
) {
    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            transition(&jobs, &job_id, |info| {
                info.status = JobStatus::Cancelled;
                info.finished_at = Some(Utc::now());
            });
            return;
        }
    };

    let started = transition(&jobs, &job_id, |info| {
        info.status = JobStatus::Running;
        info.started_at = Some(Utc::now());
    });
    if !started {
        // Cancelled while queued.
        return;
    }
    info!(job_id = %job_id, path = %path.display(), "job running");

    let blocking_id = job_id.clone();
    let outcome = tokio::task::spawn_blocking(move || runner.run(&path, &control, &blocking_id)).await;

    transition(&jobs, &job_id, |info| {
        info.finished_at = Some(Utc::now());
        match outcome {
            Ok(Ok(summary)) => {
                info.status = if summary.cancelled {
                    JobStatus::Cancelled
                } else {
                    JobStatus::Completed
                };
                info!(job_id = %info.job_id, status = %info.status, "job finished");
                info.summary = Some(summary);
            }
            Ok(Err(e)) => {
                error!(job_id = %info.job_id, error = %e, "job failed");
                info.status = JobStatus::Failed;
                info.error = Some(e.to_string());
            }
            Err(join) => {
                error!(job_id = %info.job_id, error = %join, "indexing task aborted");
                info.status = JobStatus::Failed;
                info.error = Some(format!("indexing task aborted: {join}"));
            }
        }
    });
}
