//! Registry of in-flight import jobs
//!
//! Handlers get the manager through `AppState`. The map lock is only held
//! for map access, never across I/O. A job is removed once its background
//! task finishes plus the configured retention, so a client that subscribes
//! right after a short import still sees its terminal snapshot.

use chrono::{DateTime, Utc};
use muzi_common::events::ProgressUpdate;
use muzi_common::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::ProgressReporter;
use crate::models::{ImportJob, JobId, Platform};

struct JobEntry {
    user_id: i64,
    source: Platform,
    started_at: DateTime<Utc>,
    progress: watch::Receiver<ProgressUpdate>,
    cancel: CancellationToken,
}

/// What the producer side of a new job needs
pub struct JobHandle {
    pub reporter: ProgressReporter,
    pub cancel: CancellationToken,
}

impl JobHandle {
    pub fn job_id(&self) -> &JobId {
        &self.reporter.job().job_id
    }
}

/// Listing entry for `GET /import/jobs`
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub user_id: i64,
    pub source: Platform,
    pub started_at: DateTime<Utc>,
    pub progress: ProgressUpdate,
}

#[derive(Clone)]
pub struct JobManager {
    jobs: Arc<RwLock<HashMap<JobId, JobEntry>>>,
    retention: Duration,
}

impl JobManager {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            retention,
        }
    }

    /// Create and register a pending job
    pub async fn register(&self, user_id: i64, source: Platform) -> JobHandle {
        let job = ImportJob::new(user_id, source);
        let job_id = job.job_id.clone();
        let started_at = job.started_at;
        let (reporter, progress) = ProgressReporter::new(job);
        let cancel = CancellationToken::new();

        self.jobs.write().await.insert(
            job_id.clone(),
            JobEntry {
                user_id,
                source,
                started_at,
                progress,
                cancel: cancel.clone(),
            },
        );
        tracing::info!(job_id = %job_id, user_id, source = %source, "Import job registered");

        JobHandle { reporter, cancel }
    }

    /// Progress receiver for a job owned by `user_id`
    ///
    /// Another user's job is reported as not found.
    pub async fn subscribe(&self, job_id: &JobId, user_id: i64) -> Result<watch::Receiver<ProgressUpdate>> {
        let jobs = self.jobs.read().await;
        match jobs.get(job_id) {
            Some(entry) if entry.user_id == user_id => Ok(entry.progress.clone()),
            _ => Err(Error::NotFound(format!("import job {}", job_id))),
        }
    }

    /// Signal cancellation; `Ok(false)` when the job already finished
    pub async fn cancel(&self, job_id: &JobId, user_id: i64) -> Result<bool> {
        let jobs = self.jobs.read().await;
        let entry = match jobs.get(job_id) {
            Some(entry) if entry.user_id == user_id => entry,
            _ => return Err(Error::NotFound(format!("import job {}", job_id))),
        };

        if entry.progress.borrow().is_terminal() {
            return Ok(false);
        }
        entry.cancel.cancel();
        tracing::info!(job_id = %job_id, "Import job cancellation requested");
        Ok(true)
    }

    /// Cancel every registered job (service shutdown)
    pub async fn cancel_all(&self) {
        for entry in self.jobs.read().await.values() {
            entry.cancel.cancel();
        }
    }

    /// Remove a job from the registry
    pub async fn finish(&self, job_id: &JobId) -> bool {
        let removed = self.jobs.write().await.remove(job_id).is_some();
        if removed {
            tracing::debug!(job_id = %job_id, "Import job removed from registry");
        }
        removed
    }

    /// Registered jobs, optionally only those of one user
    pub async fn active_jobs(&self, user_id: Option<i64>) -> Vec<JobSummary> {
        let jobs = self.jobs.read().await;
        let mut summaries: Vec<JobSummary> = jobs
            .iter()
            .filter(|(_, entry)| user_id.map_or(true, |id| entry.user_id == id))
            .map(|(job_id, entry)| JobSummary {
                job_id: job_id.clone(),
                user_id: entry.user_id,
                source: entry.source,
                started_at: entry.started_at,
                progress: entry.progress.borrow().clone(),
            })
            .collect();
        summaries.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        summaries
    }

    /// Run `work` as the job's background task, then retire the job
    pub fn spawn<F, Fut>(&self, handle: JobHandle, work: F) -> JoinHandle<()>
    where
        F: FnOnce(ProgressReporter, CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let manager = self.clone();
        let job_id = handle.job_id().clone();

        tokio::spawn(async move {
            work(handle.reporter, handle.cancel).await;

            if !manager.retention.is_zero() {
                tokio::time::sleep(manager.retention).await;
            }
            manager.finish(&job_id).await;
        })
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}
