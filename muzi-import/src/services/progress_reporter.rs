//! Publishes a job's progress snapshots
//!
//! Snapshots go through a `watch` channel: publishing never waits on
//! consumers, and a consumer attaching late (or after the job ended) still
//! sees the latest snapshot. Every publish is checked against the job
//! lifecycle, so nothing is published after a terminal snapshot.

use muzi_common::events::{ImportStatus, ProgressUpdate};
use tokio::sync::watch;

use crate::models::import_job::IllegalTransition;
use crate::models::{ImportJob, JobState};

pub struct ProgressReporter {
    job: ImportJob,
    tx: watch::Sender<ProgressUpdate>,
}

impl ProgressReporter {
    /// Reporter for `job` plus the first receiver of its snapshots
    pub fn new(job: ImportJob) -> (Self, watch::Receiver<ProgressUpdate>) {
        let (tx, rx) = watch::channel(ProgressUpdate::pending());
        (Self { job, tx }, rx)
    }

    pub fn job(&self) -> &ImportJob {
        &self.job
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> ProgressUpdate {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressUpdate> {
        self.tx.subscribe()
    }

    /// Unit count is known; publish `running` with nothing completed
    pub fn start(&mut self, total_units: u32) -> Result<(), IllegalTransition> {
        self.job.transition_to(JobState::Running)?;
        tracing::info!(job_id = %self.job.job_id, total_units, "Import running");
        self.publish(ProgressUpdate {
            current_unit: 0,
            completed_units: 0,
            total_units,
            tracks_imported: 0,
            status: ImportStatus::Running,
            error: None,
        });
        Ok(())
    }

    /// One more unit finished (`current_unit` names it, e.g. the page number)
    ///
    /// `tracks_imported` is the cumulative total; it never moves backwards.
    pub fn unit_done(&mut self, current_unit: u32, tracks_imported: u64) -> Result<(), IllegalTransition> {
        self.ensure_running(JobState::Running)?;
        let previous = self.snapshot();
        self.publish(ProgressUpdate {
            current_unit,
            completed_units: (previous.completed_units + 1).min(previous.total_units),
            tracks_imported: tracks_imported.max(previous.tracks_imported),
            ..previous
        });
        Ok(())
    }

    /// Publish the single `completed` snapshot
    pub fn complete(&mut self, tracks_imported: u64) -> Result<(), IllegalTransition> {
        self.job.transition_to(JobState::Completed)?;
        let previous = self.snapshot();
        let update = ProgressUpdate {
            current_unit: previous.total_units,
            completed_units: previous.total_units,
            total_units: previous.total_units,
            tracks_imported: tracks_imported.max(previous.tracks_imported),
            status: ImportStatus::Completed,
            error: None,
        };
        tracing::info!(
            job_id = %self.job.job_id,
            tracks_imported = update.tracks_imported,
            "Import completed"
        );
        self.publish(update);
        Ok(())
    }

    /// Publish the single `error` snapshot
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), IllegalTransition> {
        self.job.transition_to(JobState::Failed)?;
        let message = message.into();
        tracing::warn!(job_id = %self.job.job_id, error = %message, "Import failed");
        let previous = self.snapshot();
        self.publish(ProgressUpdate {
            status: ImportStatus::Error,
            error: Some(message),
            ..previous
        });
        Ok(())
    }

    fn ensure_running(&self, attempted: JobState) -> Result<(), IllegalTransition> {
        if self.job.state == JobState::Running {
            Ok(())
        } else {
            Err(IllegalTransition {
                from: self.job.state,
                to: attempted,
            })
        }
    }

    fn publish(&self, update: ProgressUpdate) {
        // send_replace stores the value even with no receivers attached
        self.tx.send_replace(update);
    }
}
