//! Export import: fixed-size batches over the decoded events, one progress
//! unit per batch

use muzi_common::events::ProgressUpdate;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use super::{BatchProcessor, ImportError, ProgressReporter};
use crate::config::ImportConfig;
use crate::models::ListenEvent;

#[derive(Clone)]
pub struct SpotifyImporter {
    processor: BatchProcessor,
    batch_size: usize,
}

impl SpotifyImporter {
    pub fn new(db: SqlitePool, config: &ImportConfig) -> Self {
        Self {
            processor: BatchProcessor::new(db, config),
            batch_size: config.export_batch_size.max(1),
        }
    }

    /// Import `events` for `user_id`, returning the terminal snapshot
    ///
    /// Batches are cut before filtering, so every batch is one unit even if
    /// nothing in it survives.
    pub async fn run(
        &self,
        user_id: i64,
        events: Vec<ListenEvent>,
        reporter: &mut ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ProgressUpdate, ImportError> {
        match self.import(user_id, events, reporter, cancel).await {
            Ok(()) => Ok(reporter.snapshot()),
            Err(e) => {
                if !reporter.job().is_terminal() {
                    if let Err(lifecycle) = reporter.fail(e.to_string()) {
                        tracing::warn!(error = %lifecycle, "Could not publish failure");
                    }
                }
                Err(e)
            }
        }
    }

    async fn import(
        &self,
        user_id: i64,
        events: Vec<ListenEvent>,
        reporter: &mut ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(), ImportError> {
        let total_batches = u32::try_from(events.len().div_ceil(self.batch_size)).unwrap_or(u32::MAX);
        tracing::info!(
            user_id,
            events = events.len(),
            batches = total_batches,
            "Starting export import"
        );
        reporter.start(total_batches)?;

        let mut imported = 0u64;
        let mut remaining = events.into_iter();
        let mut batch_number = 0u32;

        loop {
            let batch: Vec<ListenEvent> = remaining.by_ref().take(self.batch_size).collect();
            if batch.is_empty() {
                break;
            }
            if cancel.is_cancelled() {
                return Err(ImportError::Cancelled);
            }

            batch_number += 1;
            let outcome = self.processor.process(user_id, batch).await;
            imported += outcome.inserted;
            if outcome.failed {
                tracing::warn!(user_id, batch = batch_number, "Export batch contributed nothing");
            }
            reporter.unit_done(batch_number, imported)?;
        }

        reporter.complete(imported)?;
        Ok(())
    }
}
