//! Paginated scrobble import
//!
//! Page 1 is fetched first to learn the page count; its events are kept and
//! count as the first unit. Pages 2..=N go through the fetch scheduler.
//! Events accumulate across arriving pages and are flushed through the
//! batch processor every `api_flush_size` events, with a final flush of the
//! remainder.

use muzi_common::events::ProgressUpdate;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{BatchProcessor, FetchScheduler, ImportError, ProgressReporter};
use crate::config::ImportConfig;
use crate::models::ListenEvent;
use crate::sources::PageSource;

#[derive(Clone)]
pub struct LastFmImporter {
    processor: BatchProcessor,
    scheduler: FetchScheduler,
    flush_size: usize,
}

impl LastFmImporter {
    pub fn new(db: SqlitePool, config: &ImportConfig) -> Self {
        Self {
            processor: BatchProcessor::new(db, config),
            scheduler: FetchScheduler::new(config.workers, config.page_channel_capacity),
            flush_size: config.api_flush_size.max(1),
        }
    }

    /// Import every page of `source` for `user_id`, returning the terminal
    /// snapshot
    pub async fn run<S>(
        &self,
        user_id: i64,
        source: Arc<S>,
        reporter: &mut ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ProgressUpdate, ImportError>
    where
        S: PageSource + ?Sized + 'static,
    {
        match self.import(user_id, source, reporter, cancel).await {
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

    async fn import<S>(
        &self,
        user_id: i64,
        source: Arc<S>,
        reporter: &mut ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(), ImportError>
    where
        S: PageSource + ?Sized + 'static,
    {
        let first = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ImportError::Cancelled),
            page = source.fetch_page(1) => page.map_err(ImportError::Discovery)?,
        };

        // An account without scrobbles reports zero pages; page 1 still counts
        let total_pages = first.total_pages.max(1);
        tracing::info!(user_id, total_pages, "Discovered scrobble pages");
        reporter.start(total_pages)?;

        let mut imported = 0u64;
        let mut buffer: Vec<ListenEvent> = first.events;
        self.flush_full(user_id, &mut buffer, &mut imported).await;
        reporter.unit_done(1, imported)?;

        let mut pages = self.scheduler.spawn(source, 2, total_pages, cancel.clone());
        let mut failed_pages = 0u32;

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ImportError::Cancelled),
                next = pages.next() => match next {
                    Some(result) => result,
                    None => break,
                },
            };

            match result.outcome {
                Ok(page) => {
                    buffer.extend(page.events);
                    self.flush_full(user_id, &mut buffer, &mut imported).await;
                }
                Err(e) => {
                    failed_pages += 1;
                    tracing::warn!(user_id, page = result.page, error = %e, "Skipping page");
                }
            }

            tracing::debug!(user_id, page = result.page, total_pages, "Processed page");
            reporter.unit_done(result.page, imported)?;
        }

        if !buffer.is_empty() {
            let outcome = self.processor.process(user_id, std::mem::take(&mut buffer)).await;
            imported += outcome.inserted;
        }

        if failed_pages > 0 {
            tracing::warn!(user_id, failed_pages, "Some pages could not be imported");
        }
        reporter.complete(imported)?;
        Ok(())
    }

    /// Process full `flush_size` chunks from the front of `buffer`
    async fn flush_full(&self, user_id: i64, buffer: &mut Vec<ListenEvent>, imported: &mut u64) {
        while buffer.len() >= self.flush_size {
            let batch: Vec<ListenEvent> = buffer.drain(..self.flush_size).collect();
            let outcome = self.processor.process(user_id, batch).await;
            *imported += outcome.inserted;
        }
    }
}
