//! Server-Sent Events (SSE) utilities
//!
//! Turns a job's progress watch channel into an SSE response: one
//! `{"status":"connected"}` message, then one JSON `ProgressUpdate` per
//! observed change, ending right after a terminal status.

use crate::events::{ImportStatus, ProgressUpdate};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Message sent as soon as a consumer attaches
pub const CONNECTED_MESSAGE: &str = r#"{"status":"connected"}"#;

/// Stream of progress snapshots from a watch receiver
///
/// Yields the current snapshot first (unless still `pending`), then every
/// change. Intermediate snapshots may be coalesced when the consumer is
/// slower than the producer; the terminal snapshot is always delivered
/// because the watch channel retains its last value after the producer
/// drops.
pub fn progress_updates(
    mut rx: watch::Receiver<ProgressUpdate>,
) -> impl Stream<Item = ProgressUpdate> {
    async_stream::stream! {
        let mut last_sent: Option<ProgressUpdate> = None;
        loop {
            let current = rx.borrow_and_update().clone();
            if current.status != ImportStatus::Pending && last_sent.as_ref() != Some(&current) {
                let terminal = current.is_terminal();
                last_sent = Some(current.clone());
                yield current;
                if terminal {
                    break;
                }
            }

            if rx.changed().await.is_err() {
                // Producer gone: deliver the final value if it was not seen yet
                let last = rx.borrow().clone();
                if last.status != ImportStatus::Pending && last_sent.as_ref() != Some(&last) {
                    yield last;
                }
                break;
            }
        }
    }
}

/// SSE response for one job's progress
pub fn progress_sse_stream(
    rx: watch::Receiver<ProgressUpdate>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let updates = progress_updates(rx);

    let stream = async_stream::stream! {
        yield Ok(Event::default().data(CONNECTED_MESSAGE));

        futures::pin_mut!(updates);
        while let Some(update) = futures::StreamExt::next(&mut updates).await {
            match serde_json::to_string(&update) {
                Ok(json) => {
                    debug!(status = update.status.as_str(), "SSE: sending progress update");
                    yield Ok(Event::default().data(json));
                }
                Err(e) => {
                    warn!("SSE: failed to serialize progress update: {}", e);
                }
            }
        }
        debug!("SSE: progress stream finished");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
