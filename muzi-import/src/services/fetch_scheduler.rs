//! Bounded-concurrency page fetching for paginated sources
//!
//! Pages are split statically: with W workers, worker `i` fetches
//! `first + i, first + i + W, ...` in increasing order. Results from all
//! workers funnel into one bounded channel and arrive in completion order,
//! so consumers must not assume pages come in sequence.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::sources::{PageSource, ScrobblePage, SourceError};

/// Outcome for one page; failures carry no events and are not retried
#[derive(Debug)]
pub struct PageResult {
    pub page: u32,
    pub outcome: Result<ScrobblePage, SourceError>,
}

#[derive(Debug, Clone, Copy)]
pub struct FetchScheduler {
    workers: usize,
    channel_capacity: usize,
}

impl FetchScheduler {
    pub fn new(workers: usize, channel_capacity: usize) -> Self {
        Self {
            workers: workers.max(1),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Static page assignment for `first..=last` over `workers` workers
    ///
    /// Always returns `workers` lists; trailing ones are empty when there
    /// are fewer pages than workers.
    pub fn plan(first: u32, last: u32, workers: usize) -> Vec<Vec<u32>> {
        let workers = workers.max(1);
        (0..workers)
            .map(|i| {
                let start = u64::from(first) + i as u64;
                (start..=u64::from(last))
                    .step_by(workers)
                    .filter_map(|page| u32::try_from(page).ok())
                    .collect()
            })
            .collect()
    }

    /// Start fetching `first..=last` from `source`
    ///
    /// Workers stop early when `cancel` fires or the returned stream is
    /// dropped. The stream ends once every worker has exited.
    pub fn spawn<S>(&self, source: Arc<S>, first: u32, last: u32, cancel: CancellationToken) -> PageStream
    where
        S: PageSource + ?Sized + 'static,
    {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let plan = Self::plan(first, last, self.workers);
        let expected_pages = plan.iter().map(Vec::len).sum();

        let workers = plan
            .into_iter()
            .enumerate()
            .filter(|(_, pages)| !pages.is_empty())
            .map(|(worker_id, pages)| {
                let source = Arc::clone(&source);
                let tx = tx.clone();
                let cancel = cancel.clone();
                tokio::spawn(fetch_pages(worker_id, source, pages, tx, cancel))
            })
            .collect();

        // Only worker clones remain, so the channel closes when they all exit
        drop(tx);

        PageStream {
            rx,
            expected_pages,
            workers,
        }
    }
}

async fn fetch_pages<S>(
    worker_id: usize,
    source: Arc<S>,
    pages: Vec<u32>,
    tx: mpsc::Sender<PageResult>,
    cancel: CancellationToken,
) where
    S: PageSource + ?Sized,
{
    tracing::debug!(worker_id, pages = pages.len(), "Page worker started");

    for page in pages {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = source.fetch_page(page) => outcome,
        };

        if tx.send(PageResult { page, outcome }).await.is_err() {
            // Consumer gone
            break;
        }
    }

    tracing::debug!(worker_id, "Page worker finished");
}

/// Pages in arrival order
pub struct PageStream {
    rx: mpsc::Receiver<PageResult>,
    expected_pages: usize,
    workers: Vec<JoinHandle<()>>,
}

impl PageStream {
    /// Next arrived page; `None` once all workers have exited
    pub async fn next(&mut self) -> Option<PageResult> {
        self.rx.recv().await
    }

    /// Pages scheduled across all workers
    pub fn expected_pages(&self) -> usize {
        self.expected_pages
    }

    /// Workers actually started
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for PageStream {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn test_plan_for_250_pages() {
        let plan = FetchScheduler::plan(2, 250, 10);
        assert_eq!(plan.len(), 10);

        let sizes: Vec<usize> = plan.iter().map(Vec::len).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 249);
        assert_eq!(sizes.iter().filter(|&&n| n == 25).count(), 9);
        assert_eq!(sizes.iter().filter(|&&n| n == 24).count(), 1);

        assert_eq!(&plan[0][..3], &[2, 12, 22]);
        assert!(plan.iter().all(|pages| pages.windows(2).all(|w| w[1] - w[0] == 10)));

        let all: HashSet<u32> = plan.iter().flatten().copied().collect();
        assert_eq!(all.len(), 249);
        assert_eq!(all, (2..=250).collect::<HashSet<u32>>());
    }

    #[test]
    fn test_plan_with_fewer_pages_than_workers() {
        let plan = FetchScheduler::plan(2, 4, 10);
        assert_eq!(plan[0], vec![2]);
        assert_eq!(plan[2], vec![4]);
        assert!(plan[3..].iter().all(Vec::is_empty));

        assert!(FetchScheduler::plan(2, 1, 10).iter().all(Vec::is_empty));
    }

    /// Fails every page divisible by `fail_every`; records request order
    struct FakeSource {
        fail_every: u32,
        requested: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl PageSource for FakeSource {
        async fn fetch_page(&self, page: u32) -> Result<ScrobblePage, SourceError> {
            self.requested.lock().unwrap().push(page);
            tokio::time::sleep(Duration::from_millis(u64::from(page % 3))).await;
            if page % self.fail_every == 0 {
                return Err(SourceError::Status(500, "boom".to_string()));
            }
            Ok(ScrobblePage {
                total_pages: 40,
                ..ScrobblePage::default()
            })
        }
    }

    #[tokio::test]
    async fn test_every_page_reported_once_and_failures_do_not_stop_workers() {
        let source = Arc::new(FakeSource {
            fail_every: 7,
            requested: Mutex::new(Vec::new()),
        });
        let scheduler = FetchScheduler::new(4, 2);
        let mut stream = scheduler.spawn(source.clone(), 2, 40, CancellationToken::new());
        assert_eq!(stream.expected_pages(), 39);
        assert_eq!(stream.worker_count(), 4);

        let mut seen = Vec::new();
        let mut failures = 0;
        while let Some(result) = stream.next().await {
            if result.outcome.is_err() {
                assert_eq!(result.page % 7, 0);
                failures += 1;
            }
            seen.push(result.page);
        }

        // Within one worker's stride, pages are requested and arrive in increasing order
        let by_worker = |pages: &[u32]| {
            let mut groups: HashMap<u32, Vec<u32>> = HashMap::new();
            for &page in pages {
                groups.entry((page - 2) % 4).or_default().push(page);
            }
            groups
        };
        for (worker, pages) in by_worker(&seen) {
            assert!(
                pages.windows(2).all(|w| w[0] < w[1]),
                "worker {} delivered {:?}",
                worker,
                pages
            );
        }
        let requested = source.requested.lock().unwrap().clone();
        assert_eq!(requested.len(), 39);
        for (worker, pages) in by_worker(&requested) {
            assert_eq!(pages.len(), if worker < 3 { 10 } else { 9 }, "worker {}", worker);
            assert!(pages.windows(2).all(|w| w[0] < w[1]), "worker {} requested {:?}", worker, pages);
        }

        seen.sort_unstable();
        assert_eq!(seen, (2..=40).collect::<Vec<_>>());
        assert_eq!(failures, 5);
    }

    #[tokio::test]
    async fn test_cancel_ends_stream_early() {
        struct SlowSource;

        #[async_trait]
        impl PageSource for SlowSource {
            async fn fetch_page(&self, _page: u32) -> Result<ScrobblePage, SourceError> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(ScrobblePage::default())
            }
        }

        let cancel = CancellationToken::new();
        let mut stream = FetchScheduler::new(3, 4).spawn(Arc::new(SlowSource), 2, 100, cancel.clone());
        cancel.cancel();

        let next = tokio::time::timeout(Duration::from_secs(5), stream.next()).await;
        assert!(matches!(next, Ok(None)));
    }
}
