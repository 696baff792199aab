//! Poll source: periodic scan for unprinted entries

use super::{BatchOrigin, CandidateBatch, ChangeSource};
use crate::store::RecordStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Longest wait between retries of a failing query
const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(30);

pub struct PollSource {
    store: Arc<dyn RecordStore>,
    interval: Duration,
}

impl PollSource {
    pub fn new(store: Arc<dyn RecordStore>, interval: Duration) -> Self {
        Self { store, interval }
    }
}

#[async_trait]
impl ChangeSource for PollSource {
    fn name(&self) -> &'static str {
        "poll"
    }

    async fn run(self: Box<Self>, tx: mpsc::Sender<CandidateBatch>, shutdown: CancellationToken) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Poll source started");
        let mut error_delay = self.interval;

        loop {
            let delay = match self.store.fetch_unprinted().await {
                Ok(entries) if entries.is_empty() => {
                    error_delay = self.interval;
                    self.interval
                }
                Ok(entries) => {
                    error_delay = self.interval;
                    tracing::debug!(count = entries.len(), "Unprinted entries found");

                    let (batch, done) = CandidateBatch::with_ack(BatchOrigin::Poll, entries);
                    if tx.send(batch).await.is_err() {
                        tracing::info!("Coordinator gone, poll source stopping");
                        break;
                    }
                    // Never requery while the batch is still being printed
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = done => {}
                    }
                    self.interval
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = error_delay.as_millis() as u64,
                        "Poll query failed"
                    );
                    let delay = error_delay;
                    error_delay = (error_delay * 2).min(MAX_ERROR_BACKOFF.max(self.interval));
                    delay
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!("Poll source stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source;
    use crate::store::memory::{MemoryStore, entry};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_empty_poll_sends_nothing() {
        let store = Arc::new(MemoryStore::default());
        let (tx, mut rx) = source::channel();
        let shutdown = CancellationToken::new();

        let source = Box::new(PollSource::new(store.clone(), Duration::from_millis(10)));
        let handle = tokio::spawn(source.run(tx, shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(80)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(store.fetches.load(Ordering::SeqCst) >= 2);
        assert!(rx.try_recv().is_err());
        assert_eq!(store.marks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_waits_for_ack_before_requery() {
        let store = Arc::new(MemoryStore::with_entries(vec![entry("1", "John", "Doe")]));
        let (tx, mut rx) = source::channel();
        let shutdown = CancellationToken::new();

        let source = Box::new(PollSource::new(store.clone(), Duration::from_millis(5)));
        let handle = tokio::spawn(source.run(tx, shutdown.clone()));

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.origin, BatchOrigin::Poll);
        assert_eq!(batch.entries.len(), 1);

        // Batch still in flight: no further query
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);

        batch.complete();
        let next = rx.recv().await.unwrap();
        assert_eq!(next.entries[0].id, "1");
        assert!(store.fetches.load(Ordering::SeqCst) >= 2);

        shutdown.cancel();
        next.complete();
        handle.await.unwrap();
    }
}
