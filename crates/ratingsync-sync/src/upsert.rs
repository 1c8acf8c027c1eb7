//! Bounded concurrent upsert of a write-set into a [`RatingStore`].

use std::sync::Arc;
use std::time::Duration;

use ratingsync_core::{EventKey, RatingEvent, RatingStore};
use tokio_util::sync::CancellationToken;

use crate::batch::{partition, run_batches, BatchReport, ExecutorOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertSettings {
    pub batch_size: usize,
    pub worker_count: usize,
    pub batch_timeout: Option<Duration>,
}

impl Default for UpsertSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            worker_count: 10,
            batch_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Partitions a write-set and writes each batch through
/// [`RatingStore::batch_upsert`] on a bounded worker pool.
///
/// Each batch is one store transaction, so a batch is either fully written
/// or not at all.
pub struct UpsertCoordinator<S> {
    store: Arc<S>,
    settings: UpsertSettings,
}

impl<S: RatingStore> UpsertCoordinator<S> {
    #[must_use]
    pub fn new(store: Arc<S>, settings: UpsertSettings) -> Self {
        Self { store, settings }
    }

    /// Writes `write_set` and reports which keys committed.
    pub async fn upsert(
        &self,
        write_set: Vec<RatingEvent>,
        cancel: &CancellationToken,
    ) -> BatchReport<EventKey> {
        let total = write_set.len();
        let batches = partition(write_set, self.settings.batch_size);
        let options = ExecutorOptions {
            worker_count: self.settings.worker_count,
            batch_timeout: self.settings.batch_timeout,
        };

        tracing::info!(
            events = total,
            batches = batches.len(),
            batch_size = self.settings.batch_size,
            worker_count = self.settings.worker_count,
            "upserting write-set"
        );

        let store = Arc::clone(&self.store);
        let report = run_batches(batches, &options, cancel, move |batch: Vec<RatingEvent>| {
            let store = Arc::clone(&store);
            async move { store.batch_upsert(&batch).await.map(|_rows| ()) }
        })
        .await;

        tracing::info!(
            committed = report.committed_count(),
            failed = report.failed_items,
            cancelled = report.cancelled_items,
            batches_failed = report.batches_failed,
            "upsert complete"
        );

        report
    }
}
