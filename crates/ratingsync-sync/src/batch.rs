//! Bounded concurrent batch executor.
//!
//! Batches are pre-loaded into a bounded channel and drained by a fixed
//! number of workers. A failed batch never stops its siblings. Shared state
//! is limited to the committed-key set, the failure map and a few counters.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ratingsync_core::{EventKey, RatingEvent};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Longest extra wait granted to a batch after its deadline passes.
pub const MAX_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// An item that can be written in a batch.
pub trait BatchItem: Send + 'static {
    type Key: Eq + Hash + Clone + Send + 'static;

    /// Identity used to count committed items once.
    fn key(&self) -> Self::Key;

    /// Short failure-map key, e.g. the ticker.
    fn label(&self) -> String;

    /// Failure-map key used when [`Self::label`] is already taken.
    fn qualified_label(&self) -> String;
}

impl BatchItem for RatingEvent {
    type Key = EventKey;

    fn key(&self) -> EventKey {
        RatingEvent::key(self)
    }

    fn label(&self) -> String {
        self.ticker.clone()
    }

    fn qualified_label(&self) -> String {
        RatingEvent::key(self).to_string()
    }
}

/// Splits `items` into contiguous batches of at most `batch_size`.
///
/// Order is preserved and every item lands in exactly one batch. The last
/// batch may be smaller. A `batch_size` of zero is treated as one.
#[must_use]
pub fn partition<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut current = Vec::with_capacity(batch_size.min(items.len()));

    for item in items {
        current.push(item);
        if current.len() == batch_size {
            batches.push(std::mem::replace(
                &mut current,
                Vec::with_capacity(batch_size),
            ));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }

    batches
}

/// Executor settings for [`run_batches`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Upper bound on concurrently running batches.
    pub worker_count: usize,
    /// Deadline per batch; `None` waits indefinitely.
    ///
    /// A batch still running at the deadline gets a grace period of half the
    /// deadline (capped at [`MAX_TIMEOUT_GRACE`]) to settle before its task is
    /// aborted. An abort that lands while the store is committing cannot tell
    /// whether the commit reached the database, so such a batch is reported
    /// as failed even though its rows may have been written. Re-running the
    /// sync classifies those rows as unchanged.
    pub batch_timeout: Option<Duration>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            worker_count: 10,
            batch_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Aggregated outcome of [`run_batches`].
#[derive(Debug, Clone)]
pub struct BatchReport<K> {
    /// Keys of items in committed batches.
    pub committed: HashSet<K>,
    /// Failure key to reason, one entry per failed item.
    pub failures: HashMap<String, String>,
    /// Items in failed batches.
    pub failed_items: usize,
    /// Items never dispatched because of cancellation.
    pub cancelled_items: usize,
    pub batches_total: usize,
    pub batches_committed: usize,
    pub batches_failed: usize,
}

impl<K> Default for BatchReport<K> {
    fn default() -> Self {
        Self {
            committed: HashSet::new(),
            failures: HashMap::new(),
            failed_items: 0,
            cancelled_items: 0,
            batches_total: 0,
            batches_committed: 0,
            batches_failed: 0,
        }
    }
}

impl<K> BatchReport<K> {
    #[must_use]
    pub fn committed_count(&self) -> usize {
        self.committed.len()
    }
}

struct Shared<K> {
    committed: Mutex<HashSet<K>>,
    failures: Mutex<HashMap<String, String>>,
    failed_items: AtomicUsize,
    cancelled_items: AtomicUsize,
    batches_committed: AtomicUsize,
    batches_failed: AtomicUsize,
}

impl<K: Eq + Hash> Shared<K> {
    fn new() -> Self {
        Self {
            committed: Mutex::new(HashSet::new()),
            failures: Mutex::new(HashMap::new()),
            failed_items: AtomicUsize::new(0),
            cancelled_items: AtomicUsize::new(0),
            batches_committed: AtomicUsize::new(0),
            batches_failed: AtomicUsize::new(0),
        }
    }

    fn record_commit(&self, keys: Vec<K>) {
        self.committed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(keys);
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self, labels: Vec<(String, String)>, reason: &str) {
        let count = labels.len();
        {
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            for (label, qualified) in labels {
                if failures.contains_key(&label) {
                    failures.insert(qualified, reason.to_owned());
                } else {
                    failures.insert(label, reason.to_owned());
                }
            }
        }
        self.failed_items.fetch_add(count, Ordering::Relaxed);
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_cancelled(&self, count: usize) {
        self.cancelled_items.fetch_add(count, Ordering::Relaxed);
    }

    fn take_report(&self, batches_total: usize) -> BatchReport<K> {
        BatchReport {
            committed: std::mem::take(
                &mut *self.committed.lock().unwrap_or_else(PoisonError::into_inner),
            ),
            failures: std::mem::take(
                &mut *self.failures.lock().unwrap_or_else(PoisonError::into_inner),
            ),
            failed_items: self.failed_items.load(Ordering::Relaxed),
            cancelled_items: self.cancelled_items.load(Ordering::Relaxed),
            batches_total,
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
        }
    }
}

/// Runs `apply` over `batches` with at most `worker_count` in flight.
///
/// Each batch is applied in its own task: a panic inside `apply` is recorded
/// as a failure of that batch, and a batch exceeding `batch_timeout` is
/// aborted and recorded as failed. Once `cancel` fires, workers stop taking
/// new batches; in-flight batches run to completion and the rest are counted
/// in [`BatchReport::cancelled_items`].
pub async fn run_batches<T, F, Fut, E>(
    batches: Vec<Vec<T>>,
    options: &ExecutorOptions,
    cancel: &CancellationToken,
    apply: F,
) -> BatchReport<T::Key>
where
    T: BatchItem,
    F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let batches_total = batches.len();
    if batches_total == 0 {
        return BatchReport::default();
    }

    let shared = Arc::new(Shared::new());
    let (tx, rx) = mpsc::channel::<Vec<T>>(batches_total);
    for batch in batches {
        // Capacity equals the batch count, so this only fails if the
        // receiver is gone.
        if let Err(e) = tx.try_send(batch) {
            shared.record_cancelled(e.into_inner().len());
        }
    }
    drop(tx);

    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let apply = Arc::new(apply);
    let worker_count = options.worker_count.clamp(1, batches_total);

    tracing::debug!(batches_total, worker_count, "dispatching batches");

    let mut workers = JoinSet::new();
    for worker_id in 0..worker_count {
        let rx = Arc::clone(&rx);
        let shared = Arc::clone(&shared);
        let apply = Arc::clone(&apply);
        let cancel = cancel.clone();
        let batch_timeout = options.batch_timeout;

        workers.spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let next = rx.lock().await.recv().await;
                let Some(batch) = next else {
                    break;
                };
                if cancel.is_cancelled() {
                    shared.record_cancelled(batch.len());
                    break;
                }
                apply_batch(worker_id, batch, apply.as_ref(), batch_timeout, &shared).await;
            }
        });
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "batch worker terminated abnormally");
        }
    }

    // Undispatched batches remain only after cancellation.
    {
        let mut rx = rx.lock().await;
        while let Ok(batch) = rx.try_recv() {
            shared.record_cancelled(batch.len());
        }
    }

    let report = shared.take_report(batches_total);

    if report.cancelled_items > 0 {
        tracing::warn!(
            cancelled_items = report.cancelled_items,
            "batch dispatch cancelled"
        );
    }

    report
}

async fn apply_batch<T, F, Fut, E>(
    worker_id: usize,
    batch: Vec<T>,
    apply: &F,
    batch_timeout: Option<Duration>,
    shared: &Shared<T::Key>,
) where
    T: BatchItem,
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let size = batch.len();
    let keys: Vec<T::Key> = batch.iter().map(BatchItem::key).collect();
    let labels: Vec<(String, String)> = batch
        .iter()
        .map(|item| (item.label(), item.qualified_label()))
        .collect();

    let mut handle = tokio::spawn(apply(batch));
    let outcome = match batch_timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => flatten(joined),
            Err(_) => {
                let grace = (limit / 2).min(MAX_TIMEOUT_GRACE);
                tracing::debug!(worker_id, grace_ms = grace.as_millis(), "batch past deadline");
                match tokio::time::timeout(grace, &mut handle).await {
                    Ok(joined) => flatten(joined),
                    Err(_) => {
                        handle.abort();
                        Err(format!(
                            "batch timed out after {}ms; outcome unknown",
                            limit.as_millis()
                        ))
                    }
                }
            }
        },
        None => flatten(handle.await),
    };

    match outcome {
        Ok(()) => {
            tracing::debug!(worker_id, size, "batch committed");
            shared.record_commit(keys);
        }
        Err(reason) => {
            tracing::warn!(worker_id, size, reason = %reason, "batch failed");
            shared.record_failure(labels, &reason);
        }
    }
}

fn flatten<E: Display>(joined: Result<Result<(), E>, JoinError>) -> Result<(), String> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) if e.is_panic() => Err("batch task panicked".to_owned()),
        Err(_) => Err("batch task was cancelled".to_owned()),
    }
}

#[cfg(test)]
#[path = "batch_test.rs"]
mod tests;
