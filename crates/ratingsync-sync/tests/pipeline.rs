//! End-to-end tests for `SyncOrchestrator` over an in-memory feed and store.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use ratingsync_core::{EventKey, RatingEvent, RatingStore};
use ratingsync_feed::{FeedError, FeedPage, FeedRecord, FeedSource};
use ratingsync_sync::{
    SyncContext, SyncError, SyncOrchestrator, SyncSettings, SyncState, UpsertSettings,
};
use rust_decimal::Decimal;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Serves fixed pages; page `i` is addressed by cursor `"p{i}"`.
#[derive(Default)]
struct FakeFeed {
    pages: Vec<Vec<FeedRecord>>,
    fail_with_status: Option<u16>,
    gate: Option<Arc<Notify>>,
    requests: AtomicUsize,
}

impl FakeFeed {
    fn new(pages: Vec<Vec<FeedRecord>>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }
}

impl FeedSource for FakeFeed {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<FeedPage, FeedError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(status) = self.fail_with_status {
            return Err(FeedError::UnexpectedStatus {
                status,
                url: "https://feed.example.com/list".to_owned(),
            });
        }

        let index = cursor
            .and_then(|c| c.strip_prefix('p'))
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(0);
        let records = self.pages.get(index).cloned().unwrap_or_default();
        let next_cursor = (index + 1 < self.pages.len()).then(|| format!("p{}", index + 1));
        Ok(FeedPage {
            records,
            next_cursor,
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct FakeStoreError(String);

/// Keyed in-memory store with injectable failures.
#[derive(Default)]
struct MemoryStore {
    rows: Mutex<BTreeMap<EventKey, RatingEvent>>,
    reject_tickers: HashSet<String>,
    fail_range_query: bool,
    cancel_on_upsert: Option<CancellationToken>,
    upsert_calls: AtomicUsize,
}

impl MemoryStore {
    fn snapshot(&self) -> BTreeMap<EventKey, RatingEvent> {
        self.rows.lock().unwrap().clone()
    }

    fn seed(&self, events: &[RatingEvent]) {
        let mut rows = self.rows.lock().unwrap();
        for e in events {
            rows.insert(e.key(), e.clone());
        }
    }
}

impl RatingStore for MemoryStore {
    type Error = FakeStoreError;

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<RatingEvent>, FakeStoreError> {
        if self.fail_range_query {
            return Err(FakeStoreError("connection refused".to_owned()));
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn batch_upsert(&self, events: &[RatingEvent]) -> Result<u64, FakeStoreError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_upsert {
            token.cancel();
        }
        if let Some(bad) = events.iter().find(|e| self.reject_tickers.contains(&e.ticker)) {
            return Err(FakeStoreError(format!("value too long for {}", bad.ticker)));
        }
        let mut rows = self.rows.lock().unwrap();
        for e in events {
            rows.insert(e.key(), e.clone());
        }
        Ok(events.len() as u64)
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A timestamp `hours` before now, at microsecond precision so it survives
/// normalization unchanged.
fn hours_ago(hours: i64) -> DateTime<Utc> {
    (Utc::now() - Duration::hours(hours)).trunc_subsecs(0)
}

fn record(ticker: &str, at: DateTime<Utc>, target_to: &str) -> FeedRecord {
    FeedRecord {
        ticker: ticker.to_owned(),
        company: format!("{ticker} Corp"),
        target_from: "$10.00".to_owned(),
        target_to: target_to.to_owned(),
        action: "target raised by".to_owned(),
        brokerage: "Acme Securities".to_owned(),
        rating_from: "Hold".to_owned(),
        rating_to: "Buy".to_owned(),
        time: at.to_rfc3339(),
    }
}

fn stored(ticker: &str, at: DateTime<Utc>, target_to: i64) -> RatingEvent {
    RatingEvent {
        ticker: ticker.to_owned(),
        company: format!("{ticker} Corp"),
        brokerage: "Acme Securities".to_owned(),
        action: "target raised by".to_owned(),
        rating_from: "Hold".to_owned(),
        rating_to: "Buy".to_owned(),
        target_from: Decimal::from(10),
        target_to: Decimal::from(target_to),
        timestamp: at,
    }
}

fn settings(batch_size: usize, worker_count: usize) -> SyncSettings {
    let mut settings = SyncSettings::default();
    settings.collect.max_retries = 0;
    settings.collect.backoff_base_ms = 0;
    settings.upsert = UpsertSettings {
        batch_size,
        worker_count,
        batch_timeout: None,
    };
    settings
}

fn orchestrator(
    feed: FakeFeed,
    store: &Arc<MemoryStore>,
    settings: SyncSettings,
) -> SyncOrchestrator<FakeFeed, MemoryStore> {
    SyncOrchestrator::new(SyncContext {
        feed,
        store: Arc::clone(store),
        settings,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_sync_inserts_everything() {
    let feed = FakeFeed::new(vec![
        vec![record("AAPL", hours_ago(1), "$12"), record("MSFT", hours_ago(2), "$20")],
        vec![record("GOOG", hours_ago(3), "$30")],
    ]);
    let store = Arc::new(MemoryStore::default());
    let orch = orchestrator(feed, &store, settings(2, 2));

    let result = orch.synchronize(&CancellationToken::new()).await.unwrap();

    assert_eq!(result.total_processed, 3);
    assert_eq!(result.total_inserted, 3);
    assert_eq!(result.new_events, 3);
    assert_eq!(result.updated_events, 0);
    assert_eq!(result.failed_inserts, 0);
    assert_eq!(store.snapshot().len(), 3);
    assert_eq!(orch.state(), SyncState::Done);
}

#[tokio::test]
async fn second_identical_sync_writes_nothing() {
    let t1 = hours_ago(1);
    let t2 = hours_ago(2);
    let pages = vec![vec![record("AAPL", t1, "$12"), record("MSFT", t2, "$20")]];
    let store = Arc::new(MemoryStore::default());

    let first = orchestrator(FakeFeed::new(pages.clone()), &store, settings(10, 2));
    first.synchronize(&CancellationToken::new()).await.unwrap();
    let after_first = store.snapshot();
    let calls_after_first = store.upsert_calls.load(Ordering::SeqCst);

    let second = orchestrator(FakeFeed::new(pages), &store, settings(10, 2));
    let result = second.synchronize(&CancellationToken::new()).await.unwrap();

    assert_eq!(result.total_inserted, 0);
    assert_eq!(result.unchanged_events, 2);
    assert_eq!(store.snapshot(), after_first);
    assert_eq!(
        store.upsert_calls.load(Ordering::SeqCst),
        calls_after_first,
        "empty write-set must not reach the store"
    );
    assert_eq!(second.state(), SyncState::Done);
}

#[tokio::test]
async fn events_older_than_lookback_are_not_rewritten() {
    let at = hours_ago(24 * 45);
    let pages = vec![vec![record("AAPL", at, "$12")]];
    let store = Arc::new(MemoryStore::default());

    let first = orchestrator(FakeFeed::new(pages.clone()), &store, settings(10, 1))
        .synchronize(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.new_events, 1);
    let calls_after_first = store.upsert_calls.load(Ordering::SeqCst);

    let second = orchestrator(FakeFeed::new(pages), &store, settings(10, 1))
        .synchronize(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.total_inserted, 0);
    assert_eq!(second.new_events, 0);
    assert_eq!(second.unchanged_events, 1);
    assert_eq!(store.snapshot().len(), 1);
    assert_eq!(store.upsert_calls.load(Ordering::SeqCst), calls_after_first);
}

#[tokio::test]
async fn correction_to_old_event_counts_as_update() {
    let at = hours_ago(24 * 90);
    let store = Arc::new(MemoryStore::default());
    store.seed(&[stored("AAPL", at, 7)]);
    let feed = FakeFeed::new(vec![vec![record("AAPL", at, "$9")]]);

    let result = orchestrator(feed, &store, settings(10, 1))
        .synchronize(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.updated_events, 1);
    assert_eq!(result.new_events, 0);
}

#[tokio::test]
async fn huge_lookback_does_not_overflow() {
    let mut settings = settings(10, 1);
    settings.lookback_days = u32::MAX;
    let feed = FakeFeed::new(vec![vec![record("AAPL", hours_ago(1), "$12")]]);
    let store = Arc::new(MemoryStore::default());

    let result = orchestrator(feed, &store, settings)
        .synchronize(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.new_events, 1);
}

#[tokio::test]
async fn corrected_values_update_the_stored_event() {
    let at = hours_ago(5);
    let store = Arc::new(MemoryStore::default());
    store.seed(&[stored("AAPL", at, 7)]);
    let feed = FakeFeed::new(vec![vec![record("AAPL", at, "$8.00")]]);

    let result = orchestrator(feed, &store, settings(10, 1))
        .synchronize(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.updated_events, 1);
    assert_eq!(result.new_events, 0);
    let rows = store.snapshot();
    assert_eq!(rows.len(), 1);
    let row = rows.values().next().unwrap();
    assert_eq!(row.target_to, Decimal::from(8));
}

#[tokio::test]
async fn classification_mixes_new_changed_and_unchanged() {
    let (t1, t2, t3) = (hours_ago(1), hours_ago(2), hours_ago(3));
    let store = Arc::new(MemoryStore::default());
    store.seed(&[stored("AAPL", t1, 12), stored("MSFT", t2, 20)]);
    let feed = FakeFeed::new(vec![vec![
        record("AAPL", t1, "$12"),
        record("MSFT", t2, "$25"),
        record("GOOG", t3, "$30"),
    ]]);

    let result = orchestrator(feed, &store, settings(10, 2))
        .synchronize(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.new_events, 1);
    assert_eq!(result.updated_events, 1);
    assert_eq!(result.unchanged_events, 1);
    assert_eq!(result.total_inserted, 2);
}

#[tokio::test]
async fn duplicate_tickers_are_reported() {
    let feed = FakeFeed::new(vec![
        vec![record("AAPL", hours_ago(1), "$1"), record("MSFT", hours_ago(1), "$1")],
        vec![record("AAPL", hours_ago(2), "$1"), record("AAPL", hours_ago(3), "$1")],
    ]);
    let store = Arc::new(MemoryStore::default());

    let result = orchestrator(feed, &store, settings(10, 2))
        .synchronize(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.unique_tickers_api, 2);
    assert_eq!(result.duplicate_tickers, 1);
    assert_eq!(result.duplicates_list.len(), 1);
    assert_eq!(result.duplicates_list[0].ticker, "AAPL");
    assert_eq!(result.duplicates_list[0].count, 3);
}

#[tokio::test]
async fn malformed_records_are_skipped() {
    let feed = FakeFeed::new(vec![vec![
        record("AAPL", hours_ago(1), "$12"),
        record("BAD", hours_ago(1), "N/A"),
        record("MSFT", hours_ago(2), "$20"),
    ]]);
    let store = Arc::new(MemoryStore::default());

    let result = orchestrator(feed, &store, settings(10, 2))
        .synchronize(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.total_processed, 3);
    assert_eq!(result.skipped_invalid, 1);
    assert_eq!(result.total_inserted, 2);
    assert!(store.snapshot().keys().all(|k| k.ticker != "BAD"));
}

#[tokio::test]
async fn failed_batch_is_isolated_and_audited() {
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("failed_inserts.log");
    let feed = FakeFeed::new(vec![vec![
        record("AAPL", hours_ago(1), "$1"),
        record("MSFT", hours_ago(2), "$1"),
        record("BAD", hours_ago(3), "$1"),
        record("GOOG", hours_ago(4), "$1"),
        record("TSLA", hours_ago(5), "$1"),
        record("NVDA", hours_ago(6), "$1"),
    ]]);
    let store = Arc::new(MemoryStore {
        reject_tickers: HashSet::from(["BAD".to_owned()]),
        ..MemoryStore::default()
    });
    let mut settings = settings(2, 3);
    settings.audit_log_path = Some(audit_path.clone());

    let result = orchestrator(feed, &store, settings)
        .synchronize(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.total_inserted, 4);
    assert_eq!(result.failed_inserts, 2);
    assert_eq!(
        result.failed_insert_details.keys().collect::<Vec<_>>(),
        ["BAD", "GOOG"]
    );
    let tickers: Vec<String> = store.snapshot().keys().map(|k| k.ticker.clone()).collect();
    assert_eq!(tickers.len(), 4);
    assert!(!tickers.contains(&"BAD".to_owned()));

    let audit = std::fs::read_to_string(&audit_path).unwrap();
    assert!(audit.contains("Total failed inserts: 2"));
    assert!(audit.contains("Ticker: BAD - Reason: value too long for BAD"));
}

#[tokio::test]
async fn feed_failure_leaves_store_untouched() {
    let feed = FakeFeed {
        fail_with_status: Some(500),
        ..FakeFeed::new(vec![vec![record("AAPL", hours_ago(1), "$1")]])
    };
    let store = Arc::new(MemoryStore::default());
    store.seed(&[stored("MSFT", hours_ago(2), 5)]);
    let before = store.snapshot();
    let orch = orchestrator(feed, &store, settings(10, 2));

    let err = orch.synchronize(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(
        err,
        SyncError::Collection(FeedError::UnexpectedStatus { status: 500, .. })
    ));
    assert_eq!(orch.state(), SyncState::Failed);
    assert_eq!(store.snapshot(), before);
    assert_eq!(store.upsert_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn range_query_failure_fails_the_run() {
    let feed = FakeFeed::new(vec![vec![record("AAPL", hours_ago(1), "$1")]]);
    let store = Arc::new(MemoryStore {
        fail_range_query: true,
        ..MemoryStore::default()
    });
    let orch = orchestrator(feed, &store, settings(10, 2));

    let err = orch.synchronize(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, SyncError::ExistingEvents(_)));
    assert_eq!(orch.state(), SyncState::Failed);
    assert_eq!(store.upsert_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelled_before_start_fails_in_collection() {
    let feed = FakeFeed::new(vec![vec![record("AAPL", hours_ago(1), "$1")]]);
    let store = Arc::new(MemoryStore::default());
    let orch = orchestrator(feed, &store, settings(10, 2));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = orch.synchronize(&cancel).await.unwrap_err();

    assert!(matches!(err, SyncError::Collection(FeedError::Cancelled { .. })));
    assert!(store.snapshot().is_empty());
}

#[tokio::test]
async fn cancellation_during_upsert_stops_dispatch() {
    let cancel = CancellationToken::new();
    let records: Vec<FeedRecord> = (1..=6)
        .map(|h| record("AAPL", hours_ago(h), "$1"))
        .collect();
    let store = Arc::new(MemoryStore {
        cancel_on_upsert: Some(cancel.clone()),
        ..MemoryStore::default()
    });
    let orch = orchestrator(FakeFeed::new(vec![records]), &store, settings(2, 1));

    let result = orch.synchronize(&cancel).await.unwrap();

    assert_eq!(result.total_inserted, 2);
    assert_eq!(result.cancelled_events, 4);
    assert_eq!(result.failed_inserts, 0);
    assert_eq!(store.snapshot().len(), 2);
    assert_eq!(orch.state(), SyncState::Done);
}

#[tokio::test]
async fn overlapping_runs_are_rejected() {
    let gate = Arc::new(Notify::new());
    let feed = FakeFeed {
        gate: Some(Arc::clone(&gate)),
        ..FakeFeed::new(vec![vec![record("AAPL", hours_ago(1), "$1")]])
    };
    let store = Arc::new(MemoryStore::default());
    let orch = Arc::new(orchestrator(feed, &store, settings(10, 1)));
    let mut states = orch.subscribe();

    let running = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.synchronize(&CancellationToken::new()).await })
    };
    states
        .wait_for(|s| *s == SyncState::Collecting)
        .await
        .unwrap();

    let second = orch.synchronize(&CancellationToken::new()).await;
    assert!(matches!(second, Err(SyncError::AlreadyRunning)));

    gate.notify_one();
    let first = running.await.unwrap().unwrap();
    assert_eq!(first.total_inserted, 1);
}

#[tokio::test]
async fn orchestrator_can_run_again_after_failure() {
    let store = Arc::new(MemoryStore::default());
    let orch = orchestrator(
        FakeFeed::new(vec![vec![record("AAPL", hours_ago(1), "$1")]]),
        &store,
        settings(10, 1),
    );
    let cancelled = CancellationToken::new();
    cancelled.cancel();
    assert!(orch.synchronize(&cancelled).await.is_err());
    assert_eq!(orch.state(), SyncState::Failed);

    let result = orch.synchronize(&CancellationToken::new()).await.unwrap();
    assert_eq!(result.total_inserted, 1);
    assert_eq!(orch.state(), SyncState::Done);
}
