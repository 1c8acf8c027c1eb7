use std::collections::BTreeMap;

use ratingsync_feed::TickerDuplicate;
use serde::Serialize;

/// Wall-clock time spent per phase, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncTimings {
    pub collect_ms: u64,
    pub diff_ms: u64,
    pub upsert_ms: u64,
    pub total_ms: u64,
}

/// Outcome of one synchronization run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    /// Raw feed records fetched, including malformed ones.
    pub total_processed: usize,
    /// Records dropped by normalization.
    pub skipped_invalid: usize,
    /// Write-set events in committed batches.
    pub total_inserted: usize,
    pub new_events: usize,
    pub updated_events: usize,
    /// Incoming events identical to their persisted copy.
    pub unchanged_events: usize,
    /// Write-set events in failed batches.
    pub failed_inserts: usize,
    /// Write-set events never dispatched because the run was cancelled.
    pub cancelled_events: usize,
    pub unique_tickers_api: usize,
    pub duplicate_tickers: usize,
    pub duplicates_list: Vec<TickerDuplicate>,
    pub failed_insert_details: BTreeMap<String, String>,
    pub timings: SyncTimings,
}

impl SyncResult {
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed_inserts > 0
    }

    /// Size of the write-set this run produced.
    #[must_use]
    pub fn write_set_size(&self) -> usize {
        self.total_inserted + self.failed_inserts + self.cancelled_events
    }

    /// Duplicated tickers as a percentage of unique tickers; `0.0` when the
    /// feed was empty.
    #[must_use]
    pub fn duplicate_ticker_pct(&self) -> f64 {
        if self.unique_tickers_api == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let pct = self.duplicate_tickers as f64 / self.unique_tickers_api as f64 * 100.0;
        pct
    }
}
