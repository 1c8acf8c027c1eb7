//! Failed-insert audit file and run summary logging.
//!
//! The audit file is append-only. Each run with failures adds one block:
//!
//! ```text
//! === Sync run 2025-03-25T00:30:06Z ===
//! Total failed inserts: 2
//! Ticker: BAD - Reason: constraint violation
//! Ticker: GOOG - Reason: constraint violation
//! ```

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;

use crate::result::SyncResult;

/// Duplicate tickers shown in the run summary.
const SUMMARY_DUPLICATES: usize = 10;

/// Renders the audit block for `result`, with keys in sorted order.
#[must_use]
pub fn render_failure_report(result: &SyncResult, at: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "=== Sync run {} ===",
        at.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    let _ = writeln!(out, "Total failed inserts: {}", result.failed_inserts);
    for (key, reason) in &result.failed_insert_details {
        let _ = writeln!(out, "Ticker: {key} - Reason: {reason}");
    }
    out
}

/// Appends the audit block for `result` to `path`, creating the file if
/// needed. Does nothing when the run had no failures.
///
/// # Errors
///
/// Returns any I/O error from opening or writing the file.
pub async fn append_failure_audit(
    path: &Path,
    result: &SyncResult,
    at: DateTime<Utc>,
) -> std::io::Result<()> {
    if !result.has_failures() {
        return Ok(());
    }

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(render_failure_report(result, at).as_bytes())
        .await?;
    file.flush().await?;

    tracing::info!(
        path = %path.display(),
        failed = result.failed_inserts,
        "failed inserts written to audit log"
    );
    Ok(())
}

/// Logs the run summary and the most frequent duplicate tickers.
pub fn log_summary(result: &SyncResult) {
    tracing::info!(
        total_processed = result.total_processed,
        skipped_invalid = result.skipped_invalid,
        write_set = result.write_set_size(),
        total_inserted = result.total_inserted,
        new_events = result.new_events,
        updated_events = result.updated_events,
        unchanged_events = result.unchanged_events,
        failed_inserts = result.failed_inserts,
        cancelled_events = result.cancelled_events,
        unique_tickers = result.unique_tickers_api,
        duplicate_tickers = result.duplicate_tickers,
        total_ms = result.timings.total_ms,
        "sync summary"
    );
    tracing::info!(
        duplicate_tickers = result.duplicate_tickers,
        unique_tickers = result.unique_tickers_api,
        "duplicated tickers: {:.2}% of unique",
        result.duplicate_ticker_pct()
    );

    for dup in result.duplicates_list.iter().take(SUMMARY_DUPLICATES) {
        tracing::info!(ticker = %dup.ticker, count = dup.count, "duplicate ticker");
    }
}
