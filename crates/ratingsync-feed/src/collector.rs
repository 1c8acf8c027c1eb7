//! Drains the paginated feed into normalized events.
//!
//! **All-or-nothing semantics**: any page failure discards the events
//! gathered so far and returns the error. A partial collection would let the
//! change detector treat the missing tail as absent from the feed.

use std::collections::HashMap;

use ratingsync_core::RatingEvent;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::client::FeedSource;
use crate::error::FeedError;
use crate::normalize::normalize_record;
use crate::retry::retry_with_backoff;

/// Page-loop settings for [`collect_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectOptions {
    /// Upper bound on pages; guards against cycling cursors.
    pub max_pages: usize,
    /// Additional attempts per page after a transient failure.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential back-off.
    pub backoff_base_ms: u64,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            max_pages: 500,
            max_retries: 2,
            backoff_base_ms: 500,
        }
    }
}

/// A ticker seen more than once in one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickerDuplicate {
    pub ticker: String,
    pub count: usize,
}

/// Per-ticker occurrence summary of one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateReport {
    /// Distinct tickers among the normalized events.
    pub unique_tickers: usize,
    /// Number of tickers that occurred more than once.
    pub duplicate_count: usize,
    /// Tickers with `count > 1`, by descending count then first appearance.
    pub duplicates: Vec<TickerDuplicate>,
}

impl DuplicateReport {
    /// Builds the report from events in feed order.
    #[must_use]
    pub fn from_events(events: &[RatingEvent]) -> Self {
        // ticker -> (first index, count)
        let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
        for (idx, event) in events.iter().enumerate() {
            counts.entry(event.ticker.as_str()).or_insert((idx, 0)).1 += 1;
        }

        let unique_tickers = counts.len();
        let mut ranked: Vec<(&str, usize, usize)> = counts
            .into_iter()
            .filter(|(_, (_, count))| *count > 1)
            .map(|(ticker, (first, count))| (ticker, first, count))
            .collect();
        ranked.sort_by(|a, b| b.2.cmp(&a.2).then(a.1.cmp(&b.1)));

        let duplicates: Vec<TickerDuplicate> = ranked
            .into_iter()
            .map(|(ticker, _, count)| TickerDuplicate {
                ticker: ticker.to_owned(),
                count,
            })
            .collect();

        Self {
            unique_tickers,
            duplicate_count: duplicates.len(),
            duplicates,
        }
    }
}

/// Result of draining the feed.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    /// Normalized events in feed order.
    pub events: Vec<RatingEvent>,
    pub duplicates: DuplicateReport,
    /// Raw records fetched, including ones dropped by normalization.
    pub raw_records: usize,
    pub skipped_invalid: usize,
    pub pages: usize,
}

/// Fetches every page from `source` and normalizes the records.
///
/// Starts with no cursor and follows `next_cursor` until the feed reports
/// none. Each page fetch is retried on transient errors per `options`.
/// Records that fail normalization are logged at `debug` and counted in
/// [`Collection::skipped_invalid`].
///
/// # Errors
///
/// - Any page error after retries are exhausted.
/// - [`FeedError::PaginationLimit`] when more than `max_pages` pages are
///   requested.
/// - [`FeedError::Cancelled`] when `cancel` fires before a page request.
pub async fn collect_all<S: FeedSource>(
    source: &S,
    options: &CollectOptions,
    cancel: &CancellationToken,
) -> Result<Collection, FeedError> {
    let mut events: Vec<RatingEvent> = Vec::new();
    let mut cursor: Option<String> = None;
    let mut raw_records = 0usize;
    let mut skipped_invalid = 0usize;
    let mut pages = 0usize;

    loop {
        if cancel.is_cancelled() {
            return Err(FeedError::Cancelled { pages });
        }
        if pages >= options.max_pages {
            return Err(FeedError::PaginationLimit {
                max_pages: options.max_pages,
            });
        }

        let page = retry_with_backoff(options.max_retries, options.backoff_base_ms, || {
            source.fetch_page(cursor.as_deref())
        })
        .await?;
        pages += 1;
        raw_records += page.records.len();

        for record in page.records {
            match normalize_record(record) {
                Ok(event) => events.push(event),
                Err(e) => {
                    skipped_invalid += 1;
                    tracing::debug!(error = %e, "skipping malformed feed record");
                }
            }
        }

        tracing::debug!(
            page = pages,
            records = raw_records,
            events = events.len(),
            "fetched feed page"
        );

        cursor = page.next_cursor;
        if cursor.is_none() {
            break;
        }
    }

    let duplicates = DuplicateReport::from_events(&events);
    tracing::info!(
        pages,
        raw_records,
        events = events.len(),
        skipped_invalid,
        unique_tickers = duplicates.unique_tickers,
        duplicate_tickers = duplicates.duplicate_count,
        "feed collection complete"
    );

    Ok(Collection {
        events,
        duplicates,
        raw_records,
        skipped_invalid,
        pages,
    })
}
