//! Normalization from raw [`FeedRecord`]s to [`RatingEvent`]s.
//!
//! Normalization is pure. A record that fails here is dropped by the
//! collector; it never aborts a sync.

use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use ratingsync_core::RatingEvent;
use rust_decimal::Decimal;

use crate::error::NormalizeError;
use crate::types::FeedRecord;

const CURRENCY_SYMBOLS: [char; 4] = ['$', '€', '£', '¥'];

/// Persisted timestamps keep microsecond precision.
const TIMESTAMP_DIGITS: u16 = 6;

/// Converts one raw feed record into a [`RatingEvent`].
///
/// The ticker is trimmed. Display strings are trimmed but otherwise passed
/// through unchanged.
///
/// # Errors
///
/// - [`NormalizeError::EmptyTicker`] when the ticker is blank.
/// - [`NormalizeError::InvalidPrice`] when either price target fails
///   [`parse_price`].
/// - [`NormalizeError::InvalidTimestamp`] when `time` is not RFC 3339.
pub fn normalize_record(record: FeedRecord) -> Result<RatingEvent, NormalizeError> {
    let ticker = record.ticker.trim().to_owned();
    if ticker.is_empty() {
        return Err(NormalizeError::EmptyTicker);
    }

    let target_from = price_field(&ticker, "target_from", &record.target_from)?;
    let target_to = price_field(&ticker, "target_to", &record.target_to)?;
    let timestamp = parse_timestamp(&ticker, &record.time)?;

    Ok(RatingEvent {
        ticker,
        company: record.company.trim().to_owned(),
        brokerage: record.brokerage.trim().to_owned(),
        action: record.action.trim().to_owned(),
        rating_from: record.rating_from.trim().to_owned(),
        rating_to: record.rating_to.trim().to_owned(),
        target_from,
        target_to,
        timestamp,
    })
}

/// Parses a currency-formatted price such as `"$1,234.50"`.
///
/// Currency symbols, thousands separators and whitespace are stripped before
/// parsing. Returns `None` for anything that is not then a plain decimal,
/// including the empty string.
#[must_use]
pub fn parse_price(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !CURRENCY_SYMBOLS.contains(c) && *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned).ok()
}

fn price_field(ticker: &str, field: &'static str, raw: &str) -> Result<Decimal, NormalizeError> {
    parse_price(raw).ok_or_else(|| NormalizeError::InvalidPrice {
        ticker: ticker.to_owned(),
        field,
        value: raw.to_owned(),
    })
}

fn parse_timestamp(ticker: &str, raw: &str) -> Result<DateTime<Utc>, NormalizeError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc).trunc_subsecs(TIMESTAMP_DIGITS))
        .map_err(|e| NormalizeError::InvalidTimestamp {
            ticker: ticker.to_owned(),
            value: raw.to_owned(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
#[path = "normalize_test.rs"]
mod tests;
