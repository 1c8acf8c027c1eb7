//! Analyst rating events and their natural key.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One analyst action on a ticker at a point in time.
///
/// `(ticker, timestamp)` is the natural key; see [`EventKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingEvent {
    pub ticker: String,
    pub company: String,
    pub brokerage: String,
    pub action: String,
    pub rating_from: String,
    pub rating_to: String,
    pub target_from: Decimal,
    pub target_to: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl RatingEvent {
    #[must_use]
    pub fn key(&self) -> EventKey {
        EventKey {
            ticker: self.ticker.clone(),
            timestamp: self.timestamp,
        }
    }

    /// Returns `true` when any value field that a re-sync may correct differs
    /// from `other`.
    ///
    /// Prices compare numerically, so `7.0` and `7.00` are equal.
    #[must_use]
    pub fn has_material_change(&self, other: &RatingEvent) -> bool {
        self.target_from != other.target_from
            || self.target_to != other.target_to
            || self.action != other.action
            || self.brokerage != other.brokerage
            || self.rating_from != other.rating_from
            || self.rating_to != other.rating_to
            || self.company != other.company
    }
}

/// Natural key of a [`RatingEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}",
            self.ticker,
            self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
        )
    }
}

/// Classification of an incoming event against persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// No persisted event shares the key.
    New,
    /// A persisted event shares the key but differs in a value field.
    Changed,
}
