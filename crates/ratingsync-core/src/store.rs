//! Narrow contract the sync pipeline needs from the persisted event store.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::events::RatingEvent;

/// Persisted store of [`RatingEvent`]s keyed by `(ticker, timestamp)`.
///
/// Implemented by `ratingsync_db::PgRatingStore` in production and by
/// in-memory fakes in tests.
pub trait RatingStore: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns every persisted event with `timestamp >= since`.
    fn events_since(
        &self,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<RatingEvent>, Self::Error>> + Send;

    /// Inserts `events`, updating every mutable column on a key conflict.
    ///
    /// The call is all-or-nothing: on error no row of `events` is written.
    /// Returns the number of rows affected.
    fn batch_upsert(
        &self,
        events: &[RatingEvent],
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send;
}
