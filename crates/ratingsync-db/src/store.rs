//! Postgres-backed [`RatingStore`].

use chrono::{DateTime, Utc};
use ratingsync_core::{RatingEvent, RatingStore};
use sqlx::PgPool;

use crate::rating_events::{list_events_since, upsert_rating_events};
use crate::DbError;

/// [`RatingStore`] over the `rating_events` table.
///
/// Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct PgRatingStore {
    pool: PgPool,
}

impl PgRatingStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl RatingStore for PgRatingStore {
    type Error = DbError;

    async fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<RatingEvent>, DbError> {
        let rows = list_events_since(&self.pool, since).await?;
        Ok(rows.into_iter().map(RatingEvent::from).collect())
    }

    async fn batch_upsert(&self, events: &[RatingEvent]) -> Result<u64, DbError> {
        let (inserted, updated) = upsert_rating_events(&self.pool, events).await?;
        tracing::debug!(inserted, updated, "rating batch committed");
        Ok(inserted + updated)
    }
}
