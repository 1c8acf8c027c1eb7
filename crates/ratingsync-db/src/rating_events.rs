//! Database operations for the `rating_events` table.

use chrono::{DateTime, Utc};
use ratingsync_core::RatingEvent;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use crate::DbError;

/// A row from the `rating_events` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RatingEventRow {
    pub ticker: String,
    pub event_time: DateTime<Utc>,
    pub company: String,
    pub brokerage: String,
    pub action: String,
    pub rating_from: String,
    pub rating_to: String,
    pub target_from: Decimal,
    pub target_to: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<RatingEventRow> for RatingEvent {
    fn from(row: RatingEventRow) -> Self {
        Self {
            ticker: row.ticker,
            company: row.company,
            brokerage: row.brokerage,
            action: row.action,
            rating_from: row.rating_from,
            rating_to: row.rating_to,
            target_from: row.target_from,
            target_to: row.target_to,
            timestamp: row.event_time,
        }
    }
}

/// Returns every event with `event_time >= since`, oldest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_events_since(
    pool: &PgPool,
    since: DateTime<Utc>,
) -> Result<Vec<RatingEventRow>, DbError> {
    let rows = sqlx::query_as::<_, RatingEventRow>(
        "SELECT ticker, event_time, company, brokerage, action, rating_from, rating_to, \
                target_from, target_to, created_at, updated_at \
         FROM rating_events \
         WHERE event_time >= $1 \
         ORDER BY event_time, ticker",
    )
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns the total number of persisted rating events.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn count_rating_events(pool: &PgPool) -> Result<i64, DbError> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM rating_events")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Upserts `events` inside the caller's transaction.
///
/// Returns `(inserted, updated)`. Uses a single
/// `INSERT … SELECT * FROM UNNEST(…) ON CONFLICT` so the whole batch is one
/// round-trip. Every mutable column is overwritten on a key conflict.
///
/// `events` must not repeat a `(ticker, timestamp)` key: Postgres rejects an
/// `ON CONFLICT DO UPDATE` that touches the same row twice.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the statement fails.
pub async fn upsert_rating_events_tx(
    tx: &mut Transaction<'_, Postgres>,
    events: &[RatingEvent],
) -> Result<(u64, u64), DbError> {
    if events.is_empty() {
        return Ok((0, 0));
    }

    let mut tickers: Vec<String> = Vec::with_capacity(events.len());
    let mut event_times: Vec<DateTime<Utc>> = Vec::with_capacity(events.len());
    let mut companies: Vec<String> = Vec::with_capacity(events.len());
    let mut brokerages: Vec<String> = Vec::with_capacity(events.len());
    let mut actions: Vec<String> = Vec::with_capacity(events.len());
    let mut ratings_from: Vec<String> = Vec::with_capacity(events.len());
    let mut ratings_to: Vec<String> = Vec::with_capacity(events.len());
    let mut targets_from: Vec<Decimal> = Vec::with_capacity(events.len());
    let mut targets_to: Vec<Decimal> = Vec::with_capacity(events.len());

    for event in events {
        tickers.push(event.ticker.clone());
        event_times.push(event.timestamp);
        companies.push(event.company.clone());
        brokerages.push(event.brokerage.clone());
        actions.push(event.action.clone());
        ratings_from.push(event.rating_from.clone());
        ratings_to.push(event.rating_to.clone());
        targets_from.push(event.target_from);
        targets_to.push(event.target_to);
    }

    let rows: Vec<bool> = sqlx::query_scalar::<_, bool>(
        "INSERT INTO rating_events \
             (ticker, event_time, company, brokerage, action, rating_from, rating_to, \
              target_from, target_to) \
         SELECT * FROM UNNEST(\
              $1::text[], $2::timestamptz[], $3::text[], $4::text[], $5::text[], \
              $6::text[], $7::text[], $8::numeric[], $9::numeric[]) \
         ON CONFLICT (ticker, event_time) DO UPDATE SET \
             company     = EXCLUDED.company, \
             brokerage   = EXCLUDED.brokerage, \
             action      = EXCLUDED.action, \
             rating_from = EXCLUDED.rating_from, \
             rating_to   = EXCLUDED.rating_to, \
             target_from = EXCLUDED.target_from, \
             target_to   = EXCLUDED.target_to, \
             updated_at  = NOW() \
         RETURNING (xmax = 0) AS is_new",
    )
    .bind(&tickers)
    .bind(&event_times)
    .bind(&companies)
    .bind(&brokerages)
    .bind(&actions)
    .bind(&ratings_from)
    .bind(&ratings_to)
    .bind(&targets_from)
    .bind(&targets_to)
    .fetch_all(&mut **tx)
    .await?;

    let inserted = rows.iter().filter(|&&is_new| is_new).count() as u64;
    let updated = rows.len() as u64 - inserted;

    Ok((inserted, updated))
}

/// Upserts `events` in a transaction of their own.
///
/// All-or-nothing: on error the transaction is rolled back and no row of
/// `events` is written. Returns `(inserted, updated)`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the transaction cannot begin, the statement
/// fails, or the commit fails.
pub async fn upsert_rating_events(
    pool: &PgPool,
    events: &[RatingEvent],
) -> Result<(u64, u64), DbError> {
    if events.is_empty() {
        return Ok((0, 0));
    }

    let mut tx = pool.begin().await?;
    let counts = upsert_rating_events_tx(&mut tx, events).await?;
    tx.commit().await?;
    Ok(counts)
}
