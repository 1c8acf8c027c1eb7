//! `sync` and `runs` command handlers.

use std::sync::Arc;

use ratingsync_core::AppConfig;
use ratingsync_db::{PgRatingStore, SyncRunCounts, SyncRunRow};
use ratingsync_feed::FeedClient;
use ratingsync_sync::{SyncContext, SyncOrchestrator, SyncResult, SyncSettings};
use tokio_util::sync::CancellationToken;

const TRIGGER_SOURCE: &str = "cli";

/// Runs one synchronization and records it in `sync_runs`.
///
/// Ctrl-C cancels the run: no new batches are dispatched and in-flight
/// batches finish or roll back.
pub(crate) async fn run_sync(
    pool: &sqlx::PgPool,
    config: &AppConfig,
    json: bool,
) -> anyhow::Result<()> {
    let feed = FeedClient::new(
        &config.feed_url,
        config.feed_token.clone(),
        config.feed_request_timeout_secs,
        &config.feed_user_agent,
    )?;
    let store = Arc::new(PgRatingStore::new(pool.clone()));
    let orchestrator = SyncOrchestrator::new(SyncContext {
        feed,
        store,
        settings: SyncSettings::from_app_config(config),
    });

    let run = ratingsync_db::create_sync_run(pool, TRIGGER_SOURCE).await?;
    if let Err(e) = ratingsync_db::start_sync_run(pool, run.id).await {
        fail_run_best_effort(pool, run.id, format!("{e:#}")).await;
        return Err(e.into());
    }
    tracing::info!(run_id = run.id, public_id = %run.public_id, "sync run started");

    let cancel = CancellationToken::new();
    let signal_task = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));
    let outcome = orchestrator.synchronize(&cancel).await;
    signal_task.abort();

    let result = match outcome {
        Ok(result) => result,
        Err(err) => {
            fail_run_best_effort(pool, run.id, format!("{err:#}")).await;
            return Err(err.into());
        }
    };

    if let Err(err) = ratingsync_db::complete_sync_run(pool, run.id, run_counts(&result)).await {
        fail_run_best_effort(pool, run.id, format!("{err:#}")).await;
        return Err(err.into());
    }
    let run = ratingsync_db::get_sync_run(pool, run.id).await?;
    tracing::info!(run_id = run.id, status = %run.status, "sync run recorded");

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_summary(&result));
    }

    Ok(())
}

/// Prints the most recent `limit` sync runs.
pub(crate) async fn list_runs(pool: &sqlx::PgPool, limit: i64) -> anyhow::Result<()> {
    let runs = ratingsync_db::list_sync_runs(pool, limit.max(1)).await?;
    if runs.is_empty() {
        println!("no sync runs recorded");
        return Ok(());
    }
    for run in &runs {
        println!("{}", render_run(run));
    }
    Ok(())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::warn!("interrupt received; cancelling sync");
            cancel.cancel();
        }
        Err(e) => tracing::warn!(error = %e, "failed to listen for ctrl-c"),
    }
}

async fn fail_run_best_effort(pool: &sqlx::PgPool, run_id: i64, message: String) {
    if let Err(mark_err) = ratingsync_db::fail_sync_run(pool, run_id, &message).await {
        tracing::error!(
            run_id,
            error = %mark_err,
            "failed to mark sync run as failed"
        );
    }
}

fn clamp_i32(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn run_counts(result: &SyncResult) -> SyncRunCounts {
    SyncRunCounts {
        records_fetched: clamp_i32(result.total_processed),
        events_written: clamp_i32(result.total_inserted),
        events_failed: clamp_i32(result.failed_inserts),
    }
}

fn render_summary(result: &SyncResult) -> String {
    let mut out = format!(
        "processed {} records ({} skipped)\n\
         wrote {} events ({} new, {} updated), {} unchanged\n\
         failed {}, cancelled {}\n\
         {} unique tickers, {} duplicated\n\
         took {} ms\n",
        result.total_processed,
        result.skipped_invalid,
        result.total_inserted,
        result.new_events,
        result.updated_events,
        result.unchanged_events,
        result.failed_inserts,
        result.cancelled_events,
        result.unique_tickers_api,
        result.duplicate_tickers,
        result.timings.total_ms,
    );
    for (key, reason) in &result.failed_insert_details {
        out.push_str(&format!("  failed {key}: {reason}\n"));
    }
    out
}

fn render_run(run: &SyncRunRow) -> String {
    let mut line = format!(
        "#{} {} {} fetched={} written={} failed={}",
        run.id,
        run.created_at.to_rfc3339(),
        run.status,
        run.records_fetched,
        run.events_written,
        run.events_failed,
    );
    if let Some(message) = &run.error_message {
        line.push_str(&format!(" error={message}"));
    }
    line
}
