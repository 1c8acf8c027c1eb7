//! The synchronization state machine.
//!
//! ```text
//! Idle -> Collecting -> Diffing -> Upserting -> Done
//!              |            |
//!              +-> Failed <-+
//! ```
//!
//! A feed failure or a failed range query ends the run in `Failed` before
//! anything is written. Batch failures do not: the run reaches `Done` and
//! reports them in [`SyncResult`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use ratingsync_core::{AppConfig, ChangeKind, RatingStore};
use ratingsync_feed::{collect_all, CollectOptions, FeedSource};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::audit::{append_failure_audit, log_summary};
use crate::changes::ChangeDetector;
use crate::error::SyncError;
use crate::result::{SyncResult, SyncTimings};
use crate::upsert::{UpsertCoordinator, UpsertSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    Idle,
    Collecting,
    Diffing,
    Upserting,
    Done,
    Failed,
}

impl SyncState {
    /// Returns `true` if the machine may move from `self` to `next`.
    ///
    /// Terminal states return to `Idle` when the next run starts.
    #[must_use]
    pub fn can_transition_to(self, next: SyncState) -> bool {
        matches!(
            (self, next),
            (SyncState::Idle, SyncState::Collecting)
                | (SyncState::Collecting, SyncState::Diffing | SyncState::Failed)
                | (SyncState::Diffing, SyncState::Upserting | SyncState::Failed)
                | (SyncState::Upserting, SyncState::Done)
                | (SyncState::Done | SyncState::Failed, SyncState::Idle)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SyncState::Done | SyncState::Failed)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::Collecting => "collecting",
            SyncState::Diffing => "diffing",
            SyncState::Upserting => "upserting",
            SyncState::Done => "done",
            SyncState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tunables for one orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub collect: CollectOptions,
    pub lookback_days: u32,
    pub upsert: UpsertSettings,
    /// `None` disables the failed-insert audit file.
    pub audit_log_path: Option<PathBuf>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            collect: CollectOptions::default(),
            lookback_days: 30,
            upsert: UpsertSettings::default(),
            audit_log_path: None,
        }
    }
}

impl SyncSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            collect: CollectOptions {
                max_pages: config.feed_max_pages,
                max_retries: config.feed_max_retries,
                backoff_base_ms: config.feed_retry_backoff_base_ms,
            },
            lookback_days: config.sync_lookback_days,
            upsert: UpsertSettings {
                batch_size: config.sync_batch_size,
                worker_count: config.sync_worker_count,
                batch_timeout: (config.sync_batch_timeout_secs > 0)
                    .then(|| Duration::from_secs(config.sync_batch_timeout_secs)),
            },
            audit_log_path: config.audit_log_path.clone(),
        }
    }
}

/// Everything a run needs. There is no process-global state.
pub struct SyncContext<F, S> {
    pub feed: F,
    pub store: Arc<S>,
    pub settings: SyncSettings,
}

/// Drives one feed-to-store synchronization at a time.
pub struct SyncOrchestrator<F, S> {
    ctx: SyncContext<F, S>,
    state: watch::Sender<SyncState>,
    run_lock: Mutex<()>,
}

impl<F: FeedSource, S: RatingStore> SyncOrchestrator<F, S> {
    #[must_use]
    pub fn new(ctx: SyncContext<F, S>) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            ctx,
            state,
            run_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Receives every state change from now on.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    fn transition(&self, next: SyncState) {
        let current = self.state();
        if !current.can_transition_to(next) {
            tracing::warn!(from = %current, to = %next, "unexpected sync state transition");
        }
        tracing::debug!(from = %current, to = %next, "sync state");
        self.state.send_replace(next);
    }

    /// Runs one synchronization: collect, diff, upsert, report.
    ///
    /// Cancelling `cancel` during collection fails the run; during upsert it
    /// stops dispatching new batches and the run completes with the
    /// undispatched events counted in [`SyncResult::cancelled_events`].
    ///
    /// # Errors
    ///
    /// - [`SyncError::AlreadyRunning`] if another call is in progress.
    /// - [`SyncError::Collection`] if the feed cannot be drained.
    /// - [`SyncError::ExistingEvents`] if the comparison window cannot be
    ///   loaded from the store.
    pub async fn synchronize(&self, cancel: &CancellationToken) -> Result<SyncResult, SyncError> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            return Err(SyncError::AlreadyRunning);
        };

        let started = Instant::now();
        if self.state().is_terminal() {
            self.transition(SyncState::Idle);
        }
        self.transition(SyncState::Collecting);

        let collection = match collect_all(&self.ctx.feed, &self.ctx.settings.collect, cancel).await
        {
            Ok(collection) => collection,
            Err(e) => {
                tracing::error!(error = %e, "feed collection failed");
                self.transition(SyncState::Failed);
                return Err(SyncError::Collection(e));
            }
        };
        let collect_ms = elapsed_ms(started);

        self.transition(SyncState::Diffing);
        let diff_started = Instant::now();
        let detector = ChangeDetector::new(self.ctx.settings.lookback_days);
        let changes = match detector
            .load_and_detect(self.ctx.store.as_ref(), collection.events, Utc::now())
            .await
        {
            Ok(changes) => changes,
            Err(e) => {
                tracing::error!(error = %e, "failed to load existing events");
                self.transition(SyncState::Failed);
                return Err(SyncError::ExistingEvents(Box::new(e)));
            }
        };
        let diff_ms = elapsed_ms(diff_started);

        self.transition(SyncState::Upserting);
        let upsert_started = Instant::now();
        let report = if changes.write_set.is_empty() {
            tracing::info!("no new or changed events; nothing to write");
            crate::batch::BatchReport::default()
        } else {
            let coordinator =
                UpsertCoordinator::new(Arc::clone(&self.ctx.store), self.ctx.settings.upsert);
            coordinator.upsert(changes.write_set, cancel).await
        };
        let upsert_ms = elapsed_ms(upsert_started);

        let (mut new_events, mut updated_events) = (0usize, 0usize);
        for key in &report.committed {
            match changes.kinds.get(key) {
                Some(ChangeKind::New) => new_events += 1,
                Some(ChangeKind::Changed) => updated_events += 1,
                None => {}
            }
        }

        let result = SyncResult {
            total_processed: collection.raw_records,
            skipped_invalid: collection.skipped_invalid,
            total_inserted: report.committed_count(),
            new_events,
            updated_events,
            unchanged_events: changes.unchanged_count,
            failed_inserts: report.failed_items,
            cancelled_events: report.cancelled_items,
            unique_tickers_api: collection.duplicates.unique_tickers,
            duplicate_tickers: collection.duplicates.duplicate_count,
            duplicates_list: collection.duplicates.duplicates,
            failed_insert_details: report.failures.into_iter().collect::<BTreeMap<_, _>>(),
            timings: SyncTimings {
                collect_ms,
                diff_ms,
                upsert_ms,
                total_ms: elapsed_ms(started),
            },
        };

        self.transition(SyncState::Done);

        if let Some(path) = &self.ctx.settings.audit_log_path {
            if let Err(e) = append_failure_audit(path, &result, Utc::now()).await {
                tracing::warn!(path = %path.display(), error = %e, "failed to write audit log");
            }
        }
        log_summary(&result);

        Ok(result)
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
