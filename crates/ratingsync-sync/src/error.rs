use ratingsync_feed::FeedError;
use thiserror::Error;

/// Errors that abort a synchronization run.
///
/// Per-batch store failures do not appear here; they are reported in
/// [`crate::SyncResult::failed_insert_details`].
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("feed collection failed: {0}")]
    Collection(#[from] FeedError),

    #[error("failed to load existing events: {0}")]
    ExistingEvents(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("a synchronization is already running")]
    AlreadyRunning,
}
