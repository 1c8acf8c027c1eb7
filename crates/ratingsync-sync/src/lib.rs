//! Change detection, bounded concurrent upserts and the sync state machine.

pub mod audit;
pub mod batch;
pub mod changes;
pub mod error;
pub mod orchestrator;
pub mod result;
pub mod upsert;

pub use batch::{
    partition, run_batches, BatchItem, BatchReport, ExecutorOptions, MAX_TIMEOUT_GRACE,
};
pub use changes::{detect_changes, ChangeDetector, ChangeSet};
pub use error::SyncError;
pub use orchestrator::{SyncContext, SyncOrchestrator, SyncSettings, SyncState};
pub use result::{SyncResult, SyncTimings};
pub use upsert::{UpsertCoordinator, UpsertSettings};
