pub mod client;
pub mod collector;
pub mod error;
pub mod normalize;
pub mod retry;
pub mod types;

pub use client::{FeedClient, FeedSource};
pub use collector::{collect_all, CollectOptions, Collection, DuplicateReport, TickerDuplicate};
pub use error::{FeedError, NormalizeError};
pub use normalize::{normalize_record, parse_price};
pub use types::{FeedPage, FeedRecord, FeedResponse};
