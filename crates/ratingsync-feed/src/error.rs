use thiserror::Error;

/// Errors raised while reading the rating feed.
///
/// `Http` and `UnexpectedStatus` are transport failures; `Deserialize` is a
/// decode failure of an otherwise successful response.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid feed URL \"{url}\": {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("pagination limit reached: exceeded {max_pages} pages")]
    PaginationLimit { max_pages: usize },

    #[error("feed collection cancelled after {pages} pages")]
    Cancelled { pages: usize },
}

impl FeedError {
    /// Network, timeout, and non-success status failures.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, FeedError::Http(_) | FeedError::UnexpectedStatus { .. })
    }

    /// Malformed response payloads.
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(self, FeedError::Deserialize { .. })
    }
}

/// A feed record that cannot become a [`ratingsync_core::RatingEvent`].
///
/// Recoverable: the collector drops the record and continues.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("record has an empty ticker")]
    EmptyTicker,

    #[error("invalid {field} for {ticker}: {value:?}")]
    InvalidPrice {
        ticker: String,
        field: &'static str,
        value: String,
    },

    #[error("invalid timestamp for {ticker}: {value:?} ({reason})")]
    InvalidTimestamp {
        ticker: String,
        value: String,
        reason: String,
    },
}
