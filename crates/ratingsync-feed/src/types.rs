//! Wire types for the rating feed.
//!
//! ## Observed payload
//!
//! ```json
//! {
//!   "items": [{
//!     "ticker": "RMTI",
//!     "target_from": "$7.00",
//!     "target_to": "$3.00",
//!     "company": "Rockwell Medical",
//!     "action": "target lowered by",
//!     "brokerage": "HC Wainwright",
//!     "rating_from": "Buy",
//!     "rating_to": "Buy",
//!     "time": "2025-03-25T00:30:06.00066843Z"
//!   }],
//!   "next_page": "RMTI"
//! }
//! ```
//!
//! Prices arrive as currency-formatted strings and `time` carries nanosecond
//! precision. Both are kept as raw strings here; conversion happens in
//! [`crate::normalize`]. The last page sends `"next_page": ""`.

use serde::Deserialize;

/// Top-level response of one feed page.
#[derive(Debug, Deserialize)]
pub struct FeedResponse {
    #[serde(default)]
    pub items: Vec<FeedRecord>,
    #[serde(default)]
    pub next_page: Option<String>,
}

/// One raw rating record as sent by the feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FeedRecord {
    pub ticker: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub target_from: String,
    #[serde(default)]
    pub target_to: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub brokerage: String,
    #[serde(default)]
    pub rating_from: String,
    #[serde(default)]
    pub rating_to: String,
    #[serde(default)]
    pub time: String,
}

/// One page of records plus the cursor for the next page.
///
/// `next_cursor` is `None` on the last page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedPage {
    pub records: Vec<FeedRecord>,
    pub next_cursor: Option<String>,
}

impl From<FeedResponse> for FeedPage {
    fn from(response: FeedResponse) -> Self {
        Self {
            records: response.items,
            next_cursor: response.next_page.filter(|c| !c.trim().is_empty()),
        }
    }
}
