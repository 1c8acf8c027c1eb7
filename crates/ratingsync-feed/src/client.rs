//! HTTP client for the paginated rating feed.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Url};

use crate::error::FeedError;
use crate::types::{FeedPage, FeedResponse};

/// Query parameter carrying the page cursor.
const CURSOR_PARAM: &str = "next_page";

/// Source of feed pages.
///
/// [`FeedClient`] is the HTTP implementation; the collector and the sync
/// pipeline only depend on this trait.
pub trait FeedSource: Send + Sync {
    /// Fetches the page addressed by `cursor`, or the first page when `None`.
    fn fetch_page(
        &self,
        cursor: Option<&str>,
    ) -> impl Future<Output = Result<FeedPage, FeedError>> + Send;
}

/// HTTP client for the rating feed.
///
/// Performs exactly one request per [`FeedSource::fetch_page`] call. Retry
/// policy belongs to the caller (see [`crate::collector`]).
pub struct FeedClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl std::fmt::Debug for FeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedClient")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "[redacted]"))
            .finish_non_exhaustive()
    }
}

impl FeedClient {
    /// Creates a `FeedClient` with configured timeout and `User-Agent`.
    ///
    /// `token`, when present, is sent as `Authorization: Bearer <token>`.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::InvalidBaseUrl`] if `base_url` does not parse, or
    /// [`FeedError::Http`] if the underlying `reqwest::Client` cannot be
    /// constructed.
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout_secs: u64,
        user_agent: &str,
    ) -> Result<Self, FeedError> {
        let base_url = Url::parse(base_url).map_err(|e| FeedError::InvalidBaseUrl {
            url: base_url.to_owned(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(FeedError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: "URL cannot be used as a base".to_owned(),
            });
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            client,
            base_url,
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    /// Builds the request URL for `cursor`.
    ///
    /// Query parameters already present on the base URL are preserved.
    fn page_url(&self, cursor: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Some(cursor) = cursor {
            url.query_pairs_mut().append_pair(CURSOR_PARAM, cursor);
        }
        url
    }

    async fn get_page(&self, cursor: Option<&str>) -> Result<FeedPage, FeedError> {
        let url = self.page_url(cursor);

        let mut request = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.text().await?;
        let parsed = serde_json::from_str::<FeedResponse>(&body).map_err(|e| {
            FeedError::Deserialize {
                context: format!(
                    "feed page (cursor: {})",
                    cursor.unwrap_or("<first>")
                ),
                source: e,
            }
        })?;

        Ok(FeedPage::from(parsed))
    }
}

impl FeedSource for FeedClient {
    fn fetch_page(
        &self,
        cursor: Option<&str>,
    ) -> impl Future<Output = Result<FeedPage, FeedError>> + Send {
        self.get_page(cursor)
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
