use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub log_level: String,
    pub feed_url: String,
    pub feed_token: Option<String>,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub feed_request_timeout_secs: u64,
    pub feed_user_agent: String,
    pub feed_max_retries: u32,
    pub feed_retry_backoff_base_ms: u64,
    pub feed_max_pages: usize,
    pub sync_lookback_days: u32,
    pub sync_batch_size: usize,
    pub sync_worker_count: usize,
    /// `0` disables the per-batch deadline.
    pub sync_batch_timeout_secs: u64,
    /// `None` disables the failed-insert audit file.
    pub audit_log_path: Option<PathBuf>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("database_url", &"[redacted]")
            .field("feed_url", &self.feed_url)
            .field("feed_token", &self.feed_token.as_ref().map(|_| "[redacted]"))
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("feed_request_timeout_secs", &self.feed_request_timeout_secs)
            .field("feed_user_agent", &self.feed_user_agent)
            .field("feed_max_retries", &self.feed_max_retries)
            .field(
                "feed_retry_backoff_base_ms",
                &self.feed_retry_backoff_base_ms,
            )
            .field("feed_max_pages", &self.feed_max_pages)
            .field("sync_lookback_days", &self.sync_lookback_days)
            .field("sync_batch_size", &self.sync_batch_size)
            .field("sync_worker_count", &self.sync_worker_count)
            .field("sync_batch_timeout_secs", &self.sync_batch_timeout_secs)
            .field("audit_log_path", &self.audit_log_path)
            .finish()
    }
}
