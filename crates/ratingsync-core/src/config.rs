use std::path::PathBuf;

use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Upper bound for `RATINGSYNC_SYNC_LOOKBACK_DAYS` (about a century).
pub const MAX_LOOKBACK_DAYS: u32 = 36_500;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files — useful for testing
/// or when the caller manages env setup.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// The parsing/validation logic is decoupled from the process environment so
/// it can be tested with a plain `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u32>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<usize>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };

    let parse_positive = |var: &str, default: &str| -> Result<usize, ConfigError> {
        let value = parse_usize(var, default)?;
        if value == 0 {
            return Err(ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(value)
    };

    let database_url = require("DATABASE_URL")?;
    let feed_url = require("RATINGSYNC_FEED_URL")?;
    let feed_token = lookup("RATINGSYNC_FEED_TOKEN")
        .ok()
        .filter(|t| !t.trim().is_empty());

    let env = parse_environment(&or_default("RATINGSYNC_ENV", "development"));
    let log_level = or_default("RATINGSYNC_LOG_LEVEL", "info");

    let db_max_connections = parse_u32("RATINGSYNC_DB_MAX_CONNECTIONS", "20")?;
    let db_min_connections = parse_u32("RATINGSYNC_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("RATINGSYNC_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let feed_request_timeout_secs = parse_u64("RATINGSYNC_FEED_REQUEST_TIMEOUT_SECS", "10")?;
    let feed_user_agent = or_default("RATINGSYNC_FEED_USER_AGENT", "ratingsync/0.1 (rating-sync)");
    let feed_max_retries = parse_u32("RATINGSYNC_FEED_MAX_RETRIES", "2")?;
    let feed_retry_backoff_base_ms = parse_u64("RATINGSYNC_FEED_RETRY_BACKOFF_BASE_MS", "500")?;
    let feed_max_pages = parse_positive("RATINGSYNC_FEED_MAX_PAGES", "500")?;

    let sync_lookback_days = parse_u32("RATINGSYNC_SYNC_LOOKBACK_DAYS", "30")?;
    if sync_lookback_days > MAX_LOOKBACK_DAYS {
        return Err(ConfigError::InvalidEnvVar {
            var: "RATINGSYNC_SYNC_LOOKBACK_DAYS".to_string(),
            reason: format!("must be at most {MAX_LOOKBACK_DAYS}"),
        });
    }
    let sync_batch_size = parse_positive("RATINGSYNC_SYNC_BATCH_SIZE", "100")?;
    let sync_worker_count = parse_positive("RATINGSYNC_SYNC_WORKER_COUNT", "10")?;
    let sync_batch_timeout_secs = parse_u64("RATINGSYNC_SYNC_BATCH_TIMEOUT_SECS", "60")?;

    let audit_log_path = Some(or_default("RATINGSYNC_AUDIT_LOG_PATH", "failed_inserts.log"))
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from);

    Ok(AppConfig {
        database_url,
        env,
        log_level,
        feed_url,
        feed_token,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        feed_request_timeout_secs,
        feed_user_agent,
        feed_max_retries,
        feed_retry_backoff_base_ms,
        feed_max_pages,
        sync_lookback_days,
        sync_batch_size,
        sync_worker_count,
        sync_batch_timeout_secs,
        audit_log_path,
    })
}

/// Parse a string into an `Environment` variant.
///
/// Unrecognized values default to `Environment::Development`.
fn parse_environment(s: &str) -> Environment {
    match s {
        "production" => Environment::Production,
        "test" => Environment::Test,
        _ => Environment::Development,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
