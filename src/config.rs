//! Telemetry sink configuration loaded from environment variables.
//!
//! Missing or invalid values fall back to defaults without failing.
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `WXBUS_COLLECTOR_URL` | `http://127.0.0.1:7070` | Collector base URL |
//! | `WXBUS_FLUSH_DELAY_MS` | 300 | Debounce window before a flush (ms) |
//! | `WXBUS_REQUEST_TIMEOUT_MS` | 5000 | Upper bound on any collector request (ms) |
//! | `WXBUS_MAX_PENDING` | 10000 | Records held before new ones are dropped |

use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_COLLECTOR_URL: &str = "http://127.0.0.1:7070";
pub const DEFAULT_FLUSH_DELAY_MS: u64 = 300;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_MAX_PENDING: usize = 10_000;

const MIN_FLUSH_DELAY_MS: u64 = 1;
const MIN_REQUEST_TIMEOUT_MS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unsupported collector URL {0}: only http:// is supported")]
    UnsupportedScheme(String),
    #[error("invalid collector URL {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    pub base_url: String,
    pub flush_delay: Duration,
    pub request_timeout: Duration,
    pub max_pending: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_COLLECTOR_URL.to_string(),
            flush_delay: Duration::from_millis(DEFAULT_FLUSH_DELAY_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

impl SinkConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_flush_delay(mut self, flush_delay: Duration) -> Self {
        self.flush_delay = flush_delay.max(Duration::from_millis(MIN_FLUSH_DELAY_MS));
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout.max(Duration::from_millis(MIN_REQUEST_TIMEOUT_MS));
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(1);
        self
    }

    /// Load from `WXBUS_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = lookup("WXBUS_COLLECTOR_URL")
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_COLLECTOR_URL.to_string());
        let flush_ms = parse_u64(&lookup, "WXBUS_FLUSH_DELAY_MS", DEFAULT_FLUSH_DELAY_MS);
        let timeout_ms = parse_u64(&lookup, "WXBUS_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS);
        let max_pending = parse_usize(&lookup, "WXBUS_MAX_PENDING", DEFAULT_MAX_PENDING);

        Self {
            base_url,
            flush_delay: Duration::from_millis(flush_ms.max(MIN_FLUSH_DELAY_MS)),
            request_timeout: Duration::from_millis(timeout_ms.max(MIN_REQUEST_TIMEOUT_MS)),
            max_pending: max_pending.max(1),
        }
    }
}

/// Parse a `u64` value, returning `default` on missing or invalid.
fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    match lookup(key) {
        Some(val) => val.trim().parse::<u64>().unwrap_or(default),
        None => default,
    }
}

/// Parse a `usize` value, returning `default` on missing or invalid.
fn parse_usize(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    match lookup(key) {
        Some(val) => val.trim().parse::<usize>().unwrap_or(default),
        None => default,
    }
}
