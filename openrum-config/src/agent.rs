use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Bounds for the in-memory beacon cache.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Total cache size above which space eviction starts, in bytes.
    pub upper_memory_boundary: usize,
    /// Total cache size space eviction shrinks the cache to, in bytes.
    pub lower_memory_boundary: usize,
    /// Age above which records are evicted.
    pub record_age_limit: Duration,
    /// Interval between eviction passes.
    pub record_age_check_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            upper_memory_boundary: 100 * 1024 * 1024,
            lower_memory_boundary: 80 * 1024 * 1024,
            record_age_limit: Duration::from_secs(105 * 60),
            record_age_check_interval: Duration::from_millis(2_000),
        }
    }
}

/// Cadence and shutdown bounds of the background worker.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Lower bound for the worker cadence.
    ///
    /// The worker never sleeps longer than this between ticks, regardless of
    /// the server-configured send interval, so split deadlines are observed
    /// promptly.
    pub tick_interval: Duration,
    /// How long shutdown waits for the worker to drain before detaching.
    pub shutdown_timeout: Duration,
    /// Upper bound for the backoff between initial new-session attempts.
    pub status_retry_max_interval: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(2_000),
            shutdown_timeout: Duration::from_secs(10),
            status_retry_max_interval: Duration::from_secs(30),
        }
    }
}

/// Parameters for constructing HTTP clients towards the collector.
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    /// The beacon endpoint.
    pub base_url: Url,
    /// The application id, sent with every request.
    pub application_id: String,
    /// The server id addressed by the request.
    pub server_id: i32,
    /// Total timeout per HTTP exchange.
    pub timeout: Duration,
}

impl HttpClientConfig {
    /// Creates a client configuration for the given endpoint and application.
    pub fn new(base_url: Url, application_id: impl Into<String>, server_id: i32) -> Self {
        Self {
            base_url,
            application_id: application_id.into(),
            server_id,
            timeout: Duration::from_secs(30),
        }
    }

    /// Returns a copy addressing a different server id.
    pub fn for_server(&self, server_id: i32) -> Self {
        Self {
            server_id,
            ..self.clone()
        }
    }
}
