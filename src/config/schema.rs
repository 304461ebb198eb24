//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the balancer.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the load balancer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, drain timeout).
    pub listener: ListenerConfig,

    /// Upstream backends, in selection order.
    pub backends: Vec<BackendConfig>,

    /// Selection strategy and health checking.
    pub balancer: BalancerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// How long in-flight requests may drain after a shutdown signal.
    pub shutdown_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            shutdown_timeout_secs: 7,
        }
    }
}

/// Backend server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Base address of the backend (e.g., "http://127.0.0.1:3000").
    pub url: String,

    /// Optional label used in logs and metrics. Defaults to the URL.
    #[serde(default)]
    pub name: Option<String>,
}

impl BackendConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: None,
        }
    }
}

/// Load balancer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Selection algorithm identifier.
    pub algorithm: String,

    /// Health check interval in milliseconds.
    pub health_check_interval_ms: u64,

    /// Per-probe timeout in milliseconds.
    pub health_check_timeout_ms: u64,

    /// Path probed on every backend.
    pub health_check_path: String,
}

impl BalancerConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            algorithm: "round_robin".to_string(),
            health_check_interval_ms: 1000,
            health_check_timeout_ms: 2000,
            health_check_path: "/ping".to_string(),
        }
    }
}

/// Timeout configuration for upstream calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Time allowed for the backend to produce response headers, in milliseconds.
    pub upstream_ms: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn upstream(&self) -> Duration {
        Duration::from_millis(self.upstream_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 1000,
            upstream_ms: 30_000,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Limiter algorithm identifier.
    pub algorithm: String,

    /// Maximum tokens per client.
    pub capacity: u32,

    /// Time between single-token refills, in milliseconds.
    pub refill_interval_ms: Option<u64>,

    /// Time to refill a whole bucket, in milliseconds. Used when
    /// `refill_interval_ms` is absent.
    pub refill_period_ms: Option<u64>,

    /// Evict clients unseen for this long. 0 keeps every client forever.
    pub client_idle_ttl_secs: u64,
}

impl RateLimitConfig {
    /// Interval between token additions.
    pub fn refill_interval(&self) -> Duration {
        match (self.refill_interval_ms, self.refill_period_ms) {
            (Some(ms), _) => Duration::from_millis(ms),
            (None, Some(period)) => {
                Duration::from_millis(period) / self.capacity.max(1)
            }
            (None, None) => Duration::from_millis(DEFAULT_REFILL_INTERVAL_MS),
        }
    }

    pub fn client_idle_ttl(&self) -> Option<Duration> {
        (self.client_idle_ttl_secs > 0).then(|| Duration::from_secs(self.client_idle_ttl_secs))
    }
}

const DEFAULT_REFILL_INTERVAL_MS: u64 = 100;

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: "token_bucket".to_string(),
            capacity: 100,
            refill_interval_ms: None,
            refill_period_ms: None,
            client_idle_ttl_secs: 0,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
