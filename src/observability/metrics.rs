//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, backend
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_backend_active_connections` (gauge): in-flight requests per backend
//! - `proxy_backend_health` (gauge): 1=alive, 0=dead
//! - `proxy_alive_backends` (gauge): size of the alive subset
//! - `proxy_rate_limited_total` (counter): denied requests by reason
//! - `proxy_rate_limit_clients` (gauge): clients with a limiter
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "backend" => backend.to_string()
    )
    .increment(1);
    histogram!(
        "proxy_request_duration_seconds",
        "method" => method.to_string(),
        "backend" => backend.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_backend_health(backend: &str, alive: bool) {
    gauge!("proxy_backend_health", "backend" => backend.to_string()).set(if alive { 1.0 } else { 0.0 });
}

pub fn record_alive_backends(count: usize) {
    gauge!("proxy_alive_backends").set(count as f64);
}

pub fn record_active_connections(backend: &str, count: usize) {
    gauge!("proxy_backend_active_connections", "backend" => backend.to_string()).set(count as f64);
}

pub fn record_rate_limited(reason: &'static str) {
    counter!("proxy_rate_limited_total", "reason" => reason).increment(1);
}

pub fn record_rate_limit_clients(count: usize) {
    gauge!("proxy_rate_limit_clients").set(count as f64);
}
