//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream server
//! - Track active connections (for Least Connections LB)
//! - Track liveness (ALIVE/DEAD), written by probes and fast failover

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use url::Url;

use crate::health::state::HealthState;
use crate::observability::metrics;

/// A single backend server.
///
/// The address is immutable; liveness and load are independent atomics so
/// request tasks and the health monitor never block each other.
#[derive(Debug)]
pub struct Backend {
    /// Base URL requests are forwarded to.
    url: Url,
    /// Configured address, without trailing slash. Used as identity.
    address: String,
    /// Label for logs and metrics.
    name: String,
    /// Number of requests currently in flight.
    active_connections: AtomicUsize,
    /// Dead until the first probe says otherwise.
    alive: AtomicBool,
}

impl Backend {
    /// Create a new backend in the DEAD state.
    pub fn new(url: Url, name: Option<String>) -> Self {
        let address = url.as_str().trim_end_matches('/').to_string();
        Self {
            name: name.unwrap_or_else(|| address.clone()),
            url,
            address,
            active_connections: AtomicUsize::new(0),
            alive: AtomicBool::new(false),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `host:port` of the backend.
    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port_or_known_default() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Whether `address` names this backend, either as a full base URL or as `host:port`.
    pub fn matches(&self, address: &str) -> bool {
        let address = address.trim_end_matches('/');
        self.address == address || self.authority() == address
    }

    /// Resolve a path against the backend's base URL.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    // --- Health ---

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Store a new liveness observation. Returns the previous value.
    pub fn set_alive(&self, alive: bool) -> bool {
        self.alive.swap(alive, Ordering::AcqRel)
    }

    pub fn state(&self) -> HealthState {
        HealthState::from_alive(self.is_alive())
    }

    // --- Load ---

    /// Get the current number of active connections.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Increment active connection count.
    pub fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active connection count. Never goes below zero.
    pub fn dec_connections(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Count one more request against this backend and hand back a guard
    /// that releases it.
    pub fn acquire(self: &Arc<Self>) -> BackendGuard {
        self.inc_connections();
        BackendGuard {
            backend: self.clone(),
        }
    }
}

/// A RAII guard that owns one unit of a backend's connection count.
///
/// Dropping it decrements the count exactly once, whether the request
/// succeeded, failed, or its task was cancelled, and republishes the
/// backend's active-connections gauge.
#[derive(Debug)]
pub struct BackendGuard {
    backend: Arc<Backend>,
}

impl Deref for BackendGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for BackendGuard {
    fn drop(&mut self) {
        self.backend.dec_connections();
        metrics::record_active_connections(self.backend.name(), self.backend.active_connections());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(raw: &str) -> Arc<Backend> {
        Arc::new(Backend::new(Url::parse(raw).unwrap(), None))
    }

    #[test]
    fn test_new_backend_is_dead() {
        let b = backend("http://127.0.0.1:9001");
        assert!(!b.is_alive());
        assert_eq!(b.state(), HealthState::Dead);
        assert_eq!(b.active_connections(), 0);
    }

    #[test]
    fn test_identity_matching() {
        let b = backend("http://127.0.0.1:9001/");
        assert_eq!(b.address(), "http://127.0.0.1:9001");
        assert!(b.matches("http://127.0.0.1:9001"));
        assert!(b.matches("http://127.0.0.1:9001/"));
        assert!(b.matches("127.0.0.1:9001"));
        assert!(!b.matches("127.0.0.1:9002"));

        let default_port = backend("http://example.com");
        assert_eq!(default_port.authority(), "example.com:80");
        assert_eq!(default_port.url_for("/ping"), "http://example.com/ping");
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let b = backend("http://127.0.0.1:9001");
        {
            let g1 = b.acquire();
            let _g2 = b.acquire();
            assert_eq!(b.active_connections(), 2);
            drop(g1);
            assert_eq!(b.active_connections(), 1);
        }
        assert_eq!(b.active_connections(), 0);
    }

    fn active_gauge(rendered: &str, backend: &str) -> Option<f64> {
        let key = format!("proxy_backend_active_connections{{backend=\"{}\"}}", backend);
        rendered
            .lines()
            .find(|line| line.starts_with(&key))
            .and_then(|line| line.rsplit(' ').next())
            .and_then(|value| value.parse().ok())
    }

    #[test]
    fn test_guard_drop_updates_gauge() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let b = backend("http://127.0.0.1:9001");

        ::metrics::with_local_recorder(&recorder, || {
            let guard = b.acquire();
            metrics::record_active_connections(b.name(), b.active_connections());
            assert_eq!(active_gauge(&handle.render(), b.name()), Some(1.0));
            drop(guard);
        });

        assert_eq!(b.active_connections(), 0);
        assert_eq!(active_gauge(&handle.render(), b.name()), Some(0.0));
    }

    #[test]
    fn test_dec_never_goes_negative() {
        let b = backend("http://127.0.0.1:9001");
        b.dec_connections();
        assert_eq!(b.active_connections(), 0);
    }

    #[test]
    fn test_set_alive_returns_previous() {
        let b = backend("http://127.0.0.1:9001");
        assert!(!b.set_alive(true));
        assert!(b.set_alive(true));
        assert!(b.set_alive(false));
        assert!(!b.is_alive());
    }
}
