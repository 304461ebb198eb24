//! Backend registry and selection.
//!
//! # Responsibilities
//! - Own the fixed, ordered backend set
//! - Filter to the alive subset and delegate to the selection strategy
//! - Hand out connection guards for load tracking
//! - Accept liveness reports from the health monitor and the proxy

use std::sync::Arc;

use url::Url;

use crate::config::BackendConfig;
use crate::load_balancer::{
    backend::{Backend, BackendGuard},
    Algorithm, BalancerError, Strategy,
};
use crate::observability::metrics;

/// Owns the backends and the strategy that picks among them.
#[derive(Debug)]
pub struct LoadBalancer {
    /// Never resized or reordered after construction.
    backends: Vec<Arc<Backend>>,
    strategy: Box<dyn Strategy>,
}

impl LoadBalancer {
    /// Create a load balancer from configuration.
    ///
    /// Every backend starts DEAD; the health monitor's first pass brings
    /// them up.
    pub fn new(configs: &[BackendConfig], algorithm: Algorithm) -> Result<Self, BalancerError> {
        let backends = configs
            .iter()
            .map(|config| {
                let url = Url::parse(&config.url).map_err(|source| BalancerError::InvalidBackend {
                    address: config.url.clone(),
                    source,
                })?;
                Ok(Arc::new(Backend::new(url, config.name.clone())))
            })
            .collect::<Result<Vec<_>, BalancerError>>()?;

        tracing::info!(
            backends = backends.len(),
            algorithm = %algorithm,
            "Load balancer initialized"
        );

        Ok(Self {
            backends,
            strategy: algorithm.build(),
        })
    }

    /// Create a load balancer from an algorithm name.
    pub fn from_config(configs: &[BackendConfig], algorithm: &str) -> Result<Self, BalancerError> {
        Self::new(configs, algorithm.parse()?)
    }

    /// Select a backend from the alive subset.
    ///
    /// The returned guard owns one unit of the backend's connection count and
    /// releases it on drop.
    pub fn next_backend(&self) -> Result<BackendGuard, BalancerError> {
        let alive = self.alive_backends();
        if alive.is_empty() {
            tracing::warn!(backends = self.backends.len(), "No available backend");
            return Err(BalancerError::NoAvailableBackends);
        }

        let backend = self
            .strategy
            .next_server(&alive)
            .ok_or(BalancerError::NoAvailableBackends)?;

        let guard = backend.acquire();
        metrics::record_active_connections(guard.name(), guard.active_connections());
        Ok(guard)
    }

    /// Set the liveness of the backend identified by `address`.
    ///
    /// Returns false if no backend matches.
    pub fn report_backend_outcome(&self, address: &str, alive: bool) -> bool {
        match self.backends.iter().find(|b| b.matches(address)) {
            Some(backend) => {
                self.record_outcome(backend, alive);
                true
            }
            None => {
                tracing::debug!(address = %address, "Outcome reported for unknown backend");
                false
            }
        }
    }

    /// Write a liveness observation to a backend we already hold.
    pub(crate) fn record_outcome(&self, backend: &Backend, alive: bool) {
        let was_alive = backend.set_alive(alive);
        match (was_alive, alive) {
            (false, true) => {
                tracing::info!(backend = %backend.address(), "Backend is alive");
            }
            (true, false) => {
                tracing::warn!(backend = %backend.address(), "Backend marked dead");
            }
            _ => {
                tracing::debug!(backend = %backend.address(), alive, "Backend state unchanged");
            }
        }
        metrics::record_backend_health(backend.name(), alive);
        metrics::record_alive_backends(self.alive_count());
    }

    /// Number of backends currently believed alive.
    pub fn alive_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_alive()).count()
    }

    /// All backends in configuration order.
    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    // Each flag is read independently; a backend flipping mid-scan may or
    // may not be included in this round.
    fn alive_backends(&self) -> Vec<Arc<Backend>> {
        self.backends
            .iter()
            .filter(|b| b.is_alive())
            .cloned()
            .collect()
    }
}
