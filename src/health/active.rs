//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe backends
//! - Update backend health state based on results

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::BalancerConfig;
use crate::lifecycle::Shutdown;
use crate::load_balancer::{Backend, LoadBalancer};

const USER_AGENT: &str = "balancer-proxy-health-check";

/// Probes every backend on a fixed interval.
pub struct HealthMonitor {
    balancer: Arc<LoadBalancer>,
    interval: Duration,
    timeout: Duration,
    path: String,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(balancer: Arc<LoadBalancer>, config: &BalancerConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.health_check_timeout()));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            balancer,
            interval: config.health_check_interval(),
            timeout: config.health_check_timeout(),
            path: config.health_check_path.clone(),
            client,
        }
    }

    /// Run one full pass, then continue probing in the background.
    ///
    /// The alive set is populated when this returns.
    pub async fn start(self, shutdown: Shutdown) -> JoinHandle<()> {
        tracing::info!(
            interval = ?self.interval,
            timeout = ?self.timeout,
            path = %self.path,
            "Health monitor starting"
        );

        self.check_all().await;
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, shutdown: Shutdown) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
                _ = ticker.tick() => {
                    self.check_all().await;
                }
            }
        }
    }

    /// Probe every backend concurrently and record each result.
    ///
    /// Returns once every probe has finished or timed out.
    pub async fn check_all(&self) {
        let backends = self.balancer.backends();
        let results = join_all(backends.iter().map(|b| self.probe(b))).await;

        for (backend, alive) in backends.iter().zip(results) {
            self.balancer.record_outcome(backend, alive);
        }
    }

    /// A probe succeeds only on a 200 within the timeout.
    async fn probe(&self, backend: &Backend) -> bool {
        let uri = backend.url_for(&self.path);
        let request = match Request::builder()
            .method(Method::GET)
            .uri(&uri)
            .header("user-agent", USER_AGENT)
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(backend = %backend.address(), error = %e, "Failed to build health check request");
                return false;
            }
        };

        match time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) if response.status() == StatusCode::OK => true,
            Ok(Ok(response)) => {
                tracing::debug!(backend = %backend.address(), status = %response.status(), "Health check failed: non-200 status");
                false
            }
            Ok(Err(e)) => {
                tracing::debug!(backend = %backend.address(), error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::debug!(backend = %backend.address(), timeout = ?self.timeout, "Health check failed: timeout");
                false
            }
        }
    }
}
