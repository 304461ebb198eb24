//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy handler
//! - Wire up middleware (request ID, tracing, rate limiting)
//! - Start the health monitor before accepting traffic
//! - Forward requests to the selected backend
//! - Drain in-flight requests on shutdown

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::time;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ProxyConfig;
use crate::health::{passive, HealthMonitor};
use crate::http::middleware::rate_limit_middleware;
use crate::http::request::{prepare_upstream_request, request_id, MakeRequestUuid};
use crate::http::response::{self, UpstreamFailure};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{BalancerError, LoadBalancer};
use crate::observability::metrics;
use crate::rate_limit::{RateLimitError, RateLimiter};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub balancer: Arc<LoadBalancer>,
    pub client: Client<HttpConnector, Body>,
    pub upstream_timeout: Duration,
}

/// Errors raised while assembling the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Balancer(#[from] BalancerError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
}

/// HTTP server for the load balancer.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    balancer: Arc<LoadBalancer>,
    rate_limiter: Option<Arc<RateLimiter>>,
    shutdown: Shutdown,
}

impl HttpServer {
    /// Build the backend registry, the rate limiter and the router.
    ///
    /// Nothing is probed or served until [`HttpServer::run`].
    pub fn new(config: ProxyConfig, shutdown: Shutdown) -> Result<Self, ServerError> {
        let balancer = Arc::new(LoadBalancer::from_config(
            &config.backends,
            &config.balancer.algorithm,
        )?);

        let rate_limiter = if config.rate_limit.enabled {
            Some(Arc::new(RateLimiter::from_config(
                &config.rate_limit,
                shutdown.clone(),
            )?))
        } else {
            None
        };

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.timeouts.connect()));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let state = AppState {
            balancer: balancer.clone(),
            client,
            upstream_timeout: config.timeouts.upstream(),
        };

        let router = Self::build_router(state, rate_limiter.clone());
        Ok(Self {
            router,
            config,
            balancer,
            rate_limiter,
            shutdown,
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState, rate_limiter: Option<Arc<RateLimiter>>) -> Router {
        let mut router = Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state);

        if let Some(limiter) = rate_limiter {
            router = router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
        }

        router.layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// The first health pass completes before the listener accepts anything.
    /// Returns once the shutdown handle fires and in-flight requests have
    /// drained, or the drain deadline has passed.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;

        let monitor = HealthMonitor::new(self.balancer.clone(), &self.config.balancer);
        let health = monitor.start(self.shutdown.clone()).await;

        let sweeper = match (&self.rate_limiter, self.config.rate_limit.client_idle_ttl()) {
            (Some(limiter), Some(ttl)) => Some(limiter.spawn_eviction(ttl)),
            _ => None,
        };

        tracing::info!(
            address = %addr,
            backends = self.balancer.backends().len(),
            alive = self.balancer.alive_count(),
            rate_limit = self.rate_limiter.is_some(),
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let graceful = {
            let shutdown = self.shutdown.clone();
            async move { shutdown.wait().await }
        };
        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(graceful)
            .into_future();
        tokio::pin!(serve);

        let drain = Duration::from_secs(self.config.listener.shutdown_timeout_secs);
        let deadline = {
            let shutdown = self.shutdown.clone();
            async move {
                shutdown.wait().await;
                time::sleep(drain).await;
            }
        };

        tokio::select! {
            result = &mut serve => result?,
            _ = deadline => {
                tracing::warn!(timeout = ?drain, "Drain deadline reached, dropping open connections");
            }
        }

        if let Err(e) = health.await {
            tracing::error!(error = %e, "Health monitor task failed");
        }
        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                tracing::error!(error = %e, "Rate limit eviction task failed");
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn balancer(&self) -> Arc<LoadBalancer> {
        self.balancer.clone()
    }
}

/// Main proxy handler.
/// Selects a backend and forwards the request to it.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let request_id = request_id(request.headers()).to_string();
    let method = request.method().to_string();

    let guard = match state.balancer.next_backend() {
        Ok(guard) => guard,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Rejecting request");
            metrics::record_request(&method, 503, "none", start_time);
            return (StatusCode::SERVICE_UNAVAILABLE, "Service unavailable").into_response();
        }
    };

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %request.uri().path(),
        backend = %guard.address(),
        "Proxying request"
    );

    let upstream = match prepare_upstream_request(request, &guard, client_addr) {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Could not build upstream URI");
            metrics::record_request(&method, 400, guard.name(), start_time);
            return (StatusCode::BAD_REQUEST, "Bad request").into_response();
        }
    };

    let failure = match time::timeout(state.upstream_timeout, state.client.request(upstream)).await {
        Ok(Ok(resp)) => {
            metrics::record_request(&method, resp.status().as_u16(), guard.name(), start_time);
            return response::relay(resp, guard, state.upstream_timeout);
        }
        Ok(Err(e)) => UpstreamFailure::classify(&e),
        Err(_) => UpstreamFailure::ReadTimeout(state.upstream_timeout),
    };

    tracing::error!(
        request_id = %request_id,
        backend = %guard.address(),
        error = %failure,
        "Upstream request failed"
    );
    passive::observe_failure(&state.balancer, &guard, &failure);

    let status = failure.status().map(|s| s.as_u16()).unwrap_or(499);
    metrics::record_request(&method, status, guard.name(), start_time);
    failure.into_response()
}
