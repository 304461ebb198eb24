//! HTTP load balancer library.
//!
//! Forwards requests to a fixed set of backends, skipping the ones the
//! health monitor or a failed request has marked dead, with optional
//! per-client token-bucket rate limiting in front.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod rate_limit;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use load_balancer::{Backend, LoadBalancer};
pub use rate_limit::RateLimiter;
