//! Per-client admission control.
//!
//! # Data Flow
//! ```text
//! Client key (API key or remote IP)
//!     → registry.rs (find or lazily create the client's limiter)
//!     → token_bucket.rs (take one token or refuse)
//!     → allow / deny
//! ```
//!
//! # Design Decisions
//! - One limiter instance per client key, created on first sight
//! - The algorithm is resolved once from its configured name
//! - Deny is a decision, not an error; errors are infrastructure failures
//! - State is local to this process

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::RateLimitConfig;
use crate::lifecycle::Shutdown;

pub mod registry;
pub mod token_bucket;

pub use registry::RateLimiter;
pub use token_bucket::TokenBucket;

/// An admission-control algorithm for a single client.
pub trait Limiter: Send + Sync + fmt::Debug {
    /// Admit one request if the budget allows it.
    fn allow(&self) -> bool;

    /// Whether the limiter is indistinguishable from a freshly built one.
    fn is_full(&self) -> bool;
}

/// Errors raised while building or consulting limiters.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("unknown rate limit algorithm `{0}`")]
    UnknownAlgorithm(String),

    #[error("invalid rate limit parameters: {0}")]
    InvalidParameters(String),

    #[error("no async runtime available to drive limiter refills")]
    NoRuntime,
}

/// Known limiter algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterKind {
    TokenBucket,
}

impl FromStr for LimiterKind {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "token_bucket" => Ok(LimiterKind::TokenBucket),
            other => Err(RateLimitError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Recipe for the limiter every new client receives.
#[derive(Debug, Clone)]
pub struct LimiterTemplate {
    kind: LimiterKind,
    capacity: usize,
    refill_interval: Duration,
}

impl LimiterTemplate {
    pub fn token_bucket(capacity: usize, refill_interval: Duration) -> Self {
        Self {
            kind: LimiterKind::TokenBucket,
            capacity,
            refill_interval,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Result<Self, RateLimitError> {
        let kind: LimiterKind = config.algorithm.parse()?;
        Ok(Self {
            kind,
            capacity: config.capacity as usize,
            refill_interval: config.refill_interval(),
        })
    }

    pub fn kind(&self) -> LimiterKind {
        self.kind
    }

    /// Build a fresh limiter whose background work ends with `shutdown`.
    pub fn build(&self, shutdown: &Shutdown) -> Result<Arc<dyn Limiter>, RateLimitError> {
        match self.kind {
            LimiterKind::TokenBucket => Ok(Arc::new(TokenBucket::new(
                self.capacity,
                self.refill_interval,
                shutdown,
            )?)),
        }
    }
}
