//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request admitted
//!     → pool.rs (snapshot the alive subset, no locks)
//!     → Apply selection strategy:
//!         - round_robin.rs (rotate through backends)
//!         - least_conn.rs (pick backend with fewest connections)
//!         - random.rs (uniform pick)
//!     → backend.rs (count the request, hand out a guard)
//!     → Return guard or NoAvailableBackends
//! ```
//!
//! # Design Decisions
//! - Backend set is fixed at construction; only per-backend atomics mutate
//! - Strategies see only the candidates they are given
//! - Dead backends are excluded before the strategy runs
//! - The strategy is resolved once from its configured name

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

pub mod backend;
pub mod least_conn;
pub mod pool;
pub mod random;
pub mod round_robin;

pub use backend::{Backend, BackendGuard};
pub use pool::LoadBalancer;

use self::least_conn::LeastConnections;
use self::random::Random;
use self::round_robin::RoundRobin;

/// A backend selection policy.
///
/// Implementations pick one of `backends`, which the caller guarantees is
/// non-empty. Returning `None` for an empty slice is the only other allowed
/// outcome.
pub trait Strategy: Send + Sync + fmt::Debug {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;
}

/// Errors raised by the balancer.
#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("no available backends")]
    NoAvailableBackends,

    #[error("unknown balancer algorithm `{0}`")]
    UnknownAlgorithm(String),

    #[error("invalid backend address `{address}`: {source}")]
    InvalidBackend {
        address: String,
        #[source]
        source: url::ParseError,
    },
}

/// Known selection algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    RoundRobin,
    LeastConnections,
    Random,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::RoundRobin => "round_robin",
            Algorithm::LeastConnections => "least_connections",
            Algorithm::Random => "random",
        }
    }

    /// Construct a fresh strategy instance.
    pub fn build(&self) -> Box<dyn Strategy> {
        match self {
            Algorithm::RoundRobin => Box::new(RoundRobin::new()),
            Algorithm::LeastConnections => Box::new(LeastConnections::new()),
            Algorithm::Random => Box::new(Random::new()),
        }
    }
}

impl FromStr for Algorithm {
    type Err = BalancerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(Algorithm::RoundRobin),
            "least_connections" => Ok(Algorithm::LeastConnections),
            "random" => Ok(Algorithm::Random),
            other => Err(BalancerError::UnknownAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_names_round_trip() {
        for algo in [Algorithm::RoundRobin, Algorithm::LeastConnections, Algorithm::Random] {
            assert_eq!(algo.as_str().parse::<Algorithm>().unwrap(), algo);
        }
    }

    #[test]
    fn test_unknown_algorithm() {
        let err = "roundrobin".parse::<Algorithm>().unwrap_err();
        assert!(matches!(err, BalancerError::UnknownAlgorithm(ref name) if name == "roundrobin"));
    }
}
