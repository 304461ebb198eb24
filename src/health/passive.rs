//! Passive health checking (fast failover).
//!
//! # Responsibilities
//! - Observe classified forwarding failures from the proxy
//! - Mark the backend dead immediately, ahead of the next probe round
//!
//! # Design Decisions
//! - Client cancellation is not a backend failure
//! - Every other transport failure is, including unclassified ones
//! - HTTP statuses returned by the backend are not failures; only probes judge those

use crate::http::response::UpstreamFailure;
use crate::load_balancer::{Backend, LoadBalancer};

/// Apply a forwarding failure to the backend it came from.
///
/// Returns true if the backend was reported dead.
pub fn observe_failure(balancer: &LoadBalancer, backend: &Backend, failure: &UpstreamFailure) -> bool {
    if !failure.marks_backend_dead() {
        tracing::debug!(backend = %backend.address(), "Request cancelled by client; backend state untouched");
        return false;
    }

    tracing::warn!(
        backend = %backend.address(),
        failure = %failure,
        "Upstream failure, failing over"
    );
    balancer.report_backend_outcome(backend.address(), false)
}
