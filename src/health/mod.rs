//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Initial pass, then periodic timer
//!     → Probe every backend concurrently
//!     → Write each result through the load balancer
//!
//! Passive health checks (passive.rs):
//!     Proxy request fails at the transport level
//!     → Classified failure
//!     → Backend marked dead immediately (fast failover)
//!
//! State machine (state.rs):
//!     Alive ←→ Dead
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary and race freely; last write wins
//! - A probe failure is a state change, never an error
//! - Health state is per-backend, not per-pool

pub mod active;
pub mod passive;
pub mod state;

pub use active::HealthMonitor;
pub use state::HealthState;
