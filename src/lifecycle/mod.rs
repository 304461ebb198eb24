//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → health monitor stops, refill tasks stop,
//!               server stops accepting and drains in-flight requests
//! ```
//!
//! # Design Decisions
//! - One cancellation handle shared by every background task
//! - Background loops check it at tick boundaries; in-flight work finishes
//! - Drain has a deadline enforced by the binary

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
