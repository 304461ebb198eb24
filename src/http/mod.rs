//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing)
//!     → middleware/ (per-client rate limiting)
//!     → [load balancer picks an alive backend]
//!     → request.rs (rewrite URI and headers)
//!     → response.rs (relay body, classify failures)
//!     → Send to client
//! ```

pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use response::UpstreamFailure;
pub use server::{AppState, HttpServer, ServerError};
