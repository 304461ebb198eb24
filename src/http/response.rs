//! Response handling and transformation.
//!
//! # Responsibilities
//! - Relay the backend response to the client, streaming the body
//! - Classify forwarding failures and map them to client-facing statuses
//!
//! # Design Decisions
//! - Streaming responses avoid buffering entire body
//! - Hop-by-hop headers stripped automatically
//! - Connect-class failures are 502, waiting too long for the response is 504
//! - A body that goes quiet for longer than the upstream timeout is aborted

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{Response as HttpResponse, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper::body::{Body as HttpBody, Frame, Incoming, SizeHint};
use thiserror::Error;
use tokio::time::{self, Instant, Sleep};

use crate::http::request::strip_hop_by_hop;
use crate::load_balancer::BackendGuard;

/// Non-standard status used when the client went away before a response
/// could be written. Nobody reads it.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Why forwarding to a backend failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamFailure {
    /// The inbound side failed; the backend is not at fault.
    ClientCancelled,
    /// Could not establish a connection (refused, unreachable, dial timeout).
    Connect(String),
    /// The transport reported a timeout while sending.
    Timeout(String),
    /// The backend did not produce a response in time.
    ReadTimeout(Duration),
    /// Anything else.
    Other(String),
}

impl UpstreamFailure {
    /// Classify an error returned by the upstream client.
    pub fn classify(err: &hyper_util::client::legacy::Error) -> Self {
        let detail = error_chain(err);
        if err.is_connect() {
            return UpstreamFailure::Connect(detail);
        }

        let mut source = err.source();
        while let Some(cause) = source {
            if cause.downcast_ref::<axum::Error>().is_some() {
                return UpstreamFailure::ClientCancelled;
            }
            if let Some(io_err) = cause.downcast_ref::<io::Error>() {
                match io_err.kind() {
                    io::ErrorKind::TimedOut => return UpstreamFailure::Timeout(detail),
                    io::ErrorKind::ConnectionRefused => return UpstreamFailure::Connect(detail),
                    _ => {}
                }
            }
            if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>() {
                if hyper_err.is_timeout() {
                    return UpstreamFailure::Timeout(detail);
                }
            }
            source = cause.source();
        }

        UpstreamFailure::Other(detail)
    }

    /// Whether the backend should be considered dead after this failure.
    pub fn marks_backend_dead(&self) -> bool {
        !matches!(self, UpstreamFailure::ClientCancelled)
    }

    /// Status sent to the client, if anyone is still listening.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            UpstreamFailure::ClientCancelled => None,
            UpstreamFailure::Connect(_) | UpstreamFailure::Timeout(_) | UpstreamFailure::Other(_) => {
                Some(StatusCode::BAD_GATEWAY)
            }
            UpstreamFailure::ReadTimeout(_) => Some(StatusCode::GATEWAY_TIMEOUT),
        }
    }
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamFailure::ClientCancelled => write!(f, "client cancelled request"),
            UpstreamFailure::Connect(e) => write!(f, "connection failed: {}", e),
            UpstreamFailure::Timeout(e) => write!(f, "request timed out: {}", e),
            UpstreamFailure::ReadTimeout(t) => write!(f, "no response within {:?}", t),
            UpstreamFailure::Other(e) => write!(f, "{}", e),
        }
    }
}

impl IntoResponse for UpstreamFailure {
    fn into_response(self) -> Response {
        match &self {
            UpstreamFailure::ClientCancelled => {
                let status = StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::BAD_REQUEST);
                status.into_response()
            }
            UpstreamFailure::Connect(_) | UpstreamFailure::Timeout(_) => {
                (StatusCode::BAD_GATEWAY, "Bad gateway").into_response()
            }
            UpstreamFailure::ReadTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "Upstream timeout").into_response(),
            UpstreamFailure::Other(detail) => {
                (StatusCode::BAD_GATEWAY, format!("Backend error: {}", detail)).into_response()
            }
        }
    }
}

fn error_chain(err: &dyn StdError) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// The backend stopped sending body data.
#[derive(Debug, Error)]
#[error("backend {backend} sent no body data for {idle:?}")]
pub struct BodyStalled {
    backend: String,
    idle: Duration,
}

/// Response body that holds the backend's connection count until the
/// client has received the whole body (or the body is dropped).
///
/// Each frame rearms an idle deadline; if it fires before the next frame
/// the body fails and the client connection is aborted.
struct TrackedBody {
    inner: Pin<Box<Incoming>>,
    idle: Pin<Box<Sleep>>,
    idle_timeout: Duration,
    guard: BackendGuard,
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = axum::BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_frame(cx) {
            Poll::Ready(frame) => {
                this.idle.as_mut().reset(Instant::now() + this.idle_timeout);
                Poll::Ready(frame.map(|r| r.map_err(Into::into)))
            }
            Poll::Pending => {
                if this.idle.as_mut().poll(cx).is_pending() {
                    return Poll::Pending;
                }
                let stalled = BodyStalled {
                    backend: this.guard.address().to_string(),
                    idle: this.idle_timeout,
                };
                tracing::warn!(error = %stalled, "Aborting relayed response");
                Poll::Ready(Some(Err(stalled.into())))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Relay a backend response to the client.
///
/// The body must keep producing data at least every `idle_timeout`.
pub fn relay(response: HttpResponse<Incoming>, guard: BackendGuard, idle_timeout: Duration) -> Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(
        parts,
        Body::new(TrackedBody {
            inner: Box::pin(body),
            idle: Box::pin(time::sleep(idle_timeout)),
            idle_timeout,
            guard,
        }),
    )
}
