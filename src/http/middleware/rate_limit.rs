//! Rate limiting middleware.
//!
//! Identifies the client, asks the registry for a decision, and either
//! forwards the request or answers 429 itself.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::http::request::request_id;
use crate::observability::metrics;
use crate::rate_limit::RateLimiter;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientKeyError {
    #[error("X-API-Key header is empty")]
    Empty,
    #[error("X-API-Key header is not valid UTF-8")]
    NotUtf8,
}

/// Body of a 429 response.
#[derive(Debug, Serialize)]
struct RateLimitBody {
    code: u16,
    message: &'static str,
}

/// Work out who is asking.
///
/// An `X-API-Key` header wins over the remote address. Keys and addresses
/// live in separate namespaces so a key can never collide with an IP.
pub fn client_key(headers: &HeaderMap, remote: SocketAddr) -> Result<String, ClientKeyError> {
    match headers.get(API_KEY_HEADER) {
        Some(value) => {
            let key = value.to_str().map_err(|_| ClientKeyError::NotUtf8)?.trim();
            if key.is_empty() {
                return Err(ClientKeyError::Empty);
            }
            Ok(format!("api:{}", key))
        }
        None => Ok(format!("ip:{}", remote.ip())),
    }
}

/// The response sent to a client that is out of tokens.
pub fn rate_limited_response() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(RateLimitBody {
            code: StatusCode::TOO_MANY_REQUESTS.as_u16(),
            message: "Rate limit exceeded",
        }),
    )
        .into_response()
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let key = match client_key(req.headers(), remote) {
        Ok(key) => key,
        Err(e) => {
            tracing::debug!(remote = %remote, error = %e, "Rejecting request with malformed client key");
            metrics::record_rate_limited("malformed_key");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    match limiter.allow_request(&key) {
        Ok(true) => next.run(req).await,
        Ok(false) => {
            tracing::warn!(
                request_id = %request_id(req.headers()),
                client = %key,
                "Rate limit exceeded"
            );
            metrics::record_rate_limited("token_bucket");
            rate_limited_response()
        }
        Err(e) => {
            tracing::error!(client = %key, error = %e, "Rate limiter failure");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}
