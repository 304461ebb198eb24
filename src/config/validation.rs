//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Resolve algorithm identifiers before anything is constructed
//! - Validate value ranges (intervals > 0, capacity > 0, URLs usable)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;
use crate::load_balancer::Algorithm;
use crate::rate_limit::LimiterKind;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("at least one backend must be configured")]
    NoBackends,

    #[error("backend `{url}` is invalid: {reason}")]
    InvalidBackend { url: String, reason: String },

    #[error("backend `{0}` is listed more than once")]
    DuplicateBackend(String),

    #[error("unknown balancer algorithm `{0}`")]
    UnknownBalancerAlgorithm(String),

    #[error("unknown rate limit algorithm `{0}`")]
    UnknownRateLimitAlgorithm(String),

    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),

    #[error("health check path `{0}` must start with `/`")]
    InvalidHealthPath(String),
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }

    let mut seen = HashSet::new();
    for backend in &config.backends {
        if let Err(reason) = check_backend_url(&backend.url) {
            errors.push(ValidationError::InvalidBackend {
                url: backend.url.clone(),
                reason,
            });
        }
        if !seen.insert(backend.url.trim_end_matches('/')) {
            errors.push(ValidationError::DuplicateBackend(backend.url.clone()));
        }
    }

    let balancer = &config.balancer;
    if Algorithm::from_str(&balancer.algorithm).is_err() {
        errors.push(ValidationError::UnknownBalancerAlgorithm(balancer.algorithm.clone()));
    }
    if balancer.health_check_interval_ms == 0 {
        errors.push(ValidationError::Zero("balancer.health_check_interval_ms"));
    }
    if balancer.health_check_timeout_ms == 0 {
        errors.push(ValidationError::Zero("balancer.health_check_timeout_ms"));
    }
    if !balancer.health_check_path.starts_with('/') {
        errors.push(ValidationError::InvalidHealthPath(balancer.health_check_path.clone()));
    }

    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::Zero("timeouts.connect_ms"));
    }
    if config.timeouts.upstream_ms == 0 {
        errors.push(ValidationError::Zero("timeouts.upstream_ms"));
    }

    let rate_limit = &config.rate_limit;
    if rate_limit.enabled {
        if LimiterKind::from_str(&rate_limit.algorithm).is_err() {
            errors.push(ValidationError::UnknownRateLimitAlgorithm(rate_limit.algorithm.clone()));
        }
        if rate_limit.capacity == 0 {
            errors.push(ValidationError::Zero("rate_limit.capacity"));
        }
        if rate_limit.refill_interval().is_zero() {
            errors.push(ValidationError::Zero("rate_limit.refill_interval_ms"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_backend_url(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    if url.scheme() != "http" {
        return Err(format!("unsupported scheme `{}`", url.scheme()));
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(())
}
