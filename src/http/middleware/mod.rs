//! Request middleware applied before proxying.

pub mod rate_limit;

pub use rate_limit::{client_key, rate_limit_middleware, API_KEY_HEADER};
