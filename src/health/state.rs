//! Backend health state machine.
//!
//! # States
//! - Alive: backend receives traffic
//! - Dead: backend excluded from load balancing
//!
//! # State Transitions
//! ```text
//! Dead  → Alive: probe returned 200 within the timeout
//! Alive → Dead:  probe failed, or the proxy observed a transport failure
//! ```
//!
//! Every backend starts Dead. There is no hysteresis: each observation is
//! written as-is and the last write wins.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Alive,
    Dead,
}

impl HealthState {
    pub fn from_alive(alive: bool) -> Self {
        if alive {
            HealthState::Alive
        } else {
            HealthState::Dead
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Alive => f.write_str("alive"),
            HealthState::Dead => f.write_str("dead"),
        }
    }
}
