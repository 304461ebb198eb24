//! Token bucket limiter.
//!
//! The pool is a semaphore with `capacity` permits: admitting a request
//! forgets one permit, and a background task adds one back per interval
//! until the pool is full. Ticks that find the pool full are dropped.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::lifecycle::Shutdown;
use crate::rate_limit::{Limiter, RateLimitError};

#[derive(Debug)]
struct Tokens {
    permits: Semaphore,
    capacity: usize,
}

impl Tokens {
    fn take(&self) -> bool {
        match self.permits.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    fn refill_one(&self) -> bool {
        // Only the refill task adds permits, so this check cannot overshoot.
        if self.permits.available_permits() < self.capacity {
            self.permits.add_permits(1);
            true
        } else {
            false
        }
    }
}

/// A bounded token pool refilled one token at a time.
#[derive(Debug)]
pub struct TokenBucket {
    tokens: Arc<Tokens>,
}

impl TokenBucket {
    /// Create a full bucket and start its refill task on the current runtime.
    ///
    /// The task stops when `shutdown` fires or the bucket is dropped.
    pub fn new(capacity: usize, refill_interval: Duration, shutdown: &Shutdown) -> Result<Self, RateLimitError> {
        if capacity == 0 {
            return Err(RateLimitError::InvalidParameters("capacity must be greater than zero".into()));
        }
        if refill_interval.is_zero() {
            return Err(RateLimitError::InvalidParameters("refill interval must be greater than zero".into()));
        }
        let handle = Handle::try_current().map_err(|_| RateLimitError::NoRuntime)?;

        let tokens = Arc::new(Tokens {
            permits: Semaphore::new(capacity),
            capacity,
        });
        handle.spawn(refill(Arc::downgrade(&tokens), refill_interval, shutdown.clone()));

        Ok(Self { tokens })
    }

    /// Tokens currently available.
    pub fn available(&self) -> usize {
        self.tokens.permits.available_permits()
    }

}

impl Limiter for TokenBucket {
    fn allow(&self) -> bool {
        let allowed = self.tokens.take();
        tracing::trace!(allowed, remaining = self.available(), "Token bucket consulted");
        allowed
    }

    fn is_full(&self) -> bool {
        self.available() >= self.tokens.capacity
    }
}

async fn refill(tokens: Weak<Tokens>, interval: Duration, shutdown: Shutdown) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {
                let Some(tokens) = tokens.upgrade() else { break };
                tokens.refill_one();
            }
        }
    }
}
