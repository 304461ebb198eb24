//! Client → limiter registry.
//!
//! # Responsibilities
//! - Map client keys to their limiter, creating it on first request
//! - Guarantee one limiter per key under concurrent first lookups
//! - Optionally forget clients that have gone quiet
//!
//! # Design Decisions
//! - Lookups take a shard read lock; creation takes the shard write lock
//!   through the entry API, so racing creators converge on one instance
//! - Entries live forever unless an idle TTL is configured
//! - Only full, unreferenced limiters are evicted: recreating one on the
//!   next request yields the same state, so eviction never grants tokens

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::RateLimitConfig;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::rate_limit::{Limiter, LimiterTemplate, RateLimitError};

#[derive(Debug)]
struct ClientLimiter {
    limiter: Arc<dyn Limiter>,
    /// Milliseconds since the registry's epoch.
    last_seen: AtomicU64,
}

/// Per-client rate limiter registry.
#[derive(Debug)]
pub struct RateLimiter {
    limiters: DashMap<String, ClientLimiter>,
    template: LimiterTemplate,
    shutdown: Shutdown,
    epoch: Instant,
}

impl RateLimiter {
    pub fn new(template: LimiterTemplate, shutdown: Shutdown) -> Self {
        Self {
            limiters: DashMap::new(),
            template,
            shutdown,
            epoch: Instant::now(),
        }
    }

    pub fn from_config(config: &RateLimitConfig, shutdown: Shutdown) -> Result<Self, RateLimitError> {
        Ok(Self::new(LimiterTemplate::from_config(config)?, shutdown))
    }

    /// Decide whether the client identified by `key` may proceed.
    pub fn allow_request(&self, key: &str) -> Result<bool, RateLimitError> {
        let limiter = self.limiter_for(key)?;
        Ok(limiter.allow())
    }

    /// Number of clients with a limiter.
    pub fn tracked_clients(&self) -> usize {
        self.limiters.len()
    }

    /// Drop every client not seen within `ttl` whose limiter is full and
    /// not held by an in-flight request. Returns how many were removed.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let now = self.now_ms();
        let ttl_ms = ttl.as_millis() as u64;
        let before = self.limiters.len();

        // `retain` holds each shard's write lock, and clones of the limiter
        // are only taken under that shard's lock, so a strong count of one
        // means no request can still be using it.
        self.limiters.retain(|_, client| {
            let idle = now.saturating_sub(client.last_seen.load(Ordering::Relaxed)) >= ttl_ms;
            let evictable = idle && client.limiter.is_full() && Arc::strong_count(&client.limiter) == 1;
            !evictable
        });

        let removed = before.saturating_sub(self.limiters.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.limiters.len(), "Evicted idle rate limit clients");
            metrics::record_rate_limit_clients(self.limiters.len());
        }
        removed
    }

    /// Sweep idle clients every `ttl` until shutdown or until the registry is dropped.
    pub fn spawn_eviction(self: &Arc<Self>, ttl: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + ttl, ttl);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => break,
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else { break };
                        registry.evict_idle(ttl);
                    }
                }
            }
        })
    }

    fn limiter_for(&self, key: &str) -> Result<Arc<dyn Limiter>, RateLimitError> {
        let now = self.now_ms();

        if let Some(client) = self.limiters.get(key) {
            client.last_seen.store(now, Ordering::Relaxed);
            return Ok(client.limiter.clone());
        }

        match self.limiters.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                let client = entry.get();
                client.last_seen.store(now, Ordering::Relaxed);
                Ok(client.limiter.clone())
            }
            Entry::Vacant(entry) => {
                let limiter = self.template.build(&self.shutdown)?;
                entry.insert(ClientLimiter {
                    limiter: limiter.clone(),
                    last_seen: AtomicU64::new(now),
                });
                tracing::debug!(client = %key, kind = ?self.template.kind(), "Created rate limiter");
                metrics::record_rate_limit_clients(self.limiters.len());
                Ok(limiter)
            }
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}
