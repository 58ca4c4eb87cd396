//! Per-client token bucket guarding the lead endpoint.
//!
//! Buckets live in process memory, so the limit applies per instance only. A multi-instance
//! deployment needs a shared counter behind the [`RateLimiter`] trait instead.
//! Buckets are never evicted; the map grows with the number of distinct client ids.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::RateLimitSettings;

/// Admission decision for one request from `client_id`. Never fails.
pub trait RateLimiter: Send + Sync {
    fn allow(&self, client_id: &str) -> bool;
}

/// Time source, injectable so refill behavior can be tested without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

/// In-memory token bucket keyed by client id.
///
/// Refill is lazy and whole-window: every full `window` elapsed since the last refill adds
/// `capacity` tokens, capped at `capacity`.
pub struct TokenBucketLimiter {
    capacity: u32,
    window: Duration,
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: RateLimitSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity: settings.capacity,
            window: settings.window,
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Remaining tokens for a client, as of its last refill. Unknown clients report full capacity.
    pub fn remaining(&self, client_id: &str) -> u32 {
        let buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        buckets
            .get(client_id)
            .map(|b| b.tokens)
            .unwrap_or(self.capacity)
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn allow(&self, client_id: &str) -> bool {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());

        let bucket = buckets.entry(client_id.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let windows = (elapsed.as_millis() / self.window.as_millis().max(1)) as u64;
        let tokens_to_add = windows.saturating_mul(self.capacity as u64);
        if tokens_to_add > 0 {
            bucket.tokens = (bucket.tokens as u64 + tokens_to_add).min(self.capacity as u64) as u32;
            bucket.last_refill = now;
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            tracing::debug!("Rate limit exhausted for client {}", client_id);
            false
        }
    }
}
