// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Token-bucket rate limiter for the REST clients.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Bucket sizing: `capacity` tokens refilled evenly over `period`.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub capacity: u32,
    pub period: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            period: Duration::from_secs(60),
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Classic token bucket. `try_acquire` is non-blocking; `acquire` sleeps on
/// the suggested retry delay until a token is available.
pub struct RateLimiter {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        let capacity = f64::from(cfg.capacity);
        Self {
            capacity,
            refill_rate: capacity / cfg.period.as_secs_f64(),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to take one token.
    ///
    /// Returns `(true, None)` when allowed, or `(false, Some(retry_after))`
    /// with the time until the next token becomes available.
    pub fn try_acquire(&self) -> (bool, Option<Duration>) {
        let mut state = self.state.lock();

        let elapsed = state.last_refill.elapsed();
        let refill = elapsed.as_secs_f64() * self.refill_rate;
        if refill > 0.0 {
            state.tokens = (state.tokens + refill).min(self.capacity);
            state.last_refill = Instant::now();
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return (true, None);
        }

        let missing = 1.0 - state.tokens;
        (false, Some(Duration::from_secs_f64(missing / self.refill_rate)))
    }

    /// Block (cooperatively) until a token is available.
    pub async fn acquire(&self) {
        loop {
            let (allowed, retry_after) = self.try_acquire();
            if allowed {
                return;
            }
            tokio::time::sleep(retry_after.unwrap_or(Duration::from_millis(100))).await;
        }
    }
}
