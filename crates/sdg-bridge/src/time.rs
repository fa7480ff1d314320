// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wall-clock abstraction and timestamp conversions.
//!
//! The upstream API speaks minute-precision `YYYY-MM-DD HH:MM` strings in
//! UTC; everything internal is unix epoch seconds. The `Clock` trait exists
//! so schedule arithmetic and the polling loops can be driven by a fake
//! clock in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, NaiveDateTime, Utc};

/// Source of wall-clock time in epoch seconds.
pub trait Clock: Send + Sync {
    /// Current unix timestamp in seconds.
    fn now(&self) -> u64;
}

/// System wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Manually driven clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `now`.
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    /// Move the clock to an absolute timestamp.
    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::Relaxed);
    }

    /// Advance the clock by `secs`.
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

/// Current unix timestamp from the system clock.
pub fn ts_now() -> u64 {
    SystemClock.now()
}

const SAMPLE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Parse an upstream timestamp string (UTC assumed) into epoch seconds.
///
/// Accepts minute- and second-precision forms, with either a space or a
/// `T` separator.
pub fn str_to_ts(s: &str) -> Option<u64> {
    for fmt in SAMPLE_TIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            let ts = naive.and_utc().timestamp();
            return u64::try_from(ts).ok();
        }
    }
    None
}

/// Format epoch seconds as the minute-precision `YYYY-MM-DD HH:MM` string
/// the upstream request body expects (UTC).
pub fn ts_to_str(ts: u64) -> String {
    let dt = DateTime::<Utc>::from_timestamp(ts as i64, 0).unwrap_or(DateTime::UNIX_EPOCH);
    dt.format("%Y-%m-%d %H:%M").to_string()
}

/// Clamp `value` into `[lower, upper]`.
pub fn clamp(value: u64, lower: u64, upper: u64) -> u64 {
    value.max(lower).min(upper)
}
