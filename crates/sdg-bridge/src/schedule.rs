// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Adaptive per-logger poll schedule.
//!
//! The next due time follows the logger's observed transmission cadence: the
//! median of the deltas between the last few successful transmissions,
//! clamped to sane bounds, plus a short tail window so the upstream has
//! received the frame before we ask for it. Failed attempts push the logger
//! out with exponential backoff instead.

use std::collections::VecDeque;

use crate::time::clamp;

/// Upper bound for any computed poll interval (seconds).
pub const MAX_TX_INTERVAL: u64 = 3600;
/// Lower bound for any cadence-derived poll interval (seconds).
pub const MIN_TX_INTERVAL: u64 = 900;
/// Base delay after a failed attempt (seconds).
pub const POSTPONE: u64 = 60;
/// Backoff multiplier per consecutive failure.
pub const BACKOFF: u64 = 10;
/// Tail window appended to every due time (seconds).
pub const LOGGER_TX_DELAY: u64 = 20;
/// Number of successful transmission timestamps kept for cadence estimation.
pub const TX_HISTORY_LEN: usize = 5;

/// Mutable schedule state for one logger.
///
/// Owned by the device and only ever mutated by the worker currently holding
/// the device lock.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// Earliest moment this logger should be polled next (epoch seconds).
    pub due_at: u64,
    /// True while a worker holds this logger.
    pub in_flight: bool,
    last_seen: u64,
    tx_history: VecDeque<u64>,
    errors: u32,
}

impl Schedule {
    /// New schedule with the given watermark, due at `due_at`.
    pub fn new(last_seen: u64, due_at: u64) -> Self {
        Self {
            due_at,
            in_flight: false,
            last_seen,
            tx_history: VecDeque::with_capacity(TX_HISTORY_LEN),
            errors: 0,
        }
    }

    /// Watermark of the most recent successfully observed sample.
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Advance the watermark. Never moves backwards.
    pub fn advance_last_seen(&mut self, ts: u64) {
        self.last_seen = self.last_seen.max(ts);
    }

    /// Consecutive failed attempts.
    pub fn errors(&self) -> u32 {
        self.errors
    }

    /// Successful transmission timestamps, most recent first.
    pub fn tx_history(&self) -> impl Iterator<Item = u64> + '_ {
        self.tx_history.iter().copied()
    }

    /// Record a successful transmission and clear the failure streak.
    pub fn add_successful_tx(&mut self, ts: u64) {
        self.tx_history.push_front(ts);
        self.tx_history.truncate(TX_HISTORY_LEN);
        self.errors = 0;
    }

    /// Record a failed attempt.
    pub fn inc_error(&mut self) {
        self.errors += 1;
    }

    /// Recompute `due_at` from the current state.
    ///
    /// Failure streak wins: `POSTPONE * BACKOFF^(errors-1)` clamped to
    /// `[POSTPONE, MAX_TX_INTERVAL]`. With fewer than two recorded
    /// transmissions there is nothing to estimate from, so the minimum
    /// interval applies. Otherwise the interval is the median delta of the
    /// recorded cadence, clamped, measured from the latest transmission.
    pub fn update_due_at(&mut self, now: u64) {
        if self.errors > 0 {
            let delay = clamp(
                POSTPONE.saturating_mul(BACKOFF.saturating_pow(self.errors - 1)),
                POSTPONE,
                MAX_TX_INTERVAL,
            );
            self.due_at = now + delay + LOGGER_TX_DELAY;
            return;
        }

        if self.tx_history.len() < 2 {
            self.due_at = now + MIN_TX_INTERVAL + LOGGER_TX_DELAY;
            return;
        }

        let interval = clamp(self.median_delta(), MIN_TX_INTERVAL, MAX_TX_INTERVAL);
        self.due_at = self.tx_history[0] + interval + LOGGER_TX_DELAY;
    }

    /// Median of the deltas between adjacent history entries.
    ///
    /// History is most-recent-first, so each delta is `ts[i] - ts[i+1]`.
    /// Even-length delta sets take the floored mean of the two middle
    /// values.
    fn median_delta(&self) -> u64 {
        let mut deltas: Vec<u64> = self
            .tx_history
            .iter()
            .zip(self.tx_history.iter().skip(1))
            .map(|(newer, older)| newer.saturating_sub(*older))
            .collect();
        deltas.sort_unstable();

        let n = deltas.len();
        if n == 0 {
            return MIN_TX_INTERVAL;
        }
        if n % 2 == 1 {
            deltas[n / 2]
        } else {
            (deltas[n / 2 - 1] + deltas[n / 2]) / 2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_history_uses_min_interval() {
        let mut s = Schedule::new(0, 0);
        s.update_due_at(1_000);
        assert_eq!(s.due_at, 1_000 + MIN_TX_INTERVAL + LOGGER_TX_DELAY);

        // one entry is still not enough for an estimate
        s.add_successful_tx(900);
        s.update_due_at(1_000);
        assert_eq!(s.due_at, 1_000 + MIN_TX_INTERVAL + LOGGER_TX_DELAY);
    }

    #[test]
    fn test_backoff_escalation() {
        let mut s = Schedule::new(0, 0);
        let now = 10_000;

        s.inc_error();
        s.update_due_at(now);
        assert_eq!(s.due_at, now + 80); // 60 + 20

        s.inc_error();
        s.update_due_at(now);
        assert_eq!(s.due_at, now + 620); // 600 + 20

        s.inc_error();
        s.update_due_at(now);
        assert_eq!(s.due_at, now + 3620); // saturated at MAX_TX_INTERVAL

        // stays saturated no matter how deep the streak goes
        for _ in 0..40 {
            s.inc_error();
        }
        s.update_due_at(now);
        assert_eq!(s.due_at, now + MAX_TX_INTERVAL + LOGGER_TX_DELAY);
    }

    #[test]
    fn test_backoff_delay_bounds() {
        for errors in 1..20u32 {
            let mut s = Schedule::new(0, 0);
            for _ in 0..errors {
                s.inc_error();
            }
            s.update_due_at(0);
            let delay = s.due_at - LOGGER_TX_DELAY;
            assert!((POSTPONE..=MAX_TX_INTERVAL).contains(&delay));
        }
    }

    #[test]
    fn test_adaptive_cadence_from_history() {
        let t = 1_700_000_000;
        let mut s = Schedule::new(0, 0);
        for ts in [t - 4000, t - 3000, t - 2000, t - 1000, t] {
            s.add_successful_tx(ts);
        }
        s.update_due_at(t + 5);
        // deltas are all 1000, median 1000, within bounds
        assert_eq!(s.due_at, t + 1000 + LOGGER_TX_DELAY);
    }

    #[test]
    fn test_cadence_clamped_to_bounds() {
        let t = 1_700_000_000;

        // 10 s cadence clamps up to MIN_TX_INTERVAL
        let mut fast = Schedule::new(0, 0);
        for ts in [t - 30, t - 20, t - 10, t] {
            fast.add_successful_tx(ts);
        }
        fast.update_due_at(t);
        assert_eq!(fast.due_at, t + MIN_TX_INTERVAL + LOGGER_TX_DELAY);

        // 2 h cadence clamps down to MAX_TX_INTERVAL
        let mut slow = Schedule::new(0, 0);
        for ts in [t - 14_400, t - 7_200, t] {
            slow.add_successful_tx(ts);
        }
        slow.update_due_at(t);
        assert_eq!(slow.due_at, t + MAX_TX_INTERVAL + LOGGER_TX_DELAY);
    }

    #[test]
    fn test_even_delta_count_takes_floored_mean() {
        let t = 1_000_000;
        let mut s = Schedule::new(0, 0);
        // deltas (sorted): 900, 1000, 1100, 1200 -> median (1000+1100)/2 = 1050
        for ts in [t - 4200, t - 3000, t - 2000, t - 1100, t] {
            s.add_successful_tx(ts);
        }
        s.update_due_at(t);
        assert_eq!(s.due_at, t + 1050 + LOGGER_TX_DELAY);
    }

    #[test]
    fn test_history_bounded() {
        let mut s = Schedule::new(0, 0);
        for i in 0..20 {
            s.add_successful_tx(i * 100);
        }
        assert_eq!(s.tx_history().count(), TX_HISTORY_LEN);
        // most recent first
        assert_eq!(s.tx_history().next(), Some(1_900));
    }

    #[test]
    fn test_success_resets_error_streak() {
        let mut s = Schedule::new(0, 0);
        s.inc_error();
        s.inc_error();
        assert_eq!(s.errors(), 2);
        s.add_successful_tx(123);
        assert_eq!(s.errors(), 0);
    }

    #[test]
    fn test_watermark_is_monotone() {
        let mut s = Schedule::new(1_000, 0);
        s.advance_last_seen(2_000);
        assert_eq!(s.last_seen(), 2_000);
        s.advance_last_seen(1_500);
        assert_eq!(s.last_seen(), 2_000);
    }
}
