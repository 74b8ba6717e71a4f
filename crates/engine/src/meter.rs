// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rate and burst meters (`spec.md` §4.1).
//!
//! Both meters are advisory: admission always reports a verdict but never
//! itself rejects. Hard enforcement lives at the WS Bridge.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Sliding-window char/sec rate meter.
pub struct RateMeter {
    max_chars_per_second: u32,
    events: Mutex<VecDeque<(Instant, usize)>>,
}

/// Result of a rate-meter admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateAdmission {
    pub allowed: bool,
    pub current_rate: usize,
    pub violation: bool,
}

impl RateMeter {
    pub fn new(max_chars_per_second: u32) -> Self {
        Self { max_chars_per_second, events: Mutex::new(VecDeque::new()) }
    }

    /// Record an admission of `length` chars at `now` and report the
    /// resulting sliding-window rate. Always advisory: `allowed` is always
    /// `true` from this meter's own verdict (P7).
    pub fn admit(&self, now: Instant, length: usize) -> RateAdmission {
        let mut events = self.events.lock();
        events.push_back((now, length));
        while let Some(&(ts, _)) = events.front() {
            if now.duration_since(ts) > RATE_WINDOW {
                events.pop_front();
            } else {
                break;
            }
        }
        let current_rate: usize = events.iter().map(|(_, len)| *len).sum();
        let violation = current_rate > self.max_chars_per_second as usize;
        RateAdmission { allowed: true, current_rate, violation }
    }

    /// Clear all tracked events (test / session-start reset hook).
    pub fn reset(&self) {
        self.events.lock().clear();
    }
}

/// Fixed-window burst meter.
pub struct BurstMeter {
    max_chars_in_burst: u32,
    burst_window: Duration,
    state: Mutex<BurstState>,
}

#[derive(Default)]
struct BurstState {
    burst_chars: usize,
    last_input: Option<Instant>,
}

/// Result of a burst-meter admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstAdmission {
    pub is_burst: bool,
    pub burst_chars: usize,
}

impl BurstMeter {
    pub fn new(max_chars_in_burst: u32, burst_window: Duration) -> Self {
        Self {
            max_chars_in_burst,
            burst_window,
            state: Mutex::new(BurstState::default()),
        }
    }

    /// Record an admission of `length` chars at `now`.
    ///
    /// Resets the burst accumulator when `now - last_input` is strictly
    /// greater than `burst_window` (P8); exactly-at-window is still the
    /// same burst (tie-break favors the existing accumulator).
    pub fn admit(&self, now: Instant, length: usize) -> BurstAdmission {
        let mut state = self.state.lock();
        let should_reset = match state.last_input {
            None => true,
            Some(last) => now.duration_since(last) > self.burst_window,
        };
        if should_reset {
            state.burst_chars = length;
        } else {
            state.burst_chars += length;
        }
        state.last_input = Some(now);
        let is_burst = state.burst_chars > self.max_chars_in_burst as usize;
        BurstAdmission { is_burst, burst_chars: state.burst_chars }
    }

    /// Reset the burst accumulator (test / session-start reset hook).
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.burst_chars = 0;
        state.last_input = None;
    }
}

#[cfg(test)]
#[path = "meter_tests.rs"]
mod tests;
