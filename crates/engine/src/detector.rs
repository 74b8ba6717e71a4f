// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Anti-cheat detector (`spec.md` §4.6): combines the rate/burst meters with
//! the event log to classify each input chunk and surface running
//! statistics. `check()` always returns an admission, never itself drops
//! data — `allowed` mirrors the (advisory) rate meter verdict only. The
//! WS Bridge owns the actual hard-block decision, checking chunk length
//! against [`HARD_BLOCK_CHUNK_CHARS`] independently of this module; a burst
//! large enough to cross [`PASTE_ATTEMPT_BURST_CHARS`] raises a critical
//! `paste_attempt` event but is never itself a block, only advisory.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::event_log::{AntiCheatEvent, EventLog, Severity};
use crate::meter::{BurstMeter, RateMeter};

/// A single input chunk exceeding this length in one read is hard-blocked
/// at the WS Bridge.
pub const HARD_BLOCK_CHUNK_CHARS: usize = 20;
/// A burst exceeding this many chars within the burst window raises an
/// advisory `paste_attempt` event. Not a block threshold: per the burst
/// boundary scenario, a large cumulative burst still reaches the PTY.
pub const PASTE_ATTEMPT_BURST_CHARS: usize = 30;
const BURST_WINDOW: Duration = Duration::from_millis(100);
/// Multi-character chunks arriving faster than this after the previous
/// keystroke are flagged as a typing anomaly.
const TYPING_ANOMALY_THRESHOLD: Duration = Duration::from_millis(50);

/// Verdict returned for a single processed input chunk. Advisory only —
/// `allowed` mirrors the rate meter's verdict and is always `true`; the
/// WS Bridge decides hard-block independently of this struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub current_rate: usize,
}

struct Timing {
    last_input_at: Option<Instant>,
    total_keystrokes: u64,
    started_at: Instant,
}

/// Runtime statistics for reporting / analysis.
#[derive(Debug, Clone, Copy)]
pub struct DetectorStats {
    pub total_keystrokes: u64,
    pub elapsed: Duration,
    pub words_per_minute: f64,
    pub current_rate: usize,
}

/// Combines the rate meter, burst meter and event log into the session's
/// anti-cheat pipeline.
pub struct Detector {
    rate: RateMeter,
    burst: BurstMeter,
    events: EventLog,
    timing: Mutex<Timing>,
}

impl Detector {
    pub fn new(max_chars_per_second: u32) -> Self {
        Self {
            rate: RateMeter::new(max_chars_per_second),
            burst: BurstMeter::new(PASTE_ATTEMPT_BURST_CHARS as u32, BURST_WINDOW),
            events: EventLog::new(),
            timing: Mutex::new(Timing {
                last_input_at: None,
                total_keystrokes: 0,
                started_at: Instant::now(),
            }),
        }
    }

    /// Process one chunk of raw keystroke input at `now`.
    pub fn check(&self, now: Instant, chunk: &[u8]) -> Admission {
        let len = chunk.len();

        let rate_admission = self.rate.admit(now, len);
        if rate_admission.violation {
            self.events.push(AntiCheatEvent::rapid_input(now, rate_admission.current_rate));
        }

        let burst_admission = self.burst.admit(now, len);
        if burst_admission.is_burst {
            self.events.push(AntiCheatEvent::paste_attempt(now, burst_admission.burst_chars));
        }

        let time_since_last_ms = {
            let mut timing = self.timing.lock();
            let since = timing.last_input_at.map(|last| now.duration_since(last));
            timing.last_input_at = Some(now);
            timing.total_keystrokes += len as u64;
            since.map(|d| d.as_millis() as u64)
        };
        if let Some(since_ms) = time_since_last_ms {
            if len > 1 && since_ms < TYPING_ANOMALY_THRESHOLD.as_millis() as u64 {
                self.events.push(AntiCheatEvent::typing_anomaly(now, len, since_ms));
            }
        }

        Admission { allowed: rate_admission.allowed, current_rate: rate_admission.current_rate }
    }

    /// Record a client-reported event (window focus / tab visibility / a
    /// client-observed paste). Severity follows the spec's client-report
    /// mapping.
    pub fn record_client_report(&self, now: Instant, report_type: &str, payload: serde_json::Value) {
        let severity = match report_type {
            "paste_attempt" => Severity::Critical,
            "rapid_input" => Severity::Warning,
            "window_focus" | "tab_visibility" => Severity::Info,
            _ => Severity::Info,
        };
        self.events.push(AntiCheatEvent::custom(
            now,
            severity,
            report_type,
            format!("client reported {report_type}"),
            payload,
        ));
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn stats(&self) -> DetectorStats {
        let timing = self.timing.lock();
        let elapsed = timing.started_at.elapsed();
        let minutes = (elapsed.as_secs_f64() / 60.0).max(1.0 / 60.0);
        let words_per_minute = (timing.total_keystrokes as f64 / 5.0) / minutes;
        DetectorStats {
            total_keystrokes: timing.total_keystrokes,
            elapsed,
            words_per_minute,
            current_rate: 0,
        }
    }
}

#[cfg(test)]
#[path = "detector_tests.rs"]
mod tests;
