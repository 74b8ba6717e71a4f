// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Anti-cheat event log (`spec.md` §4.2).
//!
//! An in-memory, append-only, thread-safe sequence of [`AntiCheatEvent`]s.
//! Durability is the Recorder's concern (`events.log`); this log exists for
//! the lifetime of the session only.

use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity of an anti-cheat event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// A single anti-cheat event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AntiCheatEvent {
    #[serde(skip)]
    pub at: Option<Instant>,
    pub severity: Severity,
    pub event_type: String,
    pub description: String,
    pub payload: Value,
}

impl AntiCheatEvent {
    pub fn new(
        at: Instant,
        severity: Severity,
        event_type: impl Into<String>,
        description: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            at: Some(at),
            severity,
            event_type: event_type.into(),
            description: description.into(),
            payload,
        }
    }

    pub fn paste_attempt(at: Instant, chars: usize) -> Self {
        Self::new(
            at,
            Severity::Critical,
            "paste_attempt",
            format!("burst of {chars} chars exceeded the burst threshold"),
            serde_json::json!({ "chars": chars }),
        )
    }

    pub fn rapid_input(at: Instant, current_rate: usize) -> Self {
        Self::new(
            at,
            Severity::Warning,
            "rapid_input",
            format!("input rate {current_rate} chars/sec exceeded the configured limit"),
            serde_json::json!({ "current_rate": current_rate }),
        )
    }

    pub fn typing_anomaly(at: Instant, chars: usize, time_since_last_ms: u64) -> Self {
        Self::new(
            at,
            Severity::Warning,
            "typing_anomaly",
            format!("{chars} chars arrived {time_since_last_ms}ms after the previous keystroke"),
            serde_json::json!({ "chars": chars, "time_since_last_ms": time_since_last_ms }),
        )
    }

    pub fn paste_blocked(at: Instant, chars: usize) -> Self {
        Self::new(
            at,
            Severity::Critical,
            "paste_blocked",
            format!("chunk of {chars} chars was dropped by the hard-block policy"),
            serde_json::json!({ "chars": chars }),
        )
    }

    pub fn custom(
        at: Instant,
        severity: Severity,
        event_type: impl Into<String>,
        description: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self::new(at, severity, event_type, description, payload)
    }
}

/// Append-only, thread-safe log of [`AntiCheatEvent`]s.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<AntiCheatEvent>>,
}

/// Counts of events grouped by (severity, type).
pub type SeveritySummary = std::collections::BTreeMap<(Severity, String), usize>;

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event to the log.
    pub fn push(&self, event: AntiCheatEvent) {
        self.events.lock().push(event);
    }

    /// Full snapshot copy of the log, in insertion order.
    pub fn snapshot(&self) -> Vec<AntiCheatEvent> {
        self.events.lock().clone()
    }

    /// Snapshot filtered by severity.
    pub fn filter_severity(&self, severity: Severity) -> Vec<AntiCheatEvent> {
        self.events.lock().iter().filter(|e| e.severity == severity).cloned().collect()
    }

    /// Summarize counts by (severity, type).
    pub fn summarize(&self) -> SeveritySummary {
        let mut map = SeveritySummary::new();
        for event in self.events.lock().iter() {
            *map.entry((event.severity, event.event_type.clone())).or_insert(0) += 1;
        }
        map
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[path = "event_log_tests.rs"]
mod tests;
