// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Post-session analysis (`spec.md` §6): typing statistics, event summary,
//! a suspicion score, and a coarse verdict. Emitted as `analysis.json`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::event_log::{EventLog, Severity};

const VERY_HIGH_WPM: f64 = 150.0;
const VERY_HIGH_WPM_STDDEV: f64 = 80.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingStats {
    pub total_keystrokes: u64,
    pub average_wpm: f64,
    pub median_wpm: f64,
    pub min_wpm: f64,
    pub max_wpm: f64,
    pub interval_stddev_wpm: f64,
    pub anomaly_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSummary {
    pub counts: BTreeMap<String, u64>,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Clean,
    MinorConcerns,
    ReviewRecommended,
    Suspicious,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub typing: TypingStats,
    pub events: EventSummary,
    pub suspicion_score: i64,
    pub verdict: Verdict,
    pub confidence: f64,
}

struct KeystrokeLine {
    ms: u64,
    char_count: usize,
}

fn parse_keystrokes_log(contents: &str) -> Vec<KeystrokeLine> {
    contents
        .lines()
        .filter_map(|line| {
            let (ms_str, quoted) = line.split_once(' ')?;
            let ms = ms_str.parse::<u64>().ok()?;
            // Count escaped bytes, not raw chars, so a `\x0a` counts as one.
            let char_count = count_quoted_bytes(quoted);
            Some(KeystrokeLine { ms, char_count })
        })
        .collect()
}

fn count_quoted_bytes(quoted: &str) -> usize {
    let inner = quoted.trim_matches('"');
    let mut count = 0;
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('x') => {
                    chars.next();
                    chars.next();
                }
                Some(_) => {}
                None => {}
            }
        }
        count += 1;
    }
    count
}

fn typing_stats(keystrokes_log: &str, anomaly_count: u64) -> TypingStats {
    let lines = parse_keystrokes_log(keystrokes_log);
    let total_keystrokes: u64 = lines.iter().map(|l| l.char_count as u64).sum();

    let mut wpm_samples = Vec::new();
    for window in lines.windows(2) {
        let [prev, cur] = window else { continue };
        if cur.ms <= prev.ms {
            continue;
        }
        let minutes = (cur.ms - prev.ms) as f64 / 60_000.0;
        if minutes <= 0.0 {
            continue;
        }
        let wpm = (cur.char_count as f64 / 5.0) / minutes;
        wpm_samples.push(wpm);
    }

    if wpm_samples.is_empty() {
        return TypingStats {
            total_keystrokes,
            average_wpm: 0.0,
            median_wpm: 0.0,
            min_wpm: 0.0,
            max_wpm: 0.0,
            interval_stddev_wpm: 0.0,
            anomaly_count,
        };
    }

    let mut sorted = wpm_samples.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median_wpm = sorted[sorted.len() / 2];
    let min_wpm = sorted[0];
    let max_wpm = sorted[sorted.len() - 1];
    let average_wpm = wpm_samples.iter().sum::<f64>() / wpm_samples.len() as f64;
    let variance = wpm_samples.iter().map(|w| (w - average_wpm).powi(2)).sum::<f64>()
        / wpm_samples.len() as f64;
    let interval_stddev_wpm = variance.sqrt();

    TypingStats { total_keystrokes, average_wpm, median_wpm, min_wpm, max_wpm, interval_stddev_wpm, anomaly_count }
}

fn event_summary(event_log: &EventLog) -> EventSummary {
    let mut counts = BTreeMap::new();
    let mut total = 0u64;
    for ((severity, event_type), count) in event_log.summarize() {
        counts.insert(format!("{}:{event_type}", severity.as_str()), count as u64);
        total += count as u64;
    }
    EventSummary { counts, total }
}

fn suspicion_score(event_log: &EventLog, typing: &TypingStats) -> i64 {
    let mut score = 0i64;
    let paste_critical = event_log
        .filter_severity(Severity::Critical)
        .iter()
        .filter(|e| e.event_type == "paste_attempt")
        .count() as i64;
    let rapid_warning = event_log
        .filter_severity(Severity::Warning)
        .iter()
        .filter(|e| e.event_type == "rapid_input")
        .count() as i64;

    score += paste_critical * 30;
    score += rapid_warning * 10;
    if typing.max_wpm > VERY_HIGH_WPM {
        score += 20;
    }
    if typing.interval_stddev_wpm > VERY_HIGH_WPM_STDDEV {
        score += 15;
    }
    score
}

fn verdict_for(score: i64) -> (Verdict, f64) {
    match score {
        0 => (Verdict::Clean, 0.95),
        1..=29 => (Verdict::MinorConcerns, 0.7),
        30..=59 => (Verdict::ReviewRecommended, 0.6),
        _ => (Verdict::Suspicious, (0.5 + score as f64 / 400.0).min(1.0)),
    }
}

/// Compute the full analysis report from the session directory's logs plus
/// the live in-memory event log (durable `events.log` mirrors the same
/// events; the in-memory log is used here because it is already structured).
pub fn analyze(dir: &Path, event_log: &EventLog) -> anyhow::Result<AnalysisReport> {
    let keystrokes_log = std::fs::read_to_string(dir.join("keystrokes.log")).unwrap_or_default();
    let anomaly_count = event_log
        .filter_severity(Severity::Warning)
        .iter()
        .filter(|e| e.event_type == "typing_anomaly")
        .count() as u64;

    let typing = typing_stats(&keystrokes_log, anomaly_count);
    let events = event_summary(event_log);
    let score = suspicion_score(event_log, &typing);
    let (verdict, confidence) = verdict_for(score);

    Ok(AnalysisReport { typing, events, suspicion_score: score, verdict, confidence })
}

#[cfg(test)]
#[path = "analysis_tests.rs"]
mod tests;
