use std::time::Instant;

use tempfile::tempdir;

use crate::event_log::AntiCheatEvent;

use super::*;

#[test]
fn empty_session_is_clean() {
    let dir = tempdir().unwrap();
    let log = EventLog::new();
    let report = analyze(dir.path(), &log).unwrap();
    assert_eq!(report.verdict, Verdict::Clean);
    assert_eq!(report.suspicion_score, 0);
    assert_eq!(report.typing.total_keystrokes, 0);
}

#[test]
fn paste_attempt_raises_suspicion_score() {
    let dir = tempdir().unwrap();
    let log = EventLog::new();
    log.push(AntiCheatEvent::paste_attempt(Instant::now(), 80));
    let report = analyze(dir.path(), &log).unwrap();
    assert_eq!(report.suspicion_score, 30);
    assert_ne!(report.verdict, Verdict::Clean);
}

#[test]
fn many_violations_reach_suspicious_verdict() {
    let dir = tempdir().unwrap();
    let log = EventLog::new();
    for _ in 0..3 {
        log.push(AntiCheatEvent::paste_attempt(Instant::now(), 80));
    }
    let report = analyze(dir.path(), &log).unwrap();
    assert_eq!(report.suspicion_score, 90);
    assert_eq!(report.verdict, Verdict::Suspicious);
}

#[test]
fn event_summary_counts_by_severity_and_type() {
    let dir = tempdir().unwrap();
    let log = EventLog::new();
    log.push(AntiCheatEvent::rapid_input(Instant::now(), 50));
    log.push(AntiCheatEvent::rapid_input(Instant::now(), 55));
    let report = analyze(dir.path(), &log).unwrap();
    assert_eq!(report.events.total, 2);
    assert_eq!(report.events.counts["warning:rapid_input"], 2);
}

#[test]
fn typing_stats_compute_wpm_from_keystrokes_log() {
    let dir = tempdir().unwrap();
    let keystrokes = "0 \"a\"\n1000 \"bb\"\n2000 \"ccc\"\n";
    std::fs::write(dir.path().join("keystrokes.log"), keystrokes).unwrap();

    let log = EventLog::new();
    let report = analyze(dir.path(), &log).unwrap();
    assert_eq!(report.typing.total_keystrokes, 6);
    assert!(report.typing.average_wpm > 0.0);
}

#[test]
fn count_quoted_bytes_handles_hex_escapes() {
    assert_eq!(count_quoted_bytes("\"ab\\x0a\""), 3);
    assert_eq!(count_quoted_bytes("\"\""), 0);
}
