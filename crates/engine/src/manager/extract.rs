// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command extraction (`spec.md` §6): replays `keystrokes.log` into a line
//! buffer honoring basic line-editing control characters and writes
//! `commands.log`.

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

const CR: u8 = 0x0d;
const LF: u8 = 0x0a;
const BS: u8 = 0x08;
const DEL: u8 = 0x7f;
const CTRL_C: u8 = 0x03;
const CTRL_U: u8 = 0x15;

/// Parse one `keystrokes.log` line of the form `<ms> <quoted_bytes>` into
/// `(ms, raw_bytes)`. Returns `None` for malformed lines (skipped, not
/// fatal — extraction is best-effort).
fn parse_line(line: &str) -> Option<(u64, Vec<u8>)> {
    let (ms_str, quoted) = line.split_once(' ')?;
    let ms = ms_str.parse::<u64>().ok()?;
    let bytes = unquote_bytes(quoted)?;
    Some((ms, bytes))
}

fn unquote_bytes(quoted: &str) -> Option<Vec<u8>> {
    let inner = quoted.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = Vec::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next()? {
            '"' => out.push(b'"'),
            '\\' => out.push(b'\\'),
            'n' => out.push(LF),
            'r' => out.push(CR),
            't' => out.push(b'\t'),
            'x' => {
                let hi = chars.next()?;
                let lo = chars.next()?;
                let byte = u8::from_str_radix(&format!("{hi}{lo}"), 16).ok()?;
                out.push(byte);
            }
            _ => return None,
        }
    }
    Some(out)
}

struct Commit {
    ms: u64,
    text: String,
}

/// Replay the keystroke stream into committed command lines.
fn replay(keystrokes_log: &str) -> Vec<Commit> {
    let mut commits = Vec::new();
    let mut line_buf = String::new();
    let mut first_ms = None;

    for log_line in keystrokes_log.lines() {
        let Some((ms, bytes)) = parse_line(log_line) else { continue };
        if first_ms.is_none() {
            first_ms = Some(ms);
        }
        for &b in &bytes {
            match b {
                CR | LF => {
                    if !line_buf.is_empty() {
                        commits.push(Commit { ms, text: std::mem::take(&mut line_buf) });
                    }
                }
                BS | DEL => {
                    line_buf.pop();
                }
                CTRL_C | CTRL_U => {
                    line_buf.clear();
                }
                0x20..=0x7e => line_buf.push(b as char),
                _ => {}
            }
        }
    }

    commits
}

/// Extract commands from `keystrokes_path` into `commands_path` (mode 0400
/// once written). A missing `keystrokes.log` yields an empty `commands.log`.
pub fn extract_commands(keystrokes_path: &Path, commands_path: &Path) -> anyhow::Result<()> {
    let keystrokes_log = std::fs::read_to_string(keystrokes_path).unwrap_or_default();
    let commits = replay(&keystrokes_log);

    let mut out = String::new();
    for commit in &commits {
        out.push_str(&commit.ms.to_string());
        out.push(' ');
        out.push_str(&commit.text);
        out.push('\n');
    }
    std::fs::write(commands_path, out)?;
    std::fs::set_permissions(commands_path, Permissions::from_mode(0o400))?;
    Ok(())
}

#[cfg(test)]
#[path = "extract_tests.rs"]
mod tests;
