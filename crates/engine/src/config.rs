// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Engine startup configuration, resolved from CLI flags and/or environment
/// variables (`spec.md` §6 environment table).
#[derive(Debug, Clone, Parser)]
#[command(name = "proctor", version, about = "Recorded pseudo-terminal session engine.")]
pub struct Config {
    /// HTTP listen port.
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Candidate label used in the session id and metadata.
    #[arg(long, env = "CANDIDATE_NAME", default_value = "anonymous")]
    pub candidate_name: String,

    /// Declared maximum session duration in seconds (enforcement optional).
    #[arg(long, env = "SESSION_TIMEOUT", default_value = "7200")]
    pub session_timeout_secs: u64,

    /// Reconnect token validity window in seconds.
    #[arg(long, env = "RECONNECT_WINDOW", default_value = "300")]
    pub reconnect_window_secs: u64,

    /// Base directory under which session subdirectories are created.
    #[arg(long, env = "OUTPUT_DIR", default_value = "./sessions")]
    pub output_dir: PathBuf,

    /// Shell program spawned inside the PTY.
    #[arg(long, env = "SHELL", default_value = "/bin/bash")]
    pub shell: String,

    /// Recorder flush period in seconds.
    #[arg(long, env = "FLUSH_INTERVAL", default_value = "10")]
    pub flush_interval_secs: u64,

    /// Chars/sec threshold for the sliding-window rate meter.
    #[arg(long, env = "INPUT_RATE_LIMIT", default_value = "30")]
    pub input_rate_limit: u32,

    /// Informational flag surfaced in `/health` and logs only.
    #[arg(long, env = "NETWORK_ISOLATED", default_value = "true")]
    pub network_isolated: bool,

    /// Informational flag surfaced in logs only.
    #[arg(long, env = "ENABLE_METRICS", default_value = "true")]
    pub enable_metrics: bool,

    /// Server log verbosity (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Message printed to the server log at startup.
    #[arg(long, env = "MOTD", default_value = "recorded session engine starting")]
    pub motd: String,

    /// Log format (json or text).
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Terminal columns for the initial PTY window size.
    #[arg(long, env = "COLS", default_value = "120")]
    pub cols: u16,

    /// Terminal rows for the initial PTY window size.
    #[arg(long, env = "ROWS", default_value = "32")]
    pub rows: u16,

    /// Cap on the in-memory rolling terminal-output buffer, in bytes.
    #[arg(long, env = "ROLLING_BUFFER_CAP", default_value = "102400")]
    pub rolling_buffer_cap: usize,
}

impl Config {
    /// Validate configuration invariants (`spec.md` §6 Validation).
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            anyhow::bail!("PORT must be in [1, 65535]");
        }
        if self.candidate_name.trim().is_empty() {
            anyhow::bail!("CANDIDATE_NAME must be non-empty");
        }
        if self.session_timeout_secs < 60 {
            anyhow::bail!("SESSION_TIMEOUT must be >= 60 seconds");
        }
        if self.output_dir.as_os_str().is_empty() {
            anyhow::bail!("OUTPUT_DIR must be non-empty");
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn reconnect_window(&self) -> Duration {
        Duration::from_secs(self.reconnect_window_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

/// Initialize `tracing` from config. Uses `try_init` so repeated calls from
/// tests are harmless.
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
