// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level engine runner: wires every component into a [`Store`], serves
//! HTTP/WS, and drives the two shutdown paths (`spec.md` §5 Cancellation).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::detector::Detector;
use crate::manager::Manager;
use crate::pty;
use crate::record::Recorder;
use crate::session_state::SessionState;
use crate::transport::{self, Store};

/// Outcome of a completed run, consumed by `main` to pick a process exit code.
pub struct RunResult {
    pub session_dir: PathBuf,
    pub exit_code: i32,
}

/// Either shutdown path defined in `spec.md` §5: `finish` (client-initiated
/// or shell exit) gets a ~3s graceful-shutdown deadline, `signal`
/// (SIGINT/SIGTERM) gets ~5s.
enum ShutdownReason {
    Finish,
    Signal,
}

/// If `result` is `Err`, record it against `manager` as a failed session and
/// propagate. Used for the startup sequence, where every step after the
/// session directory exists must leave a coherent `metadata.json` behind.
macro_rules! fatal {
    ($manager:expr, $result:expr) => {
        match $result {
            Ok(v) => v,
            Err(e) => {
                let err = anyhow::Error::from(e);
                let _ = $manager.fail(&err);
                return Err(err);
            }
        }
    };
}

pub async fn run(config: Config) -> anyhow::Result<RunResult> {
    crate::config::init_tracing(&config);
    config.validate()?;
    info!(motd = %config.motd, "{}", config.motd);

    let session_state = Arc::new(SessionState::new(
        config.reconnect_window(),
        config.rolling_buffer_cap,
        config.cols,
        config.rows,
    ));

    let manager = Arc::new(Manager::create(
        &config.output_dir,
        &config.candidate_name,
        &session_state.reconnect_token(),
        config.reconnect_window_secs,
    )?);
    info!(dir = %manager.dir().display(), id = %manager.id(), "session created");

    let recorder = Arc::new(fatal!(manager, Recorder::open(manager.dir(), config.flush_interval())));
    let flush_ticker = recorder.clone().spawn_flush_ticker();

    let detector = Arc::new(Detector::new(config.input_rate_limit));

    let home_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/tmp"));
    let (pty_handle, mut pty_join) = fatal!(
        manager,
        pty::spawn_shell(pty::SpawnOptions {
            shell: config.shell.clone(),
            cols: config.cols,
            rows: config.rows,
            network_isolated: config.network_isolated,
            home_dir,
            user: config.candidate_name.clone(),
        })
    );

    let config = Arc::new(config);
    let store = Arc::new(Store::new(
        config.clone(),
        recorder.clone(),
        detector.clone(),
        session_state,
        pty_handle,
        manager.clone(),
    ));

    let router = transport::build_router(store.clone());
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = fatal!(manager, TcpListener::bind(&addr).await.context("bind HTTP listener"));
    info!(%addr, "HTTP listening");

    let http_shutdown = CancellationToken::new();
    let server_handle = {
        let http_shutdown = http_shutdown.clone();
        tokio::spawn(async move {
            let result =
                axum::serve(listener, router).with_graceful_shutdown(http_shutdown.cancelled_owned()).await;
            if let Err(e) = result {
                error!(error = %e, "http server error");
            }
        })
    };

    let reason = tokio::select! {
        _ = store.wait_finish() => ShutdownReason::Finish,
        result = &mut pty_join => {
            match result {
                Ok(Ok(status)) => debug!(?status, "shell exited"),
                Ok(Err(e)) => warn!(error = %e, "pty io loop error"),
                Err(e) => warn!(error = %e, "pty task panicked"),
            }
            store.raise_finish();
            ShutdownReason::Finish
        }
        _ = wait_for_shutdown_signal() => {
            info!("shutdown signal received");
            ShutdownReason::Signal
        }
    };

    let deadline = match reason {
        ShutdownReason::Finish => Duration::from_secs(3),
        ShutdownReason::Signal => Duration::from_secs(5),
    };

    // Close broker first (unblocks outbound), then recorder (final flush),
    // then finalize metadata — spec.md §5 shutdown ordering.
    store.shutdown.cancel();
    store.pty.close();
    recorder.stop_flush_ticker();
    let _ = flush_ticker.await;
    recorder.close();

    if let Err(e) = store.manager.complete(store.detector.events()) {
        warn!(error = %e, "failed to finalize session metadata");
        let _ = store.manager.fail(&e);
    }

    tokio::time::sleep(Duration::from_millis(500)).await;

    http_shutdown.cancel();
    let _ = tokio::time::timeout(deadline, server_handle).await;

    Ok(RunResult { session_dir: manager.dir().to_path_buf(), exit_code: 0 })
}

/// Wait for SIGTERM or SIGINT. On platforms without `tokio::signal::unix`
/// support this would need a different primitive; the engine targets Linux.
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).ok();
    let mut sigint = signal(SignalKind::interrupt()).ok();

    tokio::select! {
        _ = recv_or_pending(&mut sigterm) => info!("received SIGTERM"),
        _ = recv_or_pending(&mut sigint) => info!("received SIGINT"),
    }
}

async fn recv_or_pending(signal: &mut Option<tokio::signal::unix::Signal>) {
    match signal {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}
