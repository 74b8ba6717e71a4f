// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::ffi::CString;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::Bytes;
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execvp, setgid, setuid, ForkResult, Gid, Pid, Uid};
use tokio::io::unix::AsyncFd;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::nbio::{read_chunk, set_nonblocking, write_all, PtyFd};

/// Exit status of the candidate's shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// Parameters for spawning the PTY-backed shell.
pub struct SpawnOptions {
    pub shell: String,
    pub cols: u16,
    pub rows: u16,
    pub network_isolated: bool,
    pub home_dir: PathBuf,
    pub user: String,
}

/// A command sent to the PTY I/O loop.
pub enum PtyCommand {
    Write(Bytes),
    Resize(u16, u16),
}

/// Shared handle to a running PTY session.
///
/// Output is distributed through a broadcast channel so the WS Bridge and
/// the Recorder can each hold an independent subscription without blocking
/// the PTY I/O loop or each other; input and resize requests go through an
/// mpsc channel into that same loop.
#[derive(Clone)]
pub struct PtyHandle {
    input: mpsc::Sender<PtyCommand>,
    output: broadcast::Sender<Bytes>,
    child_pid: Pid,
}

impl PtyHandle {
    /// Forward bytes to the child's stdin.
    pub async fn write(&self, data: Bytes) -> anyhow::Result<()> {
        self.input.send(PtyCommand::Write(data)).await.context("pty input channel closed")
    }

    /// Request a window-size change.
    pub async fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        self.input.send(PtyCommand::Resize(cols, rows)).await.context("pty input channel closed")
    }

    /// Subscribe to a copy of every output chunk emitted from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.output.subscribe()
    }

    pub fn child_pid(&self) -> i32 {
        self.child_pid.as_raw()
    }

    /// Idempotent, best-effort shutdown: SIGHUP immediately, SIGKILL after a
    /// short grace period. Safe to call more than once.
    pub fn close(&self) {
        let _ = kill(self.child_pid, Signal::SIGHUP);
        let pid = self.child_pid;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = kill(pid, Signal::SIGKILL);
        });
    }
}

/// Spawn the candidate's shell on a new PTY and run its I/O loop as a
/// detached task.
///
/// Returns a [`PtyHandle`] for interacting with the session and a
/// `JoinHandle` that resolves to the shell's [`ExitStatus`] once it exits
/// and has been reaped.
// forkpty leaves the child process partially initialized until exec; the
// unsafe surface is confined to this call and the resize ioctl below.
#[allow(unsafe_code)]
pub fn spawn(opts: SpawnOptions) -> anyhow::Result<(PtyHandle, JoinHandle<anyhow::Result<ExitStatus>>)> {
    let winsize = Winsize { ws_col: opts.cols, ws_row: opts.rows, ws_xpixel: 0, ws_ypixel: 0 };

    // SAFETY: forkpty's child branch is partially initialized until exec;
    // only async-signal-safe calls are made before execvp.
    let result = unsafe { forkpty(&winsize, None) }.context("forkpty failed")?;
    let ForkptyResult { master, fork_result } = result;

    match fork_result {
        ForkResult::Child => {
            if opts.network_isolated && Uid::effective().is_root() {
                let uid = pick_sandbox_uid();
                let _ = setgid(Gid::from_raw(uid));
                let _ = setuid(Uid::from_raw(uid));
            }

            std::env::set_var("TERM", "xterm-256color");
            std::env::set_var("COLORTERM", "truecolor");
            std::env::set_var("HOME", opts.home_dir.as_os_str());
            std::env::set_var("USER", &opts.user);
            std::env::set_var("PATH", "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin");
            let _ = std::env::set_current_dir(&opts.home_dir);

            let shell_c = match CString::new(opts.shell.as_bytes()) {
                Ok(c) => c,
                Err(_) => std::process::exit(127),
            };
            let _ = execvp(&shell_c, &[shell_c.clone()]);
            // execvp only returns on failure.
            std::process::exit(127);
        }
        ForkResult::Parent { child } => {
            set_nonblocking(&master)?;
            let afd = AsyncFd::new(PtyFd(master)).context("AsyncFd::new failed")?;
            let (input_tx, input_rx) = mpsc::channel(256);
            let (output_tx, _) = broadcast::channel(1024);
            let handle = PtyHandle { input: input_tx, output: output_tx.clone(), child_pid: child };

            let join = tokio::spawn(run_io_loop(afd, input_rx, output_tx, child));
            Ok((handle, join))
        }
    }
}

async fn run_io_loop(
    master: AsyncFd<PtyFd>,
    mut input_rx: mpsc::Receiver<PtyCommand>,
    output_tx: broadcast::Sender<Bytes>,
    pid: Pid,
) -> anyhow::Result<ExitStatus> {
    let mut buf = vec![0u8; 8192];
    let mut input_closed = false;

    loop {
        if input_closed {
            match read_chunk(&master, &mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let _ = output_tx.send(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                Err(e) => return Err(e.into()),
            }
        } else {
            tokio::select! {
                result = read_chunk(&master, &mut buf) => {
                    match result {
                        Ok(0) => break,
                        Ok(n) => {
                            let _ = output_tx.send(Bytes::copy_from_slice(&buf[..n]));
                        }
                        Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                        Err(e) => return Err(e.into()),
                    }
                }
                command = input_rx.recv() => {
                    match command {
                        Some(PtyCommand::Write(data)) => write_all(&master, &data).await?,
                        Some(PtyCommand::Resize(cols, rows)) => {
                            if let Err(e) = resize_pty(&master, cols, rows) {
                                warn!(error = %e, "pty resize failed");
                            }
                        }
                        None => input_closed = true,
                    }
                }
            }
        }
    }

    let status =
        tokio::task::spawn_blocking(move || wait_for_exit(pid)).await.context("join wait thread")??;
    debug!(?status, "pty child exited");
    Ok(status)
}

// TIOCSWINSZ is a simple ioctl taking a fully-initialized Winsize; unsafe is
// confined to the single libc::ioctl call.
#[allow(unsafe_code)]
fn resize_pty(master: &AsyncFd<PtyFd>, cols: u16, rows: u16) -> anyhow::Result<()> {
    let ws = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };
    // SAFETY: TIOCSWINSZ only reads `ws` and sets the PTY's window size.
    let ret = unsafe { libc::ioctl(master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
    if ret < 0 {
        bail!("TIOCSWINSZ ioctl failed: {}", std::io::Error::last_os_error());
    }
    Ok(())
}

fn wait_for_exit(pid: Pid) -> anyhow::Result<ExitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ExitStatus { code: Some(code), signal: None }),
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                return Ok(ExitStatus { code: None, signal: Some(sig as i32) })
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => bail!("waitpid failed: {e}"),
        }
    }
}

/// Picks a sandbox UID/GID in `[10000, 60000)` for the isolated child.
fn pick_sandbox_uid() -> u32 {
    use rand::Rng;
    rand::rng().random_range(10_000u32..60_000u32)
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
