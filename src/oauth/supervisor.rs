//! Supervision of the OAuth helper process.
//!
//! # Responsibilities
//! - Launch the helper bound to loopback (`PORT`/`HOST` environment)
//! - Track `Starting → Running → Exited` through a readiness probe
//! - Log unexpected exits and restart within a bounded budget
//! - Stop the helper exactly once: SIGTERM, grace period, then SIGKILL
//!
//! # Design Decisions
//! - A single monitor task owns the `Child`; everything else observes a
//!   `watch` snapshot of the process record
//! - Failure to become ready is logged, never fatal; requests keep failing
//!   with 502 until the helper listens
//! - `kill_on_drop` is set so an aborted gateway never leaks the helper

use std::io;
use std::net::SocketAddr;
use std::process::{ExitStatus, Stdio};
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::OAuthConfig;
use crate::observability::metrics;
use crate::resilience::restart_delay;

const MAX_RESTART_DELAY: Duration = Duration::from_secs(30);
const PROBE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn OAuth helper `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    Exited,
}

/// How the helper ended. On unix a signal death has `code == None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Snapshot of the supervised helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: Option<u32>,
    pub address: String,
    pub state: ProcessState,
    pub restarts: u32,
    pub last_exit: Option<ExitInfo>,
}

pub struct OAuthSupervisor {
    record: watch::Receiver<ProcessRecord>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl OAuthSupervisor {
    /// Spawn the helper and start monitoring it.
    ///
    /// Only the first spawn is reported as an error; restarts that fail to
    /// spawn are logged and leave the record `Exited`.
    pub fn launch(config: &OAuthConfig) -> Result<Self, SupervisorError> {
        let child = spawn_child(config)?;
        let pid = child.id();

        tracing::info!(
            pid = ?pid,
            command = %config.command,
            address = %config.target(),
            "OAuth helper started"
        );

        let (record_tx, record_rx) = watch::channel(ProcessRecord {
            pid,
            address: config.address(),
            state: ProcessState::Starting,
            restarts: 0,
            last_exit: None,
        });
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = tokio::spawn(monitor(config.clone(), child, record_tx, stop_rx));

        Ok(Self {
            record: record_rx,
            stop: Mutex::new(Some(stop_tx)),
            task: Mutex::new(Some(task)),
        })
    }

    pub fn state(&self) -> ProcessState {
        self.record.borrow().state
    }

    pub fn record(&self) -> ProcessRecord {
        self.record.borrow().clone()
    }

    /// Watch record changes.
    pub fn subscribe(&self) -> watch::Receiver<ProcessRecord> {
        self.record.clone()
    }

    /// Stop the helper and wait for it to be reaped.
    ///
    /// The first call sends SIGTERM; later calls return the final record
    /// without signalling again.
    pub async fn shutdown(&self) -> ProcessRecord {
        let stop = self.stop.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(stop) = stop {
            let _ = stop.send(());
        }

        let task = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "OAuth supervisor task failed");
            }
        }

        self.record()
    }
}

impl Drop for OAuthSupervisor {
    fn drop(&mut self) {
        // The monitor owns the child with kill_on_drop; aborting it reaps the
        // helper if shutdown was never called.
        if let Some(task) = self.task.get_mut().ok().and_then(|t| t.take()) {
            task.abort();
        }
    }
}

enum Outcome {
    Exited(io::Result<ExitStatus>),
    Stop,
}

async fn monitor(
    config: OAuthConfig,
    mut child: Child,
    record: watch::Sender<ProcessRecord>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut restarts = 0u32;
    let address = probe_address(&config);

    loop {
        let readiness = wait_until_listening(address, config.startup_timeout());
        tokio::pin!(readiness);
        let mut probing = address.is_some();

        let outcome = loop {
            tokio::select! {
                status = child.wait() => break Outcome::Exited(status),
                _ = &mut stop => break Outcome::Stop,
                ready = &mut readiness, if probing => {
                    probing = false;
                    if ready {
                        record.send_modify(|r| r.state = ProcessState::Running);
                        metrics::set_oauth_child_up(true);
                        tracing::info!(address = %config.target(), "OAuth helper is accepting connections");
                    } else {
                        tracing::warn!(
                            address = %config.target(),
                            timeout_secs = config.startup_timeout_secs,
                            "OAuth helper did not start listening in time"
                        );
                    }
                }
            }
        };

        match outcome {
            Outcome::Stop => {
                let exit = terminate(&mut child, config.shutdown_grace()).await;
                tracing::info!(code = ?exit.code, signal = ?exit.signal, "OAuth helper stopped");
                mark_exited(&record, Some(exit));
                return;
            }
            Outcome::Exited(status) => {
                let exit = match status {
                    Ok(status) => Some(ExitInfo::from(status)),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to wait on OAuth helper");
                        None
                    }
                };
                tracing::error!(
                    code = ?exit.and_then(|e| e.code),
                    signal = ?exit.and_then(|e| e.signal),
                    "OAuth helper exited unexpectedly"
                );
                mark_exited(&record, exit);
            }
        }

        // Respawn until one sticks, the budget runs out, or stop is requested.
        loop {
            if restarts >= config.max_restarts {
                if config.max_restarts > 0 {
                    tracing::error!(restarts, "OAuth helper restart budget exhausted");
                }
                // Stay Exited; the stop request only needs acknowledging.
                let _ = (&mut stop).await;
                return;
            }

            restarts += 1;
            let delay = restart_delay(restarts, config.restart_backoff(), MAX_RESTART_DELAY);
            tracing::warn!(attempt = restarts, delay_ms = delay.as_millis() as u64, "Restarting OAuth helper");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut stop => return,
            }

            match spawn_child(&config) {
                Ok(next) => {
                    child = next;
                    let pid = child.id();
                    record.send_modify(|r| {
                        r.pid = pid;
                        r.state = ProcessState::Starting;
                        r.restarts = restarts;
                    });
                    tracing::info!(pid = ?pid, attempt = restarts, "OAuth helper restarted");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, attempt = restarts, "OAuth helper restart failed");
                    record.send_modify(|r| r.restarts = restarts);
                }
            }
        }
    }
}

fn mark_exited(record: &watch::Sender<ProcessRecord>, exit: Option<ExitInfo>) {
    record.send_modify(|r| {
        r.pid = None;
        r.state = ProcessState::Exited;
        r.last_exit = exit;
    });
    metrics::set_oauth_child_up(false);
}

fn spawn_child(config: &OAuthConfig) -> Result<Child, SupervisorError> {
    Command::new(&config.command)
        .args(&config.args)
        .env("PORT", config.port.to_string())
        .env("HOST", &config.host)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| SupervisorError::Spawn {
            command: config.command.clone(),
            source,
        })
}

fn probe_address(config: &OAuthConfig) -> Option<SocketAddr> {
    let host = config.host.trim_start_matches('[').trim_end_matches(']');
    let host = if host.eq_ignore_ascii_case("localhost") {
        "127.0.0.1"
    } else {
        host
    };
    match host.parse() {
        Ok(ip) => Some(SocketAddr::new(ip, config.port)),
        Err(_) => {
            tracing::warn!(host = %config.host, "OAuth host is not an IP address, skipping readiness probe");
            None
        }
    }
}

/// Poll until something accepts TCP connections on `address`.
async fn wait_until_listening(address: Option<SocketAddr>, limit: Duration) -> bool {
    let Some(address) = address else {
        return false;
    };
    let probe = async {
        loop {
            if TcpStream::connect(address).await.is_ok() {
                return;
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    };
    tokio::time::timeout(limit, probe).await.is_ok()
}

async fn terminate(child: &mut Child, grace: Duration) -> ExitInfo {
    if child.id().is_some() {
        if let Err(e) = request_stop(child) {
            tracing::warn!(error = %e, "Failed to signal OAuth helper");
        }
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => return ExitInfo::from(status),
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to wait on OAuth helper"),
            Err(_) => tracing::warn!(
                grace_secs = grace.as_secs(),
                "OAuth helper ignored SIGTERM, killing"
            ),
        }
        if let Err(e) = child.kill().await {
            tracing::warn!(error = %e, "Failed to kill OAuth helper");
        }
    }

    match child.wait().await {
        Ok(status) => ExitInfo::from(status),
        Err(_) => ExitInfo {
            code: None,
            signal: None,
        },
    }
}

#[cfg(unix)]
fn request_stop(child: &mut Child) -> io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    // SAFETY: `pid` belongs to a child we have not reaped yet.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}
