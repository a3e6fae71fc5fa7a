//! The merge-queue daemon: a single-instance poll loop plus the control
//! surface used by `lander daemon start|stop|status|wake`.
//!
//! Single instance is enforced by `.lander/daemon.pid`, a lock file in the
//! same `pid=`/`utc=` format as every other lock, so a crashed daemon's file
//! is reclaimed by the next one. `SIGUSR1` wakes the loop early; `SIGTERM`
//! and Ctrl-C stop it between cycles.

use lander_store::{FileLock, LockError, ProjectLayout, StoreError, lock_owner};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::Serialize;
use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::merge_queue::CycleReport;
use crate::project::Project;

const START_TIMEOUT: Duration = Duration::from_secs(5);
const CONTROL_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub poll_interval: Duration,
    /// Run a single cycle and return.
    pub once: bool,
}

/// Run the loop in the current process until a stop signal arrives.
pub async fn run_daemon(project: Arc<Project>, options: DaemonOptions) -> Result<(), EngineError> {
    let pid_path = project.layout().pid_path();
    let _pid_lock = match FileLock::try_acquire(&pid_path) {
        Ok(lock) => lock,
        Err(LockError::Busy { owner, .. }) => {
            return Err(EngineError::Daemon(format!("already running ({owner})")));
        }
        Err(err) => return Err(err.into()),
    };

    let mut wake = signal(SignalKind::user_defined1()).map_err(signal_error)?;
    let mut term = signal(SignalKind::terminate()).map_err(signal_error)?;
    let mut interrupt = signal(SignalKind::interrupt()).map_err(signal_error)?;
    info!(
        root = %project.layout().root().display(),
        pid = std::process::id(),
        poll_secs = options.poll_interval.as_secs(),
        "daemon started"
    );

    loop {
        let cycle_project = Arc::clone(&project);
        let outcome =
            tokio::task::spawn_blocking(move || cycle_project.merge_queue().run_cycle()).await;
        match outcome {
            Ok(Ok(report)) => log_report(&report),
            Ok(Err(err)) => error!(error = %err, "cycle failed"),
            Err(err) => error!(error = %err, "cycle task panicked"),
        }
        if options.once {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(options.poll_interval) => {}
            _ = wake.recv() => debug!("woken early"),
            _ = term.recv() => {
                info!("SIGTERM received, stopping");
                break;
            }
            _ = interrupt.recv() => {
                info!("interrupted, stopping");
                break;
            }
        }
    }

    info!("daemon stopped");
    Ok(())
}

fn signal_error(err: std::io::Error) -> EngineError {
    EngineError::Daemon(format!("cannot install signal handler: {err}"))
}

fn log_report(report: &CycleReport) {
    if report.is_idle() && report.errors.is_empty() {
        debug!("cycle idle");
        return;
    }
    match &report.dispatched {
        Some(dispatched) => info!(
            actions = ?report.actions,
            subject = %dispatched.subject,
            status = %dispatched.status,
            commit = dispatched.commit.as_deref().unwrap_or("-"),
            "cycle finished"
        ),
        None => info!(actions = ?report.actions, pruned = report.pruned.len(), "cycle finished"),
    }
    for err in &report.errors {
        warn!(error = %err, "cycle action error");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub since: Option<String>,
    pub pid_file: PathBuf,
}

/// A pid file whose owner is dead reports as not running.
pub fn daemon_status(layout: &ProjectLayout) -> DaemonStatus {
    let pid_file = layout.pid_path();
    match lock_owner(&pid_file).filter(|owner| owner.is_alive()) {
        Some(owner) => DaemonStatus {
            running: true,
            pid: Some(owner.pid),
            since: owner.utc,
            pid_file,
        },
        None => DaemonStatus {
            running: false,
            pid: None,
            since: None,
            pid_file,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning(u32),
    Started(u32),
}

/// Spawn `exe --root <root> daemon run` detached, logging to `daemon.log`,
/// and wait until it has claimed the pid file.
pub fn start_daemon(layout: &ProjectLayout, exe: &Path) -> Result<StartOutcome, EngineError> {
    if let Some(pid) = daemon_status(layout).pid {
        return Ok(StartOutcome::AlreadyRunning(pid));
    }
    let log_path = layout.daemon_log_path();
    let open_log = || {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| StoreError::Io {
                path: log_path.display().to_string(),
                message: e.to_string(),
            })
    };
    let stdout = open_log()?;
    let stderr = open_log()?;

    let mut child = Command::new(exe)
        .arg("--root")
        .arg(layout.root())
        .args(["daemon", "run"])
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .process_group(0)
        .spawn()
        .map_err(|e| EngineError::Daemon(format!("cannot spawn {}: {e}", exe.display())))?;

    let started = Instant::now();
    while started.elapsed() < START_TIMEOUT {
        if let Some(owner) = lock_owner(&layout.pid_path())
            && owner.pid == child.id()
        {
            info!(pid = owner.pid, "daemon started");
            return Ok(StartOutcome::Started(owner.pid));
        }
        if let Ok(Some(status)) = child.try_wait() {
            return Err(EngineError::Daemon(format!(
                "daemon exited during startup ({status}); see {}",
                log_path.display()
            )));
        }
        thread::sleep(CONTROL_POLL);
    }
    Err(EngineError::Daemon(format!(
        "daemon did not claim {} within {}s; see {}",
        layout.pid_path().display(),
        START_TIMEOUT.as_secs(),
        log_path.display()
    )))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped(u32),
    StillRunning(u32),
}

/// `SIGTERM`, then wait up to `timeout` for the process to go away.
pub fn stop_daemon(layout: &ProjectLayout, timeout: Duration) -> Result<StopOutcome, EngineError> {
    let Some(pid) = daemon_status(layout).pid else {
        return Ok(StopOutcome::NotRunning);
    };
    send(pid, Signal::SIGTERM)?;
    let started = Instant::now();
    while started.elapsed() < timeout {
        if !daemon_status(layout).running {
            info!(pid, "daemon stopped");
            return Ok(StopOutcome::Stopped(pid));
        }
        thread::sleep(CONTROL_POLL);
    }
    warn!(pid, "daemon still running after SIGTERM");
    Ok(StopOutcome::StillRunning(pid))
}

/// Ask a running daemon to start its next cycle now. `None` when no daemon
/// is running.
pub fn wake_daemon(layout: &ProjectLayout) -> Result<Option<u32>, EngineError> {
    let Some(pid) = daemon_status(layout).pid else {
        return Ok(None);
    };
    send(pid, Signal::SIGUSR1)?;
    debug!(pid, "daemon woken");
    Ok(Some(pid))
}

fn send(pid: u32, sig: Signal) -> Result<(), EngineError> {
    let raw = i32::try_from(pid)
        .map_err(|_| EngineError::Daemon(format!("pid {pid} out of range")))?;
    kill(Pid::from_raw(raw), sig)
        .map_err(|e| EngineError::Daemon(format!("cannot signal pid {pid}: {e}")))
}
