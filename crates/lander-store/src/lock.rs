//! Cooperative file locks with an owner token and a liveness probe.
//!
//! A lock is a file created with `create_new` holding `pid=<pid>\nutc=<ts>`.
//! A waiter that finds the lock owned by a dead process reclaims it. Dropping
//! the guard removes the file, but only if it still carries our token.

use chrono::Utc;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A lock file with no parseable owner is treated as a crashed writer once it
/// is this old.
const UNOWNED_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("lock busy: {lock_path} (held by {owner})")]
    Busy { lock_path: String, owner: String },

    #[error("timed out after {waited_ms}ms waiting for lock {lock_path} (held by {owner})")]
    Timeout {
        lock_path: String,
        owner: String,
        waited_ms: u128,
    },

    #[error("failed to acquire lock {lock_path}: {message}")]
    Io { lock_path: String, message: String },
}

impl LockError {
    fn io(lock_path: &Path, message: impl Into<String>) -> Self {
        Self::Io {
            lock_path: lock_path.display().to_string(),
            message: message.into(),
        }
    }
}

/// `<path>.lock`, colocated with the resource it guards.
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut lock: OsString = path.as_os_str().to_os_string();
    lock.push(".lock");
    PathBuf::from(lock)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOwner {
    pub pid: u32,
    pub utc: Option<String>,
}

impl LockOwner {
    pub fn parse(text: &str) -> Option<Self> {
        let mut pid = None;
        let mut utc = None;
        for line in text.lines() {
            if let Some(value) = line.strip_prefix("pid=") {
                pid = value.trim().parse::<u32>().ok();
            } else if let Some(value) = line.strip_prefix("utc=") {
                utc = Some(value.trim().to_string());
            }
        }
        pid.map(|pid| Self { pid, utc })
    }

    pub fn is_alive(&self) -> bool {
        pid_is_alive(self.pid)
    }
}

impl std::fmt::Display for LockOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.utc {
            Some(utc) => write!(f, "pid {} since {utc}", self.pid),
            None => write!(f, "pid {}", self.pid),
        }
    }
}

/// Signal-0 probe. `EPERM` means the process exists under another user.
pub fn pid_is_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Current owner of a lock file, if the file exists and is parseable.
pub fn lock_owner(lock_path: &Path) -> Option<LockOwner> {
    fs::read_to_string(lock_path)
        .ok()
        .and_then(|text| LockOwner::parse(&text))
}

/// True when `lock_path` exists and its owner process is alive.
pub fn is_held_live(lock_path: &Path) -> bool {
    lock_owner(lock_path).is_some_and(|owner| owner.is_alive())
}

#[derive(Debug)]
pub struct FileLock {
    lock_path: PathBuf,
    token: String,
}

impl FileLock {
    /// One attempt, reclaiming an abandoned lock at most once.
    pub fn try_acquire(lock_path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| LockError::io(lock_path, e.to_string()))?;
        }

        let mut reclaimed = false;
        loop {
            let token = format!("pid={}\nutc={}\n", std::process::id(), Utc::now().to_rfc3339());
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(lock_path)
            {
                Ok(mut file) => {
                    file.write_all(token.as_bytes())
                        .and_then(|()| file.sync_all())
                        .map_err(|e| {
                            let _ = fs::remove_file(lock_path);
                            LockError::io(lock_path, e.to_string())
                        })?;
                    return Ok(Self {
                        lock_path: lock_path.to_path_buf(),
                        token,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    let owner = match fs::read_to_string(lock_path) {
                        Ok(text) => text,
                        // Released between our create and read.
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                        Err(e) => return Err(LockError::io(lock_path, e.to_string())),
                    };
                    if !reclaimed && is_abandoned(lock_path, &owner) {
                        reclaim(lock_path, &owner)?;
                        reclaimed = true;
                        continue;
                    }
                    return Err(LockError::Busy {
                        lock_path: lock_path.display().to_string(),
                        owner: describe_owner(&owner),
                    });
                }
                Err(err) => return Err(LockError::io(lock_path, err.to_string())),
            }
        }
    }

    /// Poll `try_acquire` until it succeeds or `timeout` elapses.
    pub fn acquire(lock_path: &Path, timeout: Duration) -> Result<Self, LockError> {
        let started = Instant::now();
        loop {
            match Self::try_acquire(lock_path) {
                Ok(lock) => return Ok(lock),
                Err(LockError::Busy { lock_path, owner }) => {
                    if started.elapsed() >= timeout {
                        return Err(LockError::Timeout {
                            lock_path,
                            owner,
                            waited_ms: started.elapsed().as_millis(),
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        match fs::read_to_string(&self.lock_path) {
            Ok(text) if text == self.token => {
                let _ = fs::remove_file(&self.lock_path);
            }
            Ok(_) => warn!(
                lock = %self.lock_path.display(),
                "lock was taken over by another owner; leaving it in place"
            ),
            Err(_) => {}
        }
    }
}

fn is_abandoned(lock_path: &Path, content: &str) -> bool {
    match LockOwner::parse(content) {
        Some(owner) => !owner.is_alive(),
        None => fs::metadata(lock_path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age >= UNOWNED_GRACE),
    }
}

fn reclaim(lock_path: &Path, seen: &str) -> Result<(), LockError> {
    // Only remove the exact lock we judged abandoned.
    match fs::read_to_string(lock_path) {
        Ok(current) if current == seen => {}
        Ok(_) => return Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(LockError::io(lock_path, e.to_string())),
    }
    warn!(
        lock = %lock_path.display(),
        owner = %describe_owner(seen),
        "reclaiming abandoned lock"
    );
    match fs::remove_file(lock_path) {
        Ok(()) => {
            debug!(lock = %lock_path.display(), "abandoned lock removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LockError::io(lock_path, e.to_string())),
    }
}

fn describe_owner(content: &str) -> String {
    LockOwner::parse(content)
        .map(|owner| owner.to_string())
        .unwrap_or_else(|| "unknown owner".to_string())
}
