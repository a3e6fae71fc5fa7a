//! Collaborator seams: version control, issue tracker, interactive sessions.
//!
//! The engine only ever talks to these traits. Every method is treated as
//! fallible, and remote-facing reads as eventually consistent.

use std::path::Path;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

// ── Version control ──

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VcsError {
    #[error("version-control executable is not available in PATH")]
    NotInstalled,

    #[error("command failed: {args} ({message})")]
    CommandFailed { args: String, message: String },

    #[error("conflict during {args}: {message}")]
    Conflict { args: String, message: String },

    #[error("cannot fast-forward to {rev}")]
    NotFastForward { rev: String },

    #[error("push rejected: {args} ({message})")]
    Rejected { args: String, message: String },

    #[error("unknown revision: {0}")]
    UnknownRevision(String),

    #[error("unable to parse output: {0}")]
    Parse(String),
}

impl VcsError {
    /// Failures worth retrying with backoff (network, remote hiccups).
    pub fn is_transient(&self) -> bool {
        matches!(self, VcsError::CommandFailed { .. })
    }
}

/// Primitive version-control operations against one repository.
///
/// Trunk-mutating calls (`checkout`, `ff_merge`, `merge_commit`) act on the
/// repository root. `rebase` acts in `workdir`, which is either the root or a
/// worktree that has `branch` checked out.
pub trait Vcs: Send + Sync {
    fn repo_root(&self) -> &Path;
    fn fetch(&self, remote: &str, branch: &str) -> Result<(), VcsError>;
    fn checkout(&self, rev: &str) -> Result<(), VcsError>;
    /// Fast-forward the checked-out branch to `rev`, or `NotFastForward`.
    fn ff_merge(&self, rev: &str) -> Result<(), VcsError>;
    /// Point the checked-out branch at `rev`, discarding local-only commits.
    fn reset_hard(&self, rev: &str) -> Result<(), VcsError>;
    /// Replay `branch` onto `onto`. Aborts and returns `Conflict` on conflict.
    fn rebase(&self, workdir: &Path, branch: &str, onto: &str) -> Result<(), VcsError>;
    /// Create a merge commit of `rev` into the checked-out branch. Aborts and
    /// returns `Conflict` on conflict.
    fn merge_commit(&self, rev: &str, message: &str) -> Result<(), VcsError>;
    fn push(&self, remote: &str, branch: &str) -> Result<(), VcsError>;
    fn delete_branch(&self, branch: &str) -> Result<(), VcsError>;
    fn delete_remote_branch(&self, remote: &str, branch: &str) -> Result<(), VcsError>;
    fn is_ancestor(&self, commit: &str, rev: &str) -> Result<bool, VcsError>;
    fn current_head(&self) -> Result<String, VcsError>;
    fn rev_parse(&self, rev: &str) -> Result<Option<String>, VcsError>;
    fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>, VcsError>;
    /// Ask the remote directly for a branch tip, bypassing local tracking refs.
    fn ls_remote(&self, remote: &str, branch: &str) -> Result<Option<String>, VcsError>;
    fn create_worktree(&self, path: &Path, branch: &str) -> Result<(), VcsError>;
    fn remove_worktree(&self, path: &Path) -> Result<(), VcsError>;
}

// ── Issue tracker ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueStatus {
    Open,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("issue not found: {0}")]
    NotFound(String),

    #[error("tracker busy: {0}")]
    Busy(String),

    #[error("tracker storage error: {0}")]
    Storage(String),
}

/// The external issue tracker, reduced to the dependency queries the core
/// needs.
pub trait Tracker: Send + Sync {
    /// Refs that block `issue`.
    fn get_blockers(&self, issue: &str) -> Result<Vec<String>, TrackerError>;
    fn get_status(&self, issue: &str) -> Result<IssueStatus, TrackerError>;
    /// Refs that `issue` blocks (reverse dependency).
    fn find_blocking(&self, issue: &str) -> Result<Vec<String>, TrackerError>;
    /// Best-effort display name (the operation label) for an issue.
    fn resolve_label(&self, issue: &str) -> Result<Option<String>, TrackerError>;
    fn add_blocked_by(&self, issue: &str, blockers: &[String]) -> Result<(), TrackerError>;
    fn close(&self, issue: &str, reason: &str) -> Result<(), TrackerError>;
    /// Open issues tracked under `issue`.
    fn open_children(&self, issue: &str) -> Result<Vec<String>, TrackerError>;
}

// ── Interactive sessions ──

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("failed to launch session: {0}")]
    Launch(String),

    #[error("session host is not configured: {0}")]
    NotConfigured(String),
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    Done,
    Failed(String),
    TimedOut,
}

type KillHook = Box<dyn FnOnce() + Send>;

/// A launched session. Completion arrives on a channel that the host closes
/// when the agent finishes.
pub struct SessionHandle {
    pub id: String,
    done: Receiver<SessionExit>,
    kill: Option<KillHook>,
}

impl SessionHandle {
    pub fn new(id: impl Into<String>, done: Receiver<SessionExit>) -> Self {
        Self {
            id: id.into(),
            done,
            kill: None,
        }
    }

    /// Hook run when the wait times out, to stop the agent.
    pub fn with_kill(mut self, kill: impl FnOnce() + Send + 'static) -> Self {
        self.kill = Some(Box::new(kill));
        self
    }

    /// Block until the session signals completion or `timeout` elapses.
    pub fn wait(mut self, timeout: Duration) -> SessionExit {
        match self.done.recv_timeout(timeout) {
            Ok(exit) => exit,
            Err(RecvTimeoutError::Timeout) => {
                if let Some(kill) = self.kill.take() {
                    kill();
                }
                SessionExit::TimedOut
            }
            Err(RecvTimeoutError::Disconnected) => {
                SessionExit::Failed("session ended without signalling completion".to_string())
            }
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

pub trait SessionHost: Send + Sync {
    fn launch(&self, workdir: &Path, prompt: &str) -> Result<SessionHandle, SessionError>;
    fn is_alive(&self, session_id: &str) -> bool;
}
