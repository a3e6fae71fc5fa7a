//! The merge executor: land one branch on trunk, publish, verify.
//!
//! Landing tries, in order, a fast-forward, a rebase followed by a
//! fast-forward, and a merge commit. On conflict it launches one resolution
//! session and re-lands once. The landed commit is read from `HEAD` right
//! after the successful strategy, never derived from the branch, because a
//! rebase rewrites the commits that actually reach trunk.

use lander_kernel::{SessionExit, SessionHost, Vcs, VcsError};
use lander_store::{LanderConfig, ProjectLayout};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::verify::{VerificationDiagnostics, Verifier, VerifyReport};

#[derive(Debug, Clone)]
pub struct MergeSettings {
    pub trunk: String,
    pub remote: String,
    pub verify_attempts: u32,
    pub verify_delay: Duration,
    pub resolution_timeout: Duration,
    /// Temporary resolution worktrees live here.
    pub worktrees_dir: PathBuf,
}

impl MergeSettings {
    pub fn from_config(config: &LanderConfig, layout: &ProjectLayout) -> Self {
        Self {
            trunk: config.trunk.clone(),
            remote: config.remote.clone(),
            verify_attempts: config.verify_attempts,
            verify_delay: config.verify_delay(),
            resolution_timeout: config.resolution_timeout(),
            worktrees_dir: layout.worktrees_dir(),
        }
    }

    pub fn remote_trunk(&self) -> String {
        format!("{}/{}", self.remote, self.trunk)
    }
}

/// What to integrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    /// Queue subject, for logs.
    pub subject: String,
    /// Local branch to land.
    pub branch: String,
    /// Worktree that has `branch` checked out, when there is one.
    pub worktree: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    FastForward,
    Rebase,
    MergeCommit,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::FastForward => "fast_forward",
            Strategy::Rebase => "rebase",
            Strategy::MergeCommit => "merge_commit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Landed {
    /// `HEAD` of the local trunk right after landing.
    pub commit: String,
    pub strategy: Strategy,
    /// Landed only after a resolution session.
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LandOutcome {
    Landed(Landed),
    Conflict { detail: String },
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("push failed: {0}")]
    Push(VcsError),

    #[error(transparent)]
    Verification(Box<VerificationDiagnostics>),
}

enum Attempt {
    Landed(Strategy),
    Conflict(String),
}

#[derive(Clone)]
pub struct MergeExecutor {
    vcs: Arc<dyn Vcs>,
    sessions: Arc<dyn SessionHost>,
    settings: MergeSettings,
}

impl MergeExecutor {
    pub fn new(vcs: Arc<dyn Vcs>, sessions: Arc<dyn SessionHost>, settings: MergeSettings) -> Self {
        Self {
            vcs,
            sessions,
            settings,
        }
    }

    pub fn settings(&self) -> &MergeSettings {
        &self.settings
    }

    /// Land `request` on the local trunk. Never pushes.
    pub fn land(&self, request: &MergeRequest) -> Result<LandOutcome, EngineError> {
        self.sync_trunk()?;
        let detail = match self.try_strategies(request)? {
            Attempt::Landed(strategy) => return self.capture(request, strategy, false),
            Attempt::Conflict(detail) => detail,
        };
        info!(subject = %request.subject, branch = %request.branch, "conflict, launching resolution session");

        if let Err(reason) = self.resolve(request, &detail) {
            warn!(subject = %request.subject, %reason, "resolution did not finish");
            return Ok(LandOutcome::Conflict {
                detail: format!("{detail}; resolution {reason}"),
            });
        }
        self.sync_trunk()?;
        match self.try_strategies(request)? {
            Attempt::Landed(strategy) => self.capture(request, strategy, true),
            Attempt::Conflict(detail) => Ok(LandOutcome::Conflict {
                detail: format!("conflict persists after resolution: {detail}"),
            }),
        }
    }

    /// Push the local trunk and verify `commit` reached the remote.
    pub fn publish(&self, commit: &str) -> Result<VerifyReport, PublishError> {
        let (remote, trunk) = (&self.settings.remote, &self.settings.trunk);
        self.with_retry("push", || self.vcs.push(remote, trunk))
            .map_err(PublishError::Push)?;
        let verifier = Verifier {
            vcs: self.vcs.as_ref(),
            remote,
            trunk,
            attempts: self.settings.verify_attempts,
            delay: self.settings.verify_delay,
        };
        let report = verifier
            .verify(commit)
            .map_err(|diagnostics| PublishError::Verification(Box::new(diagnostics)))?;
        info!(commit, attempts = report.attempts, evidence = ?report.evidence, "push verified");
        Ok(report)
    }

    /// Best effort: remove the worktree, then the local and remote branch.
    pub fn cleanup(&self, request: &MergeRequest) {
        if let Some(path) = request.worktree.as_deref().filter(|path| path.exists())
            && let Err(err) = self.vcs.remove_worktree(path)
        {
            warn!(subject = %request.subject, path = %path.display(), error = %err, "could not remove worktree");
        }
        if let Err(err) = self.vcs.delete_branch(&request.branch) {
            debug!(branch = %request.branch, error = %err, "local branch not deleted");
        }
        match self.vcs.ls_remote(&self.settings.remote, &request.branch) {
            Ok(Some(_)) => {
                if let Err(err) = self
                    .vcs
                    .delete_remote_branch(&self.settings.remote, &request.branch)
                {
                    warn!(branch = %request.branch, error = %err, "could not delete remote branch");
                }
            }
            Ok(None) => {}
            Err(err) => debug!(branch = %request.branch, error = %err, "remote branch lookup failed"),
        }
    }

    /// Fetch and point the local trunk at the remote trunk. A local trunk
    /// carrying commits the remote never accepted is reset.
    fn sync_trunk(&self) -> Result<(), EngineError> {
        let (remote, trunk) = (&self.settings.remote, &self.settings.trunk);
        self.with_retry("fetch", || self.vcs.fetch(remote, trunk))?;
        self.vcs.checkout(trunk)?;
        let remote_trunk = self.settings.remote_trunk();
        let local = self.vcs.current_head()?;
        if self.vcs.is_ancestor(&local, &remote_trunk)? {
            return Ok(self.vcs.ff_merge(&remote_trunk)?);
        }
        warn!(%trunk, %local, "local trunk has commits missing from {remote_trunk}, resetting");
        Ok(self.vcs.reset_hard(&remote_trunk)?)
    }

    fn try_strategies(&self, request: &MergeRequest) -> Result<Attempt, EngineError> {
        let trunk = &self.settings.trunk;
        match self.vcs.ff_merge(&request.branch) {
            Ok(()) => return Ok(Attempt::Landed(Strategy::FastForward)),
            Err(VcsError::NotFastForward { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        let workdir = request
            .worktree
            .as_deref()
            .filter(|path| path.is_dir())
            .unwrap_or_else(|| self.vcs.repo_root());
        let rebase_error = match self.vcs.rebase(workdir, &request.branch, trunk) {
            Ok(()) => {
                self.vcs.checkout(trunk)?;
                match self.vcs.ff_merge(&request.branch) {
                    Ok(()) => return Ok(Attempt::Landed(Strategy::Rebase)),
                    Err(err) => err,
                }
            }
            Err(err) => err,
        };
        debug!(branch = %request.branch, error = %rebase_error, "rebase did not land, trying a merge commit");

        self.vcs.checkout(trunk)?;
        let message = format!("Merge {} into {trunk}", request.branch);
        match self.vcs.merge_commit(&request.branch, &message) {
            Ok(()) => Ok(Attempt::Landed(Strategy::MergeCommit)),
            Err(VcsError::Conflict { message, .. }) => Ok(Attempt::Conflict(message)),
            Err(err) => Err(err.into()),
        }
    }

    fn capture(
        &self,
        request: &MergeRequest,
        strategy: Strategy,
        resolved: bool,
    ) -> Result<LandOutcome, EngineError> {
        let commit = self.vcs.current_head()?;
        info!(
            subject = %request.subject,
            %commit,
            strategy = strategy.as_str(),
            resolved,
            "landed on local trunk"
        );
        Ok(LandOutcome::Landed(Landed {
            commit,
            strategy,
            resolved,
        }))
    }

    /// Run one resolution session. `Err` carries why it did not finish.
    fn resolve(&self, request: &MergeRequest, detail: &str) -> Result<(), String> {
        let existing = request
            .worktree
            .as_deref()
            .filter(|path| path.is_dir())
            .map(Path::to_path_buf);
        let (workdir, temporary) = match existing {
            Some(path) => (path, false),
            None => {
                let path = self
                    .settings
                    .worktrees_dir
                    .join(format!("resolve-{}", Uuid::new_v4()));
                self.vcs
                    .create_worktree(&path, &request.branch)
                    .map_err(|e| format!("could not create worktree: {e}"))?;
                (path, true)
            }
        };

        let prompt = self.resolution_prompt(request, detail);
        let result = match self.sessions.launch(&workdir, &prompt) {
            Ok(handle) => {
                info!(subject = %request.subject, session = %handle.id, "resolution session started");
                match handle.wait(self.settings.resolution_timeout) {
                    SessionExit::Done => Ok(()),
                    SessionExit::Failed(message) => Err(format!("failed: {message}")),
                    SessionExit::TimedOut => Err(format!(
                        "timed out after {}s",
                        self.settings.resolution_timeout.as_secs()
                    )),
                }
            }
            Err(err) => Err(err.to_string()),
        };

        if temporary && let Err(err) = self.vcs.remove_worktree(&workdir) {
            warn!(path = %workdir.display(), error = %err, "could not remove resolution worktree");
        }
        result
    }

    fn resolution_prompt(&self, request: &MergeRequest, detail: &str) -> String {
        let trunk = &self.settings.trunk;
        let branch = &request.branch;
        let ranges = match self.vcs.merge_base(trunk, branch) {
            Ok(Some(base)) => format!(
                "Changes on the branch: {base}..{branch}\nChanges on trunk: {base}..{trunk}"
            ),
            _ => "No common ancestor was found; inspect both histories.".to_string(),
        };
        format!(
            "Integrating branch `{branch}` into `{trunk}` hit a conflict.\n\n\
             {detail}\n\n\
             {ranges}\n\n\
             Rebase `{branch}` onto `{trunk}`, resolve every conflict keeping the intent \
             of both sides, and finish the rebase. Do not push. Exit once the branch \
             applies cleanly on top of `{trunk}`."
        )
    }

    fn with_retry<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, VcsError>,
    ) -> Result<T, VcsError> {
        let attempts = self.settings.verify_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Err(err) if err.is_transient() && attempt < attempts => {
                    warn!(what, attempt, error = %err, "transient failure, retrying");
                    thread::sleep(self.settings.verify_delay * attempt);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
