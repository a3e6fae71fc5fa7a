//! Push verification.
//!
//! A push that exits successfully is not proof the commit landed. The
//! verifier refetches and checks ancestry against the remote-tracking ref,
//! then asks the remote directly, and retries with a fixed delay to ride out
//! propagation lag.

use lander_kernel::Vcs;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Which check confirmed the commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Evidence {
    /// Ancestor of the remote-tracking ref after a fetch.
    Ancestry,
    /// Equal to, or an ancestor of, the tip `ls-remote` reported.
    LsRemote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub commit: String,
    pub attempts: u32,
    pub evidence: Evidence,
}

/// Everything known about the refs when verification gave up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationDiagnostics {
    pub commit: String,
    pub remote_ref: String,
    pub attempts: u32,
    pub local_head: Option<String>,
    pub tracking_tip: Option<String>,
    pub ls_remote_tip: Option<String>,
    pub ancestor_of_tracking: Option<bool>,
    pub ancestor_of_ls_remote: Option<bool>,
    pub last_error: Option<String>,
}

impl Display for VerificationDiagnostics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        fn show(value: &Option<String>) -> &str {
            value.as_deref().unwrap_or("unknown")
        }
        fn flag(value: Option<bool>) -> &'static str {
            match value {
                Some(true) => "yes",
                Some(false) => "no",
                None => "unknown",
            }
        }
        write!(
            f,
            "push succeeded locally but commit {} not found on {} after {} attempts \
             (local HEAD {}, {} {}, ls-remote {}, ancestor of {}: {}, ancestor of ls-remote tip: {})",
            self.commit,
            self.remote_ref,
            self.attempts,
            show(&self.local_head),
            self.remote_ref,
            show(&self.tracking_tip),
            show(&self.ls_remote_tip),
            self.remote_ref,
            flag(self.ancestor_of_tracking),
            flag(self.ancestor_of_ls_remote),
        )?;
        if let Some(err) = &self.last_error {
            write!(f, "; last error: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for VerificationDiagnostics {}

pub struct Verifier<'a> {
    pub vcs: &'a dyn Vcs,
    pub remote: &'a str,
    pub trunk: &'a str,
    pub attempts: u32,
    pub delay: Duration,
}

impl Verifier<'_> {
    fn remote_ref(&self) -> String {
        format!("{}/{}", self.remote, self.trunk)
    }

    /// Confirm `commit` is reachable from the remote trunk.
    pub fn verify(&self, commit: &str) -> Result<VerifyReport, VerificationDiagnostics> {
        let remote_ref = self.remote_ref();
        let attempts = self.attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if let Err(err) = self.vcs.fetch(self.remote, self.trunk) {
                last_error = Some(err.to_string());
            }
            match self.vcs.is_ancestor(commit, &remote_ref) {
                Ok(true) => return Ok(report(commit, attempt, Evidence::Ancestry)),
                Ok(false) => {}
                Err(err) => last_error = Some(err.to_string()),
            }
            match self.landed_per_ls_remote(commit) {
                Ok(true) => return Ok(report(commit, attempt, Evidence::LsRemote)),
                Ok(false) => {}
                Err(err) => last_error = Some(err),
            }
            debug!(commit, attempt, attempts, "commit not yet visible on the remote");
            if attempt < attempts {
                thread::sleep(self.delay);
            }
        }

        Err(self.diagnose(commit, attempts, last_error))
    }

    fn landed_per_ls_remote(&self, commit: &str) -> Result<bool, String> {
        let tip = self
            .vcs
            .ls_remote(self.remote, self.trunk)
            .map_err(|e| e.to_string())?;
        match tip {
            None => Ok(false),
            Some(tip) if tip == commit => Ok(true),
            Some(tip) => self.descends_from_known(commit, &tip),
        }
    }

    /// Ancestry against a tip we may not have fetched yet.
    fn descends_from_known(&self, commit: &str, tip: &str) -> Result<bool, String> {
        if self.vcs.rev_parse(tip).map_err(|e| e.to_string())?.is_none() {
            return Ok(false);
        }
        self.vcs.is_ancestor(commit, tip).map_err(|e| e.to_string())
    }

    fn diagnose(
        &self,
        commit: &str,
        attempts: u32,
        last_error: Option<String>,
    ) -> VerificationDiagnostics {
        let remote_ref = self.remote_ref();
        let tracking_tip = self.vcs.rev_parse(&remote_ref).ok().flatten();
        let ls_remote_tip = self.vcs.ls_remote(self.remote, self.trunk).ok().flatten();
        let ancestor_of_tracking = tracking_tip
            .as_ref()
            .and_then(|_| self.vcs.is_ancestor(commit, &remote_ref).ok());
        let ancestor_of_ls_remote = ls_remote_tip
            .as_deref()
            .and_then(|tip| self.descends_from_known(commit, tip).ok());
        VerificationDiagnostics {
            commit: commit.to_string(),
            remote_ref,
            attempts,
            local_head: self.vcs.current_head().ok(),
            tracking_tip,
            ls_remote_tip,
            ancestor_of_tracking,
            ancestor_of_ls_remote,
            last_error,
        }
    }
}

fn report(commit: &str, attempts: u32, evidence: Evidence) -> VerifyReport {
    VerifyReport {
        commit: commit.to_string(),
        attempts,
        evidence,
    }
}
