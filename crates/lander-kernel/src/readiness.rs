//! Merge-readiness guard failures.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use crate::phase::Phase;

/// The first guard that kept an operation from being merge-ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotReady {
    OperationMissing(String),
    Phase(Phase),
    WorktreeMissing(Option<PathBuf>),
    SessionAlive(String),
    OpenIssues(Vec<String>),
    /// The tracker could not answer; readiness is unknown, never assumed.
    TrackerUnavailable(String),
    /// The operation document exists but could not be read.
    StateUnreadable(String),
}

impl NotReady {
    /// True when open tracked issues are the only thing in the way.
    pub fn is_open_issues(&self) -> bool {
        matches!(self, NotReady::OpenIssues(_))
    }

    /// Short machine-readable guard name.
    pub fn guard(&self) -> &'static str {
        match self {
            NotReady::OperationMissing(_) => "operation_missing",
            NotReady::Phase(_) => "phase",
            NotReady::WorktreeMissing(_) => "worktree_missing",
            NotReady::SessionAlive(_) => "session_alive",
            NotReady::OpenIssues(_) => "open_issues",
            NotReady::TrackerUnavailable(_) => "tracker_unavailable",
            NotReady::StateUnreadable(_) => "state_unreadable",
        }
    }
}

impl Display for NotReady {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NotReady::OperationMissing(name) => write!(f, "operation {name} not found"),
            NotReady::Phase(phase) => write!(
                f,
                "phase is {phase}, needs {} or {}",
                Phase::Completed,
                Phase::PendingMerge
            ),
            NotReady::WorktreeMissing(Some(path)) => {
                write!(f, "worktree missing: {}", path.display())
            }
            NotReady::WorktreeMissing(None) => f.write_str("worktree missing: no worktree recorded"),
            NotReady::SessionAlive(id) => write!(f, "session {id} still alive"),
            NotReady::OpenIssues(ids) => {
                let noun = if ids.len() == 1 { "issue" } else { "issues" };
                write!(f, "{} {noun} still open: {}", ids.len(), ids.join(", "))
            }
            NotReady::TrackerUnavailable(message) => write!(f, "tracker unavailable: {message}"),
            NotReady::StateUnreadable(message) => write!(f, "state unreadable: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failed_guard() {
        let open = NotReady::OpenIssues(vec!["bd-1".into(), "bd-2".into(), "bd-3".into()]);
        assert_eq!(open.to_string(), "3 issues still open: bd-1, bd-2, bd-3");
        assert!(open.is_open_issues());

        let missing = NotReady::WorktreeMissing(Some(PathBuf::from("/tmp/wt")));
        assert_eq!(missing.to_string(), "worktree missing: /tmp/wt");
        assert!(!missing.is_open_issues());

        assert_eq!(
            NotReady::Phase(Phase::Executing).to_string(),
            "phase is executing, needs completed or pending_merge"
        );
    }
}
