//! Operation phases and the guarded transitions between them.
//!
//! ```text
//! init → planned → queued → executing → {completed, failed, interrupted}
//! completed → pending_merge → {merged, conflict, failed}
//! conflict → pending_merge | failed
//! failed | interrupted → init
//! completed | pending_merge → queued          (reopen for more work)
//! any non-terminal → cancelled
//! ```
//!
//! `merged` and `cancelled` are terminal.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    Planned,
    Queued,
    Executing,
    Completed,
    Failed,
    Interrupted,
    PendingMerge,
    Merged,
    Conflict,
    Cancelled,
}

impl Phase {
    pub const ALL: [Phase; 11] = [
        Phase::Init,
        Phase::Planned,
        Phase::Queued,
        Phase::Executing,
        Phase::Completed,
        Phase::Failed,
        Phase::Interrupted,
        Phase::PendingMerge,
        Phase::Merged,
        Phase::Conflict,
        Phase::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Planned => "planned",
            Phase::Queued => "queued",
            Phase::Executing => "executing",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
            Phase::Interrupted => "interrupted",
            Phase::PendingMerge => "pending_merge",
            Phase::Merged => "merged",
            Phase::Conflict => "conflict",
            Phase::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Merged | Phase::Cancelled)
    }

    /// Phases from which a merge may be attempted.
    pub fn is_mergeable(&self) -> bool {
        matches!(self, Phase::Completed | Phase::PendingMerge)
    }

    /// Every phase reachable from `self` in one legal transition, in
    /// transition-table order.
    pub fn successors(&self) -> Vec<Phase> {
        let mut out = Vec::new();
        for transition in Transition::ALL {
            if transition.allowed_from(*self) && !out.contains(&transition.target()) {
                out.push(transition.target());
            }
        }
        out
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s.trim())
            .ok_or_else(|| format!("unknown phase `{s}`"))
    }
}

/// A named lifecycle edge. Each transition has a fixed predecessor set and a
/// single target phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Plan,
    Queue,
    Start,
    Complete,
    Fail,
    Interrupt,
    RequestMerge,
    Merge,
    Conflict,
    Resume,
    Reopen,
    Cancel,
}

impl Transition {
    pub const ALL: [Transition; 12] = [
        Transition::Plan,
        Transition::Queue,
        Transition::Start,
        Transition::Complete,
        Transition::Fail,
        Transition::Interrupt,
        Transition::RequestMerge,
        Transition::Merge,
        Transition::Conflict,
        Transition::Resume,
        Transition::Reopen,
        Transition::Cancel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Plan => "plan",
            Transition::Queue => "queue",
            Transition::Start => "start",
            Transition::Complete => "complete",
            Transition::Fail => "fail",
            Transition::Interrupt => "interrupt",
            Transition::RequestMerge => "request_merge",
            Transition::Merge => "merge",
            Transition::Conflict => "conflict",
            Transition::Resume => "resume",
            Transition::Reopen => "reopen",
            Transition::Cancel => "cancel",
        }
    }

    pub fn target(&self) -> Phase {
        match self {
            Transition::Plan => Phase::Planned,
            Transition::Queue | Transition::Reopen => Phase::Queued,
            Transition::Start => Phase::Executing,
            Transition::Complete => Phase::Completed,
            Transition::Fail => Phase::Failed,
            Transition::Interrupt => Phase::Interrupted,
            Transition::RequestMerge => Phase::PendingMerge,
            Transition::Merge => Phase::Merged,
            Transition::Conflict => Phase::Conflict,
            Transition::Resume => Phase::Init,
            Transition::Cancel => Phase::Cancelled,
        }
    }

    /// Allowed predecessor phases.
    pub fn predecessors(&self) -> &'static [Phase] {
        match self {
            Transition::Plan => &[Phase::Init],
            Transition::Queue => &[Phase::Planned],
            Transition::Start => &[Phase::Queued],
            Transition::Complete => &[Phase::Executing],
            Transition::Fail => &[Phase::Executing, Phase::PendingMerge, Phase::Conflict],
            Transition::Interrupt => &[Phase::Executing],
            Transition::RequestMerge => &[Phase::Completed, Phase::Conflict],
            Transition::Merge => &[Phase::PendingMerge],
            Transition::Conflict => &[Phase::PendingMerge],
            Transition::Resume => &[Phase::Failed, Phase::Interrupted],
            Transition::Reopen => &[Phase::Completed, Phase::PendingMerge],
            Transition::Cancel => &[
                Phase::Init,
                Phase::Planned,
                Phase::Queued,
                Phase::Executing,
                Phase::Completed,
                Phase::Failed,
                Phase::Interrupted,
                Phase::PendingMerge,
                Phase::Conflict,
            ],
        }
    }

    pub fn allowed_from(&self, phase: Phase) -> bool {
        self.predecessors().contains(&phase)
    }

    /// The unique transition that moves `from` to `to`, if any.
    pub fn between(from: Phase, to: Phase) -> Option<Transition> {
        Transition::ALL
            .into_iter()
            .find(|transition| transition.target() == to && transition.allowed_from(from))
    }

    /// Event name recorded when this transition is applied.
    pub fn event_name(&self) -> String {
        format!("phase.{}", self.as_str())
    }
}

impl Display for Transition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_exists_iff_target_is_a_successor() {
        for from in Phase::ALL {
            let successors = from.successors();
            for to in Phase::ALL {
                assert_eq!(
                    Transition::between(from, to).is_some(),
                    successors.contains(&to),
                    "edge {from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_phases_have_no_successors() {
        for phase in Phase::ALL.into_iter().filter(Phase::is_terminal) {
            assert!(phase.successors().is_empty(), "{phase} must be terminal");
        }
    }

    #[test]
    fn every_non_terminal_phase_can_cancel() {
        for phase in Phase::ALL.into_iter().filter(|p| !p.is_terminal()) {
            assert_eq!(
                Transition::between(phase, Phase::Cancelled),
                Some(Transition::Cancel)
            );
        }
    }

    #[test]
    fn at_most_one_transition_per_edge() {
        for from in Phase::ALL {
            for to in Phase::ALL {
                let count = Transition::ALL
                    .iter()
                    .filter(|t| t.target() == to && t.allowed_from(from))
                    .count();
                assert!(count <= 1, "ambiguous edge {from} -> {to}");
            }
        }
    }

    #[test]
    fn pending_merge_successors_render() {
        let rendered = Phase::PendingMerge
            .successors()
            .iter()
            .map(Phase::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        insta::assert_snapshot!(rendered, @"failed, merged, conflict, queued, cancelled");
    }

    #[test]
    fn phase_round_trips_through_str() {
        for phase in Phase::ALL {
            assert_eq!(phase.as_str().parse::<Phase>(), Ok(phase));
        }
        assert!("merging".parse::<Phase>().is_err());
    }
}
