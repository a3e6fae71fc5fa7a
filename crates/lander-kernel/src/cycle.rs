//! One merge-queue daemon cycle as a pure function.
//!
//! The daemon gathers a queue snapshot plus per-entry facts (operation
//! timestamps, ancestry, readiness), then asks [`plan_cycle`] what to do.
//! Nothing here reads disk or git, so every policy decision is testable
//! without a live loop.
//!
//! Step order within a cycle:
//! 1. orphaned `processing` entries (no live integration lock) go back to pending
//! 2. conflict auto-retry, once per operation
//! 3. staleness sweep
//! 4. readiness filter with a once-per-operation kick back to execution
//! 5. dispatch of at most one ready entry

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use crate::queue::{EntryKind, EntryStatus, QueueDoc, QueueEntry, sort_dispatch_order};
use crate::readiness::NotReady;

/// Facts about the operation behind an entry, captured fresh each cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationFacts {
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    /// `merge_commit` is recorded and is an ancestor of the remote trunk.
    pub merge_commit_reachable: bool,
    pub retried: bool,
    pub auto_resumed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryFacts {
    /// `None` when the entry names an operation that no longer exists, or
    /// when the entry is a bare branch.
    pub operation: Option<OperationFacts>,
    pub readiness: Result<(), NotReady>,
    /// Bare-branch entries only: does the branch still exist on the remote.
    pub branch_on_remote: Option<bool>,
}

impl EntryFacts {
    pub fn ready() -> Self {
        Self {
            operation: None,
            readiness: Ok(()),
            branch_on_remote: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleInput<'a> {
    pub now: DateTime<Utc>,
    pub queue: &'a QueueDoc,
    pub facts: &'a BTreeMap<String, EntryFacts>,
    /// Whether a live process currently holds the integration lock.
    pub integration_live: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// The operation already landed and its commit is reachable on trunk.
    AlreadyMerged,
    /// The operation was deleted and recreated after the entry was queued.
    Recreated,
    OperationMissing,
    /// Bare branch no longer exists on the remote.
    BranchGone,
}

impl Display for StaleReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StaleReason::AlreadyMerged => "already merged",
            StaleReason::Recreated => "operation recreated after enqueue",
            StaleReason::OperationMissing => "operation missing",
            StaleReason::BranchGone => "branch gone from remote",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleAction {
    RecoverOrphan { subject: String },
    RetryConflict { subject: String },
    DropStale { subject: String, reason: StaleReason },
    KickBack { subject: String, reason: NotReady },
    Dispatch { subject: String },
}

impl CycleAction {
    pub fn subject(&self) -> &str {
        match self {
            CycleAction::RecoverOrphan { subject }
            | CycleAction::RetryConflict { subject }
            | CycleAction::DropStale { subject, .. }
            | CycleAction::KickBack { subject, .. }
            | CycleAction::Dispatch { subject } => subject,
        }
    }
}

pub fn plan_cycle(input: &CycleInput<'_>) -> Vec<CycleAction> {
    let mut actions = Vec::new();
    let mut status: BTreeMap<&str, EntryStatus> = input
        .queue
        .entries
        .iter()
        .map(|entry| (entry.subject.as_str(), entry.status))
        .collect();

    for entry in &input.queue.entries {
        if entry.status == EntryStatus::Processing && !input.integration_live {
            actions.push(CycleAction::RecoverOrphan {
                subject: entry.subject.clone(),
            });
            status.insert(&entry.subject, EntryStatus::Pending);
        }
    }

    for entry in &input.queue.entries {
        if status.get(entry.subject.as_str()) != Some(&EntryStatus::Conflict) {
            continue;
        }
        let Some(op) = input
            .facts
            .get(&entry.subject)
            .and_then(|facts| facts.operation.as_ref())
        else {
            continue;
        };
        if !op.retried {
            actions.push(CycleAction::RetryConflict {
                subject: entry.subject.clone(),
            });
            status.insert(&entry.subject, EntryStatus::Pending);
        }
    }

    for entry in &input.queue.entries {
        let sweepable = matches!(
            status.get(entry.subject.as_str()),
            Some(EntryStatus::Pending | EntryStatus::Conflict | EntryStatus::Resumed)
        );
        if !sweepable {
            continue;
        }
        let Some(facts) = input.facts.get(&entry.subject) else {
            continue;
        };
        if let Some(reason) = stale_reason(entry, facts) {
            actions.push(CycleAction::DropStale {
                subject: entry.subject.clone(),
                reason,
            });
            status.remove(entry.subject.as_str());
        }
    }

    for entry in &input.queue.entries {
        if entry.kind != EntryKind::Operation
            || status.get(entry.subject.as_str()) != Some(&EntryStatus::Pending)
        {
            continue;
        }
        let Some(facts) = input.facts.get(&entry.subject) else {
            continue;
        };
        let Some(op) = facts.operation.as_ref() else {
            continue;
        };
        if let Err(reason) = &facts.readiness
            && reason.is_open_issues()
            && !op.auto_resumed
        {
            actions.push(CycleAction::KickBack {
                subject: entry.subject.clone(),
                reason: reason.clone(),
            });
            status.insert(&entry.subject, EntryStatus::Resumed);
        }
    }

    if status.values().any(|s| *s == EntryStatus::Processing) {
        return actions;
    }

    let mut pending: Vec<&QueueEntry> = input
        .queue
        .entries
        .iter()
        .filter(|entry| status.get(entry.subject.as_str()) == Some(&EntryStatus::Pending))
        .collect();
    sort_dispatch_order(&mut pending);

    let ready = pending.into_iter().find(|entry| {
        input
            .facts
            .get(&entry.subject)
            .is_some_and(|facts| facts.readiness.is_ok())
    });
    if let Some(entry) = ready {
        actions.push(CycleAction::Dispatch {
            subject: entry.subject.clone(),
        });
    }

    actions
}

fn stale_reason(entry: &QueueEntry, facts: &EntryFacts) -> Option<StaleReason> {
    match entry.kind {
        EntryKind::Operation => {
            let Some(op) = facts.operation.as_ref() else {
                return Some(StaleReason::OperationMissing);
            };
            if op.merged_at.is_some() && op.merge_commit_reachable {
                return Some(StaleReason::AlreadyMerged);
            }
            if op.created_at > entry.enqueued_at {
                return Some(StaleReason::Recreated);
            }
            None
        }
        EntryKind::Branch => match facts.branch_on_remote {
            Some(false) => Some(StaleReason::BranchGone),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::Phase;
    use crate::queue::EnqueueRequest;
    use chrono::{Duration, TimeZone};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("fixed time")
            + Duration::minutes(minute)
    }

    fn doc(entries: &[(&str, EntryKind, i32, i64, EntryStatus)]) -> QueueDoc {
        let mut doc = QueueDoc::default();
        for (subject, kind, priority, minute, status) in entries {
            doc.enqueue(EnqueueRequest {
                subject: subject.to_string(),
                kind: *kind,
                priority: *priority,
                external_ref: None,
                now: at(*minute),
            })
            .expect("enqueue");
            doc.set_status(subject, *status, at(*minute)).expect("status");
        }
        doc
    }

    fn op_facts(readiness: Result<(), NotReady>) -> EntryFacts {
        EntryFacts {
            operation: Some(OperationFacts {
                created_at: at(-60),
                merged_at: None,
                merge_commit_reachable: false,
                retried: false,
                auto_resumed: false,
            }),
            readiness,
            branch_on_remote: None,
        }
    }

    fn plan(
        queue: &QueueDoc,
        facts: &BTreeMap<String, EntryFacts>,
        live: bool,
    ) -> Vec<CycleAction> {
        plan_cycle(&CycleInput {
            now: at(100),
            queue,
            facts,
            integration_live: live,
        })
    }

    /// Mirror of how the daemon applies actions to the queue document.
    fn apply(queue: &mut QueueDoc, facts: &mut BTreeMap<String, EntryFacts>, actions: &[CycleAction]) {
        use EntryStatus::*;
        for action in actions {
            match action {
                CycleAction::RecoverOrphan { subject } => {
                    queue.transition(subject, &[Processing], Pending, at(100));
                }
                CycleAction::RetryConflict { subject } => {
                    queue.transition(subject, &[Conflict], Pending, at(100));
                    if let Some(op) = facts.get_mut(subject).and_then(|f| f.operation.as_mut()) {
                        op.retried = true;
                    }
                }
                CycleAction::DropStale { subject, reason } => {
                    if *reason == StaleReason::AlreadyMerged {
                        queue.transition(subject, &[Pending, Conflict, Resumed], Completed, at(100));
                    } else {
                        queue.remove_in(subject, &[Pending, Conflict, Resumed]);
                    }
                }
                CycleAction::KickBack { subject, .. } => {
                    queue.transition(subject, &[Pending], Resumed, at(100));
                }
                CycleAction::Dispatch { .. } => {}
            }
        }
    }

    #[test]
    fn dispatches_first_ready_entry_in_priority_order() {
        let queue = doc(&[
            ("slow", EntryKind::Operation, 2, 0, EntryStatus::Pending),
            ("urgent-unready", EntryKind::Operation, 0, 1, EntryStatus::Pending),
            ("urgent-ready", EntryKind::Operation, 0, 2, EntryStatus::Pending),
        ]);
        let mut facts = BTreeMap::new();
        facts.insert("slow".to_string(), op_facts(Ok(())));
        facts.insert(
            "urgent-unready".to_string(),
            op_facts(Err(NotReady::WorktreeMissing(None))),
        );
        facts.insert("urgent-ready".to_string(), op_facts(Ok(())));

        assert_eq!(
            plan(&queue, &facts, false),
            vec![CycleAction::Dispatch {
                subject: "urgent-ready".to_string()
            }]
        );
    }

    #[test]
    fn nothing_dispatches_while_an_integration_is_live() {
        let queue = doc(&[
            ("busy", EntryKind::Operation, 1, 0, EntryStatus::Processing),
            ("next", EntryKind::Operation, 1, 1, EntryStatus::Pending),
        ]);
        let mut facts = BTreeMap::new();
        facts.insert("busy".to_string(), op_facts(Ok(())));
        facts.insert("next".to_string(), op_facts(Ok(())));

        assert!(plan(&queue, &facts, true).is_empty());
    }

    #[test]
    fn orphaned_processing_entry_is_recovered_then_dispatched() {
        let queue = doc(&[("orphan", EntryKind::Operation, 1, 0, EntryStatus::Processing)]);
        let mut facts = BTreeMap::new();
        facts.insert("orphan".to_string(), op_facts(Ok(())));

        assert_eq!(
            plan(&queue, &facts, false),
            vec![
                CycleAction::RecoverOrphan {
                    subject: "orphan".to_string()
                },
                CycleAction::Dispatch {
                    subject: "orphan".to_string()
                },
            ]
        );
    }

    #[test]
    fn conflict_is_retried_exactly_once() {
        let queue = doc(&[("clash", EntryKind::Operation, 1, 0, EntryStatus::Conflict)]);
        let mut facts = BTreeMap::new();
        facts.insert(
            "clash".to_string(),
            op_facts(Err(NotReady::Phase(Phase::Conflict))),
        );

        let first = plan(&queue, &facts, false);
        assert_eq!(
            first,
            vec![CycleAction::RetryConflict {
                subject: "clash".to_string()
            }]
        );

        if let Some(op) = facts.get_mut("clash").and_then(|f| f.operation.as_mut()) {
            op.retried = true;
        }
        assert!(plan(&queue, &facts, false).is_empty());
    }

    #[test]
    fn stale_entries_are_detected_by_reason() {
        let queue = doc(&[
            ("landed", EntryKind::Operation, 1, 0, EntryStatus::Pending),
            ("landed-unverified", EntryKind::Operation, 1, 0, EntryStatus::Pending),
            ("reborn", EntryKind::Operation, 1, 0, EntryStatus::Pending),
            ("ghost", EntryKind::Operation, 1, 0, EntryStatus::Pending),
            ("gone-branch", EntryKind::Branch, 1, 0, EntryStatus::Pending),
        ]);
        let mut facts = BTreeMap::new();
        let mut landed = op_facts(Err(NotReady::Phase(Phase::Merged)));
        if let Some(op) = landed.operation.as_mut() {
            op.merged_at = Some(at(5));
            op.merge_commit_reachable = true;
        }
        facts.insert("landed".to_string(), landed);

        let mut unverified = op_facts(Err(NotReady::Phase(Phase::Merged)));
        if let Some(op) = unverified.operation.as_mut() {
            op.merged_at = Some(at(5));
        }
        facts.insert("landed-unverified".to_string(), unverified);

        let mut reborn = op_facts(Ok(()));
        if let Some(op) = reborn.operation.as_mut() {
            op.created_at = at(10);
        }
        facts.insert("reborn".to_string(), reborn);

        facts.insert(
            "ghost".to_string(),
            EntryFacts {
                operation: None,
                readiness: Err(NotReady::OperationMissing("ghost".to_string())),
                branch_on_remote: None,
            },
        );
        facts.insert(
            "gone-branch".to_string(),
            EntryFacts {
                operation: None,
                readiness: Ok(()),
                branch_on_remote: Some(false),
            },
        );

        let actions = plan(&queue, &facts, false);
        let stale: Vec<(&str, StaleReason)> = actions
            .iter()
            .filter_map(|action| match action {
                CycleAction::DropStale { subject, reason } => Some((subject.as_str(), *reason)),
                _ => None,
            })
            .collect();
        assert_eq!(
            stale,
            vec![
                ("landed", StaleReason::AlreadyMerged),
                ("reborn", StaleReason::Recreated),
                ("ghost", StaleReason::OperationMissing),
                ("gone-branch", StaleReason::BranchGone),
            ]
        );
        assert!(
            !actions.iter().any(|a| a.subject() == "landed-unverified"),
            "an unverified merge must not be swept"
        );
    }

    #[test]
    fn staleness_sweep_is_idempotent() {
        let mut queue = doc(&[
            ("landed", EntryKind::Operation, 1, 0, EntryStatus::Pending),
            ("reborn", EntryKind::Operation, 1, 0, EntryStatus::Conflict),
        ]);
        let mut facts = BTreeMap::new();
        let mut landed = op_facts(Err(NotReady::Phase(Phase::Merged)));
        if let Some(op) = landed.operation.as_mut() {
            op.merged_at = Some(at(5));
            op.merge_commit_reachable = true;
        }
        facts.insert("landed".to_string(), landed);
        let mut reborn = op_facts(Err(NotReady::Phase(Phase::Init)));
        if let Some(op) = reborn.operation.as_mut() {
            op.created_at = at(10);
            op.retried = true;
        }
        facts.insert("reborn".to_string(), reborn);

        let first = plan(&queue, &facts, false);
        apply(&mut queue, &mut facts, &first);
        let once = queue.clone();

        let second = plan(&queue, &facts, false);
        apply(&mut queue, &mut facts, &second);

        assert!(second.is_empty());
        assert_eq!(queue, once);
        assert_eq!(
            queue.entry("landed").map(|e| e.status),
            Some(EntryStatus::Completed)
        );
        assert!(queue.entry("reborn").is_none());
    }

    #[test]
    fn open_issues_kick_back_once_per_operation() {
        let queue = doc(&[("busywork", EntryKind::Operation, 1, 0, EntryStatus::Pending)]);
        let reason = NotReady::OpenIssues(vec!["bd-9".to_string()]);
        let mut facts = BTreeMap::new();
        facts.insert("busywork".to_string(), op_facts(Err(reason.clone())));

        assert_eq!(
            plan(&queue, &facts, false),
            vec![CycleAction::KickBack {
                subject: "busywork".to_string(),
                reason,
            }]
        );

        if let Some(op) = facts.get_mut("busywork").and_then(|f| f.operation.as_mut()) {
            op.auto_resumed = true;
        }
        assert!(plan(&queue, &facts, false).is_empty());
    }

    #[test]
    fn entries_without_facts_are_left_alone() {
        let queue = doc(&[("unknown", EntryKind::Operation, 1, 0, EntryStatus::Pending)]);
        let facts = BTreeMap::new();
        assert!(plan(&queue, &facts, false).is_empty());
    }
}
