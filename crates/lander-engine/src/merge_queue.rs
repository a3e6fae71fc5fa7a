//! The Merge Integration Queue: one daemon cycle against real state.
//!
//! [`MergeQueue::run_cycle`] gathers facts for every live entry, lets
//! [`plan_cycle`] decide, then applies the actions. A failing action is
//! logged and the cycle moves on. Every action runs under the integration
//! lock and rechecks the entry it was planned from. The operation document
//! is always updated before its queue entry is marked terminal, and a
//! dispatched entry never stays processing once its integration returns.

use chrono::{Duration as ChronoDuration, Utc};
use lander_kernel::{
    CycleAction, CycleInput, EnqueueOutcome, EnqueueRequest, EntryFacts, EntryKind, EntryStatus,
    NotReady, OperationFacts, Phase, QueueDoc, QueueEntry, QueueError, StaleReason, Tracker, Vcs,
    plan_cycle,
};
use lander_kernel::EntryStatus::{Completed, Conflict, Pending, Processing, Resumed};
use lander_store::{FileLock, LockError, ProjectLayout, QueueStore, is_held_live};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::executor::{Landed, LandOutcome, MergeExecutor, MergeRequest, PublishError, Strategy};
use crate::state_machine::StateMachine;

/// Statuses the staleness sweep may settle.
const SWEEPABLE: [EntryStatus; 3] = [Pending, Conflict, Resumed];

/// What one dispatch did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub subject: String,
    pub status: EntryStatus,
    pub commit: Option<String>,
    pub strategy: Option<Strategy>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub actions: Vec<String>,
    pub dispatched: Option<DispatchReport>,
    pub errors: Vec<String>,
    pub pruned: Vec<String>,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.actions.is_empty() && self.pruned.is_empty()
    }
}

#[derive(Clone)]
pub struct MergeQueue {
    machine: StateMachine,
    queue: QueueStore,
    executor: MergeExecutor,
    tracker: Arc<dyn Tracker>,
    vcs: Arc<dyn Vcs>,
    layout: ProjectLayout,
    retention: ChronoDuration,
}

impl MergeQueue {
    pub fn new(
        machine: StateMachine,
        queue: QueueStore,
        executor: MergeExecutor,
        tracker: Arc<dyn Tracker>,
        vcs: Arc<dyn Vcs>,
        layout: ProjectLayout,
        retention: ChronoDuration,
    ) -> Self {
        Self {
            machine,
            queue,
            executor,
            tracker,
            vcs,
            layout,
            retention,
        }
    }

    pub fn snapshot(&self) -> Result<QueueDoc, EngineError> {
        Ok(self.queue.load()?)
    }

    /// Queue a completed operation. Completed or conflicted work moves to
    /// `pending_merge` first; anything earlier in the lifecycle is refused.
    pub fn enqueue_operation(
        &self,
        name: &str,
        priority: i32,
    ) -> Result<EnqueueOutcome, EngineError> {
        let op = self.machine.load(name)?;
        match op.phase {
            Phase::Completed | Phase::Conflict => {
                self.machine.request_merge(name)?;
            }
            Phase::PendingMerge => {}
            other => {
                return Err(EngineError::Unsupported(format!(
                    "operation {name} is {other}; only completed work can be queued"
                )));
            }
        }
        self.enqueue(EnqueueRequest {
            subject: name.to_string(),
            kind: EntryKind::Operation,
            priority,
            external_ref: op.external_ref,
            now: Utc::now(),
        })
    }

    pub fn enqueue_branch(
        &self,
        branch: &str,
        priority: i32,
        external_ref: Option<String>,
    ) -> Result<EnqueueOutcome, EngineError> {
        self.enqueue(EnqueueRequest {
            subject: branch.to_string(),
            kind: EntryKind::Branch,
            priority,
            external_ref,
            now: Utc::now(),
        })
    }

    fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueOutcome, EngineError> {
        let outcome = self.queue.mutate(|doc| {
            let outcome = doc.enqueue(request)?;
            let changed = !matches!(outcome, EnqueueOutcome::AlreadyQueued(_));
            Ok((outcome, changed))
        })?;
        let entry = outcome.entry();
        info!(subject = %entry.subject, kind = ?entry.kind, priority = entry.priority, "enqueued");
        Ok(outcome)
    }

    /// Drop an entry that is not being integrated right now.
    pub fn dequeue(&self, subject: &str) -> Result<QueueEntry, EngineError> {
        let removed = self.queue.mutate(|doc| {
            let entry = doc
                .entry(subject)
                .ok_or_else(|| QueueError::NotFound(subject.to_string()))?;
            if entry.status == EntryStatus::Processing {
                return Err(QueueError::UnexpectedStatus {
                    subject: subject.to_string(),
                    status: EntryStatus::Processing,
                    expected: EntryStatus::Pending,
                });
            }
            let removed = doc
                .remove(subject)
                .ok_or_else(|| QueueError::NotFound(subject.to_string()))?;
            Ok((removed, true))
        })?;
        info!(subject, "dequeued");
        Ok(removed)
    }

    pub fn run_cycle(&self) -> Result<CycleReport, EngineError> {
        let doc = self.queue.load()?;
        let facts = self.gather_facts(&doc);
        let integration_live = is_held_live(&self.layout.integration_lock_path());
        let actions = plan_cycle(&CycleInput {
            now: Utc::now(),
            queue: &doc,
            facts: &facts,
            integration_live,
        });

        let mut report = CycleReport::default();
        for action in &actions {
            let outcome = match action {
                CycleAction::Dispatch { subject } => self.dispatch(subject).map(|d| (true, d)),
                _ => self.reconcile(action).map(|applied| (applied, None)),
            };
            match outcome {
                Ok((applied, dispatched)) => {
                    if applied {
                        report.actions.push(describe(action));
                    }
                    report.dispatched = report.dispatched.take().or(dispatched);
                }
                Err(err) => {
                    error!(subject = action.subject(), error = %err, "cycle action failed");
                    report.actions.push(describe(action));
                    report.errors.push(format!("{}: {err}", action.subject()));
                }
            }
        }

        let retention = self.retention;
        report.pruned = self.queue.mutate(|doc| {
            let pruned = doc.prune_terminal(Utc::now(), retention);
            let changed = !pruned.is_empty();
            Ok((pruned, changed))
        })?;
        if !report.pruned.is_empty() {
            debug!(pruned = ?report.pruned, "pruned finished entries");
        }
        Ok(report)
    }

    fn gather_facts(&self, doc: &QueueDoc) -> BTreeMap<String, EntryFacts> {
        let live: Vec<&QueueEntry> = doc
            .entries
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .collect();

        let mut ops = BTreeMap::new();
        for entry in live.iter().filter(|e| e.kind == EntryKind::Operation) {
            match self.machine.load(&entry.subject) {
                Ok(op) => {
                    ops.insert(entry.subject.clone(), Some(op));
                }
                Err(err) if err.is_not_found() => {
                    ops.insert(entry.subject.clone(), None);
                }
                Err(err) => {
                    warn!(subject = %entry.subject, error = %err, "operation unreadable, skipping entry this cycle")
                }
            }
        }

        let remote_trunk = self.executor.settings().remote_trunk();
        let needs_fetch = ops
            .values()
            .flatten()
            .any(|op| op.merged_at.is_some() && op.merge_commit.is_some());
        if needs_fetch {
            let settings = self.executor.settings();
            if let Err(err) = self.vcs.fetch(&settings.remote, &settings.trunk) {
                warn!(error = %err, "fetch before staleness sweep failed");
            }
        }

        let mut facts = BTreeMap::new();
        for entry in live {
            let entry_facts = match entry.kind {
                EntryKind::Operation => match ops.remove(&entry.subject) {
                    Some(Some(op)) => {
                        let reachable = op.merged_at.is_some()
                            && op.merge_commit.as_deref().is_some_and(|commit| {
                                self.vcs.is_ancestor(commit, &remote_trunk).unwrap_or(false)
                            });
                        EntryFacts {
                            operation: Some(OperationFacts {
                                created_at: op.created_at,
                                merged_at: op.merged_at,
                                merge_commit_reachable: reachable,
                                retried: op.retried,
                                auto_resumed: op.auto_resumed,
                            }),
                            readiness: self.machine.readiness(&op),
                            branch_on_remote: None,
                        }
                    }
                    Some(None) => EntryFacts {
                        operation: None,
                        readiness: Err(NotReady::OperationMissing(entry.subject.clone())),
                        branch_on_remote: None,
                    },
                    None => continue,
                },
                EntryKind::Branch => {
                    let settings = self.executor.settings();
                    let on_remote = match self.vcs.ls_remote(&settings.remote, &entry.subject) {
                        Ok(tip) => Some(tip.is_some()),
                        Err(err) => {
                            debug!(branch = %entry.subject, error = %err, "remote lookup failed");
                            None
                        }
                    };
                    EntryFacts {
                        branch_on_remote: on_remote,
                        ..EntryFacts::ready()
                    }
                }
            };
            facts.insert(entry.subject.clone(), entry_facts);
        }
        facts
    }

    /// Apply one planned bookkeeping action. The plan was made from a
    /// snapshot, so each action runs under the integration lock and only
    /// touches an entry still in the status it was planned from. Returns
    /// false when the action no longer applies.
    fn reconcile(&self, action: &CycleAction) -> Result<bool, EngineError> {
        let Some(_lock) = self.integration_lock(action.subject())? else {
            return Ok(false);
        };
        let applied = match action {
            CycleAction::RecoverOrphan { subject } => {
                let recovered = self.transition(subject, &[Processing], Pending)?;
                if recovered {
                    warn!(%subject, "integration lock is gone, returned orphaned entry to pending");
                }
                recovered
            }
            CycleAction::RetryConflict { subject } => {
                if !self.is_in(subject, &[Conflict])? {
                    return Ok(false);
                }
                self.machine.retry_after_conflict(subject)?;
                self.transition(subject, &[Conflict], Pending)?;
                info!(%subject, "conflict retry scheduled");
                true
            }
            CycleAction::DropStale { subject, reason } => {
                let swept = if *reason == StaleReason::AlreadyMerged {
                    self.transition(subject, &SWEEPABLE, Completed)?
                } else {
                    self.queue.mutate(|doc| {
                        let removed = doc.remove_in(subject, &SWEEPABLE).is_some();
                        Ok((removed, removed))
                    })?
                };
                if swept {
                    info!(%subject, %reason, "stale entry swept");
                }
                swept
            }
            CycleAction::KickBack { subject, reason } => {
                if !self.is_in(subject, &[Pending])? {
                    return Ok(false);
                }
                self.machine.reopen(subject, &reason.to_string())?;
                self.transition(subject, &[Pending], Resumed)?;
                info!(%subject, %reason, "sent back to execution");
                true
            }
            CycleAction::Dispatch { .. } => false,
        };
        Ok(applied)
    }

    /// `None` while another integration holds the lock.
    fn integration_lock(&self, subject: &str) -> Result<Option<FileLock>, EngineError> {
        match FileLock::try_acquire(&self.layout.integration_lock_path()) {
            Ok(lock) => Ok(Some(lock)),
            Err(LockError::Busy { owner, .. }) => {
                info!(subject, %owner, "another integration is running, leaving entry alone");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn is_in(&self, subject: &str, from: &[EntryStatus]) -> Result<bool, EngineError> {
        let current = self
            .queue
            .load()?
            .entry(subject)
            .is_some_and(|entry| from.contains(&entry.status));
        if !current {
            debug!(subject, "entry moved on since the plan, skipping");
        }
        Ok(current)
    }

    fn transition(
        &self,
        subject: &str,
        from: &[EntryStatus],
        to: EntryStatus,
    ) -> Result<bool, EngineError> {
        let moved = self.queue.mutate(|doc| {
            let moved = doc.transition(subject, from, to, Utc::now());
            Ok((moved, moved))
        })?;
        if !moved {
            debug!(subject, %to, "entry moved on since the plan, skipping");
        }
        Ok(moved)
    }

    fn dispatch(&self, subject: &str) -> Result<Option<DispatchReport>, EngineError> {
        let Some(lock) = self.integration_lock(subject)? else {
            return Ok(None);
        };
        let entry = self.queue.mutate(|doc| {
            let entry = doc.mark_processing(subject, Utc::now())?;
            Ok((entry, true))
        })?;
        info!(subject, kind = ?entry.kind, "dispatching");

        let outcome = match entry.kind {
            EntryKind::Operation => self.integrate_operation(&entry),
            EntryKind::Branch => self.integrate_branch(&entry),
        };
        // Nothing may leave the entry processing once the lock is released.
        let report = outcome.or_else(|err| {
            let message = format!("integration aborted: {err}");
            error!(subject, %message, "integration aborted");
            self.finish(&entry, EntryStatus::Failed, Some(message), None)
        });
        drop(lock);
        report.map(Some)
    }

    fn integrate_operation(&self, entry: &QueueEntry) -> Result<DispatchReport, EngineError> {
        let subject = entry.subject.as_str();
        let op = self.machine.load(subject)?;
        if op.phase == Phase::Completed {
            self.machine.request_merge(subject)?;
        }
        let request = MergeRequest {
            subject: subject.to_string(),
            branch: op.branch_name(),
            worktree: op.worktree_path.clone(),
        };

        let landed = match self.executor.land(&request) {
            Ok(LandOutcome::Landed(landed)) => landed,
            Ok(LandOutcome::Conflict { detail }) => {
                self.machine.mark_conflict(subject, &detail)?;
                return self.finish(entry, EntryStatus::Conflict, Some(detail), None);
            }
            Err(err) => {
                let message = format!("integration failed: {err}");
                self.machine.fail(subject, &message)?;
                return self.finish(entry, EntryStatus::Failed, Some(message), None);
            }
        };

        self.machine.record_merge_commit(subject, &landed.commit)?;
        match self.executor.publish(&landed.commit) {
            Ok(_) => {
                self.machine.mark_merged(subject, &landed.commit)?;
                if let Some(issue) = entry.external_ref.as_deref()
                    && op.external_ref.as_deref() != Some(issue)
                {
                    self.close_issue(issue);
                }
                self.executor.cleanup(&request);
                self.finish(entry, EntryStatus::Completed, None, Some(&landed))
            }
            Err(PublishError::Verification(diagnostics)) => {
                let message = diagnostics.to_string();
                error!(subject, %message, "push verification failed");
                self.machine
                    .mark_verification_failed(subject, &landed.commit, &message)?;
                self.finish(entry, EntryStatus::Failed, Some(message), Some(&landed))
            }
            Err(err @ PublishError::Push(_)) => {
                let message = err.to_string();
                self.machine.mark_push_failed(subject, &message)?;
                self.finish(entry, EntryStatus::Failed, Some(message), None)
            }
        }
    }

    fn integrate_branch(&self, entry: &QueueEntry) -> Result<DispatchReport, EngineError> {
        let request = MergeRequest {
            subject: entry.subject.clone(),
            branch: entry.subject.clone(),
            worktree: None,
        };
        let landed = match self.executor.land(&request) {
            Ok(LandOutcome::Landed(landed)) => landed,
            Ok(LandOutcome::Conflict { detail }) => {
                return self.finish(entry, EntryStatus::Conflict, Some(detail), None);
            }
            Err(err) => {
                let message = format!("integration failed: {err}");
                return self.finish(entry, EntryStatus::Failed, Some(message), None);
            }
        };
        match self.executor.publish(&landed.commit) {
            Ok(_) => {
                if let Some(issue) = entry.external_ref.as_deref() {
                    self.close_issue(issue);
                }
                self.executor.cleanup(&request);
                self.finish(entry, EntryStatus::Completed, None, Some(&landed))
            }
            Err(err) => {
                let message = err.to_string();
                error!(branch = %entry.subject, %message, "branch integration failed");
                self.finish(entry, EntryStatus::Failed, Some(message), Some(&landed))
            }
        }
    }

    fn close_issue(&self, issue: &str) {
        if let Err(err) = self.tracker.close(issue, "merged") {
            warn!(issue, error = %err, "could not close merged issue");
        }
    }

    fn finish(
        &self,
        entry: &QueueEntry,
        status: EntryStatus,
        error: Option<String>,
        landed: Option<&Landed>,
    ) -> Result<DispatchReport, EngineError> {
        let recorded = error.clone();
        self.queue.mutate(|doc| {
            doc.finish(&entry.subject, status, recorded, Utc::now())?;
            Ok(((), true))
        })?;
        info!(subject = %entry.subject, %status, "integration finished");
        Ok(DispatchReport {
            subject: entry.subject.clone(),
            status,
            commit: landed.map(|l| l.commit.clone()),
            strategy: landed.map(|l| l.strategy),
            error,
        })
    }
}

fn describe(action: &CycleAction) -> String {
    match action {
        CycleAction::RecoverOrphan { subject } => format!("recover {subject}"),
        CycleAction::RetryConflict { subject } => format!("retry {subject}"),
        CycleAction::DropStale { subject, reason } => format!("drop {subject} ({reason})"),
        CycleAction::KickBack { subject, reason } => format!("kick back {subject} ({reason})"),
        CycleAction::Dispatch { subject } => format!("dispatch {subject}"),
    }
}
