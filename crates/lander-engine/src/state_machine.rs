//! The Operation State Machine.
//!
//! Every phase change goes through [`StateMachine::apply`], which checks the
//! predecessor set under the per-operation lock, edits the document, and
//! records a `phase.<transition>` event in the same locked write. Illegal
//! requests leave the document untouched.

use chrono::Utc;
use lander_kernel::{
    IssueStatus, MergeStatus, NotReady, Operation, OperationField, OperationType, Phase,
    SessionHost, Tracker, TrackerError, Transition, TransitionError,
};
use lander_store::{EventRecord, Mutation, StateStore, StoreError, UpdateError};
use serde::Serialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::EngineError;

/// Optional fields set at creation.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub external_ref: Option<String>,
    pub branch: Option<String>,
    pub worktree_path: Option<PathBuf>,
}

/// An open blocker of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Blocker {
    pub issue: String,
    /// Operation label when the tracker knows one, else the issue ref.
    pub label: String,
}

#[derive(Clone)]
pub struct StateMachine {
    store: StateStore,
    tracker: Arc<dyn Tracker>,
    sessions: Arc<dyn SessionHost>,
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl StateMachine {
    pub fn new(
        store: StateStore,
        tracker: Arc<dyn Tracker>,
        sessions: Arc<dyn SessionHost>,
    ) -> Self {
        Self {
            store,
            tracker,
            sessions,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn create(
        &self,
        name: &str,
        op_type: OperationType,
        options: CreateOptions,
    ) -> Result<Operation, EngineError> {
        let mut op = Operation::new(name, op_type, Utc::now());
        op.external_ref = options.external_ref.filter(|r| !r.trim().is_empty());
        op.branch = options.branch;
        op.worktree_path = options.worktree_path;
        self.store.create(&op)?;
        info!(operation = name, r#type = %op_type, "operation created");
        Ok(op)
    }

    pub fn load(&self, name: &str) -> Result<Operation, EngineError> {
        Ok(self.store.load(name)?)
    }

    /// All readable operations, sorted by name. Unreadable documents are
    /// logged and skipped so one bad file does not hide the rest.
    pub fn operations(&self) -> Result<Vec<Operation>, EngineError> {
        let mut ops = Vec::new();
        for name in self.store.list()? {
            match self.store.load(&name) {
                Ok(op) => ops.push(op),
                Err(err) => warn!(operation = %name, error = %err, "skipping unreadable operation"),
            }
        }
        Ok(ops)
    }

    pub fn events(&self, name: &str) -> Result<Vec<EventRecord>, EngineError> {
        Ok(self.store.events(name)?)
    }

    /// Guarded phase change. `edit` runs after the predecessor check, under
    /// the lock, and may refuse; its return value is merged into the event
    /// detail.
    pub fn apply<F>(
        &self,
        name: &str,
        transition: Transition,
        edit: F,
    ) -> Result<Operation, EngineError>
    where
        F: FnOnce(&mut Operation) -> Result<Value, TransitionError>,
    {
        let op = self.store.update(name, |op| {
            if !transition.allowed_from(op.phase) {
                return Err(TransitionError::illegal(name, transition, op.phase));
            }
            let from = op.phase;
            let extra = edit(op)?;
            op.phase = transition.target();
            let mut detail = json!({ "from": from, "to": op.phase });
            if let (Some(detail), Value::Object(extra)) = (detail.as_object_mut(), extra) {
                detail.extend(extra);
            }
            Ok(Mutation::changed(op.clone()).with_event(transition.event_name(), detail))
        })?;
        info!(operation = name, %transition, phase = %op.phase, "transition applied");
        Ok(op)
    }

    pub fn plan(&self, name: &str) -> Result<Operation, EngineError> {
        self.apply(name, Transition::Plan, |_| Ok(Value::Null))
    }

    pub fn queue(&self, name: &str) -> Result<Operation, EngineError> {
        self.apply(name, Transition::Queue, |_| Ok(Value::Null))
    }

    /// Held operations do not start.
    pub fn start(&self, name: &str) -> Result<Operation, EngineError> {
        self.apply(name, Transition::Start, |op| {
            if op.held {
                return Err(TransitionError::Held {
                    name: op.name.clone(),
                });
            }
            op.error = None;
            Ok(Value::Null)
        })
    }

    pub fn complete(&self, name: &str) -> Result<Operation, EngineError> {
        self.apply(name, Transition::Complete, |op| {
            op.completed_at = Some(Utc::now());
            op.error = None;
            Ok(Value::Null)
        })
    }

    pub fn fail(&self, name: &str, reason: &str) -> Result<Operation, EngineError> {
        self.apply(name, Transition::Fail, |op| {
            op.error = Some(reason.to_string());
            op.merge_queued = false;
            Ok(json!({ "error": reason }))
        })
    }

    pub fn interrupt(&self, name: &str, reason: Option<&str>) -> Result<Operation, EngineError> {
        self.apply(name, Transition::Interrupt, |op| {
            op.error = reason.map(str::to_string);
            Ok(json!({ "reason": reason }))
        })
    }

    /// Completed (or conflicted) work asks to be integrated.
    pub fn request_merge(&self, name: &str) -> Result<Operation, EngineError> {
        self.apply(name, Transition::RequestMerge, |op| {
            op.merge_queued = true;
            op.merge_status = None;
            op.merge_commit = None;
            op.error = None;
            Ok(Value::Null)
        })
    }

    /// Record the commit that landed locally, before push and verification.
    pub fn record_merge_commit(&self, name: &str, commit: &str) -> Result<Operation, EngineError> {
        let op = self.store.update(name, |op| {
            if op.phase != Phase::PendingMerge {
                return Err(TransitionError::illegal(name, Transition::Merge, op.phase));
            }
            if op.merge_commit.as_deref() == Some(commit) {
                return Ok(Mutation::unchanged(op.clone()));
            }
            op.merge_commit = Some(commit.to_string());
            Ok(Mutation::changed(op.clone()).with_event("merge.landed", json!({ "commit": commit })))
        })?;
        debug!(operation = name, commit, "merge commit recorded");
        Ok(op)
    }

    /// Verified integration. Closes the operation's issue and notifies the
    /// operations it was blocking.
    pub fn mark_merged(&self, name: &str, commit: &str) -> Result<Operation, EngineError> {
        if commit.trim().is_empty() {
            return Err(EngineError::Unsupported(
                "a merged operation needs the commit that landed".to_string(),
            ));
        }
        let op = self.apply(name, Transition::Merge, |op| {
            op.merge_commit = Some(commit.to_string());
            op.merged_at = Some(Utc::now());
            op.merge_status = Some(MergeStatus::Merged);
            op.merge_queued = false;
            op.error = None;
            Ok(json!({ "commit": commit }))
        })?;
        if let Some(issue) = &op.external_ref
            && let Err(err) = self.tracker.close(issue, "merged")
        {
            warn!(operation = name, issue = %issue, error = %err, "could not close merged issue");
        }
        self.notify_dependents(&op);
        Ok(op)
    }

    pub fn mark_conflict(&self, name: &str, detail: &str) -> Result<Operation, EngineError> {
        self.apply(name, Transition::Conflict, |op| {
            op.merge_status = Some(MergeStatus::Conflict);
            op.merge_queued = false;
            op.error = Some(detail.to_string());
            Ok(json!({ "detail": detail }))
        })
    }

    /// The push went through but the commit never showed up on the remote.
    pub fn mark_verification_failed(
        &self,
        name: &str,
        commit: &str,
        diagnostics: &str,
    ) -> Result<Operation, EngineError> {
        self.apply(name, Transition::Fail, |op| {
            op.merge_commit = Some(commit.to_string());
            op.merge_status = Some(MergeStatus::VerificationFailed);
            op.merge_queued = false;
            op.error = Some(diagnostics.to_string());
            Ok(json!({ "commit": commit, "error": diagnostics }))
        })
    }

    /// The push never reached the remote. The locally landed commit is not
    /// on trunk, so it is not kept as the merge commit.
    pub fn mark_push_failed(&self, name: &str, reason: &str) -> Result<Operation, EngineError> {
        self.apply(name, Transition::Fail, |op| {
            let discarded = op.merge_commit.take();
            op.merge_queued = false;
            op.error = Some(reason.to_string());
            Ok(json!({ "error": reason, "discarded_commit": discarded }))
        })
    }

    /// The single automatic retry after a conflict.
    pub fn retry_after_conflict(&self, name: &str) -> Result<Operation, EngineError> {
        self.apply(name, Transition::RequestMerge, |op| {
            if op.retried {
                return Err(TransitionError::RetryExhausted {
                    name: op.name.clone(),
                });
            }
            op.retried = true;
            op.merge_queued = true;
            op.merge_status = None;
            op.merge_commit = None;
            op.error = None;
            Ok(json!({ "retry": true }))
        })
    }

    /// The daemon's one-time kick back to execution when tracked work is
    /// still open.
    pub fn reopen(&self, name: &str, reason: &str) -> Result<Operation, EngineError> {
        self.apply(name, Transition::Reopen, |op| {
            if op.auto_resumed {
                return Err(TransitionError::AlreadyReopened {
                    name: op.name.clone(),
                });
            }
            op.auto_resumed = true;
            op.merge_queued = false;
            op.completed_at = None;
            Ok(json!({ "reason": reason }))
        })
    }

    /// Restart from `init`; the one-shot flags are cleared with the rest.
    pub fn resume(&self, name: &str) -> Result<Operation, EngineError> {
        self.apply(name, Transition::Resume, |op| {
            op.error = None;
            op.merge_commit = None;
            op.merge_status = None;
            op.merge_queued = false;
            op.completed_at = None;
            op.retried = false;
            op.auto_resumed = false;
            Ok(Value::Null)
        })
    }

    pub fn cancel(&self, name: &str, reason: Option<&str>) -> Result<Operation, EngineError> {
        self.apply(name, Transition::Cancel, |op| {
            op.merge_queued = false;
            if let Some(reason) = reason {
                op.error = Some(reason.to_string());
            }
            Ok(json!({ "reason": reason }))
        })
    }

    /// Move to `target` by whichever transition connects the current phase
    /// to it. Merge outcomes are owned by the queue and refused here.
    pub fn advance(&self, name: &str, target: Phase) -> Result<Operation, EngineError> {
        let current = self.load(name)?.phase;
        let transition = Transition::between(current, target).ok_or(TransitionError::NoEdge {
            from: current,
            to: target,
        })?;
        match transition {
            Transition::Plan => self.plan(name),
            Transition::Queue | Transition::Reopen => {
                self.apply(name, transition, |_| Ok(Value::Null))
            }
            Transition::Start => self.start(name),
            Transition::Complete => self.complete(name),
            Transition::Fail => self.fail(name, "failed by operator"),
            Transition::Interrupt => self.interrupt(name, None),
            Transition::RequestMerge => self.request_merge(name),
            Transition::Resume => self.resume(name),
            Transition::Cancel => self.cancel(name, None),
            Transition::Merge | Transition::Conflict => Err(EngineError::Unsupported(format!(
                "{} is recorded by the merge queue, not set by hand",
                transition.target()
            ))),
        }
    }

    /// Pause work. Idempotent; survives restarts because it lives in the
    /// document.
    pub fn hold(&self, name: &str) -> Result<Operation, EngineError> {
        self.set_hold(name, true)
    }

    pub fn unhold(&self, name: &str) -> Result<Operation, EngineError> {
        self.set_hold(name, false)
    }

    fn set_hold(&self, name: &str, held: bool) -> Result<Operation, EngineError> {
        let op = self
            .store
            .update::<_, StoreError, _>(name, |op| {
                if op.held == held {
                    return Ok(Mutation::unchanged(op.clone()));
                }
                op.held = held;
                op.held_at = held.then(Utc::now);
                let event = if held { "hold.set" } else { "hold.cleared" };
                Ok(Mutation::changed(op.clone()).with_event(event, Value::Null))
            })
            .map_err(|err| match err {
                UpdateError::Store(err) | UpdateError::Rejected(err) => err,
            })?;
        Ok(op)
    }

    pub fn attach_session(&self, name: &str, session_id: &str) -> Result<Operation, EngineError> {
        Ok(self
            .store
            .write(name, OperationField::SessionId, json!(session_id))?)
    }

    pub fn detach_session(&self, name: &str) -> Result<Operation, EngineError> {
        Ok(self
            .store
            .write(name, OperationField::SessionId, Value::Null)?)
    }

    /// Record where the work lives. `None` leaves a field as it is.
    pub fn set_workspace(
        &self,
        name: &str,
        worktree: Option<&Path>,
        branch: Option<&str>,
    ) -> Result<Operation, EngineError> {
        let mut changes = Vec::new();
        if let Some(worktree) = worktree {
            changes.push((OperationField::WorktreePath, json!(worktree)));
        }
        if let Some(branch) = branch {
            changes.push((OperationField::Branch, json!(branch)));
        }
        if changes.is_empty() {
            return self.load(name);
        }
        Ok(self.store.bulk_write(name, &changes)?)
    }

    // ── Dependencies ──

    /// Open blockers, computed from the tracker on every call. A blocker the
    /// tracker cannot find keeps the operation blocked.
    pub fn blockers(&self, name: &str) -> Result<Vec<Blocker>, EngineError> {
        let op = self.load(name)?;
        let Some(issue) = op.external_ref.as_deref() else {
            return Ok(Vec::new());
        };
        let ids = match self.tracker.get_blockers(issue) {
            Ok(ids) => ids,
            Err(TrackerError::NotFound(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut open = Vec::new();
        for id in ids {
            match self.tracker.get_status(&id) {
                Ok(IssueStatus::Done) => continue,
                Ok(IssueStatus::Open) | Err(TrackerError::NotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
            let label = self
                .tracker
                .resolve_label(&id)
                .ok()
                .flatten()
                .unwrap_or_else(|| id.clone());
            open.push(Blocker { issue: id, label });
        }
        Ok(open)
    }

    pub fn is_blocked(&self, name: &str) -> Result<bool, EngineError> {
        Ok(!self.blockers(name)?.is_empty())
    }

    /// Tell every operation blocked by `op` that it landed. Dependents are
    /// not resumed. Returns the names notified.
    pub fn notify_dependents(&self, op: &Operation) -> Vec<String> {
        let Some(issue) = op.external_ref.as_deref() else {
            return Vec::new();
        };
        let dependents = match self.tracker.find_blocking(issue) {
            Ok(dependents) if !dependents.is_empty() => dependents,
            Ok(_) => return Vec::new(),
            Err(err) => {
                warn!(operation = %op.name, error = %err, "could not look up dependents");
                return Vec::new();
            }
        };
        let names = match self.store.list() {
            Ok(names) => names,
            Err(err) => {
                warn!(operation = %op.name, error = %err, "could not list operations");
                return Vec::new();
            }
        };

        let mut notified = Vec::new();
        for name in names {
            let Ok(fields) = self.store.read(&name, &[OperationField::ExternalRef]) else {
                continue;
            };
            let matches = fields
                .get(&OperationField::ExternalRef)
                .and_then(Value::as_str)
                .is_some_and(|r| dependents.iter().any(|d| d == r));
            if !matches {
                continue;
            }
            let detail = json!({ "blocker": op.name, "issue": issue });
            match self.store.append_event(&name, "dependency.merged", detail) {
                Ok(_) => notified.push(name),
                Err(err) => warn!(operation = %name, error = %err, "could not notify dependent"),
            }
        }
        if !notified.is_empty() {
            info!(operation = %op.name, dependents = ?notified, "dependents notified");
        }
        notified
    }

    // ── Merge readiness ──

    /// The first failing guard, in order: phase, worktree, session, open
    /// tracked issues. `None` means merge-ready.
    pub fn merge_ready_reason(&self, name: &str) -> Option<NotReady> {
        match self.store.load(name) {
            Ok(op) => self.readiness(&op).err(),
            Err(StoreError::NotFound(_)) => Some(NotReady::OperationMissing(name.to_string())),
            Err(err) => Some(NotReady::StateUnreadable(err.to_string())),
        }
    }

    pub fn is_merge_ready(&self, name: &str) -> bool {
        self.merge_ready_reason(name).is_none()
    }

    pub fn readiness(&self, op: &Operation) -> Result<(), NotReady> {
        if !op.phase.is_mergeable() {
            return Err(NotReady::Phase(op.phase));
        }
        match &op.worktree_path {
            Some(path) if path.is_dir() => {}
            other => return Err(NotReady::WorktreeMissing(other.clone())),
        }
        if let Some(session) = &op.session_id
            && self.sessions.is_alive(session)
        {
            return Err(NotReady::SessionAlive(session.clone()));
        }
        if let Some(issue) = &op.external_ref {
            let open = self
                .tracker
                .open_children(issue)
                .map_err(|err| NotReady::TrackerUnavailable(err.to_string()))?;
            if !open.is_empty() {
                return Err(NotReady::OpenIssues(open));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use lander_bd::NewIssue;

    fn completed(harness: &Harness, name: &str) -> Operation {
        let machine = harness.machine();
        let worktree = harness.worktree(name);
        machine
            .create(
                name,
                OperationType::Feature,
                CreateOptions {
                    worktree_path: Some(worktree),
                    ..CreateOptions::default()
                },
            )
            .expect("create");
        machine.plan(name).expect("plan");
        machine.queue(name).expect("queue");
        machine.start(name).expect("start");
        machine.complete(name).expect("complete")
    }

    fn issue(harness: &Harness, title: &str, parent: Option<&str>) -> String {
        harness
            .tracker
            .create(NewIssue {
                title: title.to_string(),
                operation: Some(title.to_string()),
                parent: parent.map(str::to_string),
                ..NewIssue::default()
            })
            .expect("create issue")
            .id
    }

    #[test]
    fn happy_path_walks_the_lifecycle() {
        let harness = Harness::new("lifecycle");
        let machine = harness.machine();
        let op = completed(&harness, "schema-api");
        assert_eq!(op.phase, Phase::Completed);
        assert!(op.completed_at.is_some());

        machine.request_merge("schema-api").expect("request merge");
        machine
            .record_merge_commit("schema-api", "c0ffee")
            .expect("record commit");
        let merged = machine.mark_merged("schema-api", "c0ffee").expect("merge");
        assert_eq!(merged.phase, Phase::Merged);
        assert_eq!(merged.merge_status, Some(MergeStatus::Merged));
        assert_eq!(merged.merge_commit.as_deref(), Some("c0ffee"));
        assert!(merged.merged_at.is_some());

        let events: Vec<String> = machine
            .events("schema-api")
            .expect("events")
            .into_iter()
            .map(|record| record.event)
            .collect();
        assert_eq!(
            events,
            vec![
                "operation.created",
                "phase.plan",
                "phase.queue",
                "phase.start",
                "phase.complete",
                "phase.request_merge",
                "merge.landed",
                "phase.merge",
            ]
        );
    }

    #[test]
    fn illegal_transition_leaves_the_document_untouched() {
        let harness = Harness::new("illegal");
        let machine = harness.machine();
        machine
            .create("probe", OperationType::Chore, CreateOptions::default())
            .expect("create");
        let path = harness
            .layout
            .op_state_path("probe")
            .expect("state path");
        let before = std::fs::read(&path).expect("read before");

        let err = machine.mark_merged("probe", "abc").expect_err("init → merged");
        assert!(matches!(
            err,
            EngineError::Transition(TransitionError::Illegal {
                from: Phase::Init,
                ..
            })
        ));
        assert!(matches!(
            machine.advance("probe", Phase::Merged),
            Err(EngineError::Transition(TransitionError::NoEdge { .. }))
        ));
        assert_eq!(std::fs::read(&path).expect("read after"), before);
    }

    #[test]
    fn merge_outcomes_are_not_set_by_hand() {
        let harness = Harness::new("advance");
        let machine = harness.machine();
        completed(&harness, "feature");
        machine.request_merge("feature").expect("request");
        assert!(matches!(
            machine.advance("feature", Phase::Merged),
            Err(EngineError::Unsupported(_))
        ));
        let failed = machine.advance("feature", Phase::Failed).expect("fail");
        assert_eq!(failed.error.as_deref(), Some("failed by operator"));
        let restarted = machine.advance("feature", Phase::Init).expect("resume");
        assert_eq!(restarted.phase, Phase::Init);
        assert_eq!(restarted.error, None);
    }

    #[test]
    fn held_operation_refuses_to_start_until_cleared() {
        let harness = Harness::new("hold");
        let machine = harness.machine();
        machine
            .create("paused", OperationType::Fix, CreateOptions::default())
            .expect("create");
        machine.plan("paused").expect("plan");
        machine.queue("paused").expect("queue");

        let held = machine.hold("paused").expect("hold");
        assert!(held.held);
        assert!(held.held_at.is_some());
        machine.hold("paused").expect("hold is idempotent");

        // A fresh machine over the same directory still sees the hold.
        let reopened = harness.machine();
        assert!(matches!(
            reopened.start("paused"),
            Err(EngineError::Transition(TransitionError::Held { .. }))
        ));

        let cleared = reopened.unhold("paused").expect("unhold");
        assert!(!cleared.held);
        assert_eq!(cleared.held_at, None);
        assert_eq!(
            reopened.start("paused").expect("start").phase,
            Phase::Executing
        );
    }

    #[test]
    fn conflict_retry_is_spent_once() {
        let harness = Harness::new("retry");
        let machine = harness.machine();
        completed(&harness, "clash");
        machine.request_merge("clash").expect("request");
        machine.mark_conflict("clash", "README.md").expect("conflict");

        let retried = machine.retry_after_conflict("clash").expect("retry");
        assert!(retried.retried);
        assert_eq!(retried.phase, Phase::PendingMerge);

        machine.mark_conflict("clash", "README.md").expect("conflict again");
        assert!(matches!(
            machine.retry_after_conflict("clash"),
            Err(EngineError::Transition(TransitionError::RetryExhausted { .. }))
        ));
        assert_eq!(machine.load("clash").expect("load").phase, Phase::Conflict);
    }

    #[test]
    fn reopen_is_one_shot_and_resume_resets_flags() {
        let harness = Harness::new("reopen");
        let machine = harness.machine();
        completed(&harness, "epic");
        let reopened = machine.reopen("epic", "1 issue still open").expect("reopen");
        assert_eq!(reopened.phase, Phase::Queued);
        assert!(reopened.auto_resumed);

        machine.start("epic").expect("start");
        machine.complete("epic").expect("complete");
        assert!(matches!(
            machine.reopen("epic", "again"),
            Err(EngineError::Transition(TransitionError::AlreadyReopened { .. }))
        ));

        machine.request_merge("epic").expect("request");
        machine
            .mark_verification_failed("epic", "abc123", "not found on origin/main")
            .expect("verification failed");
        let op = machine.load("epic").expect("load");
        assert_eq!(op.phase, Phase::Failed);
        assert_eq!(op.merge_status, Some(MergeStatus::VerificationFailed));
        assert_eq!(op.merge_commit.as_deref(), Some("abc123"));

        let restarted = machine.resume("epic").expect("resume");
        assert_eq!(restarted.phase, Phase::Init);
        assert!(!restarted.auto_resumed);
        assert_eq!(restarted.merge_commit, None);
    }

    #[test]
    fn blocked_until_blocker_merges_then_dependent_is_notified() {
        let harness = Harness::new("deps");
        let machine = harness.machine();
        let a_issue = issue(&harness, "schema-api", None);
        let b_issue = issue(&harness, "frontend", None);
        harness
            .tracker
            .add_blocked_by(&b_issue, std::slice::from_ref(&a_issue))
            .expect("edge");

        let worktree = harness.worktree("schema-api");
        machine
            .create(
                "schema-api",
                OperationType::Feature,
                CreateOptions {
                    external_ref: Some(a_issue.clone()),
                    worktree_path: Some(worktree),
                    ..CreateOptions::default()
                },
            )
            .expect("create a");
        machine
            .create(
                "frontend",
                OperationType::Feature,
                CreateOptions {
                    external_ref: Some(b_issue),
                    ..CreateOptions::default()
                },
            )
            .expect("create b");

        assert!(machine.is_blocked("frontend").expect("blocked"));
        assert_eq!(
            machine.blockers("frontend").expect("blockers"),
            vec![Blocker {
                issue: a_issue,
                label: "schema-api".to_string()
            }]
        );
        assert!(!machine.is_blocked("schema-api").expect("unblocked"));

        for step in [Phase::Planned, Phase::Queued, Phase::Executing, Phase::Completed] {
            machine.advance("schema-api", step).expect("advance");
            assert!(machine.is_blocked("frontend").expect("still blocked"));
        }
        machine.request_merge("schema-api").expect("request");
        machine.mark_merged("schema-api", "abc").expect("merge");

        assert!(!machine.is_blocked("frontend").expect("unblocked"));
        let events = machine.events("frontend").expect("events");
        let last = events.last().expect("notification");
        assert_eq!(last.event, "dependency.merged");
        assert_eq!(last.detail["blocker"], "schema-api");
        assert_eq!(
            machine.load("frontend").expect("load").phase,
            Phase::Init,
            "dependents are notified, not resumed"
        );
    }

    #[test]
    fn readiness_guards_report_the_first_failure() {
        let harness = Harness::new("readiness");
        let machine = harness.machine();
        let epic = issue(&harness, "epic", None);
        let child = issue(&harness, "child", Some(&epic));

        assert_eq!(
            machine.merge_ready_reason("ghost"),
            Some(NotReady::OperationMissing("ghost".to_string()))
        );

        machine
            .create(
                "epic",
                OperationType::Feature,
                CreateOptions {
                    external_ref: Some(epic.clone()),
                    ..CreateOptions::default()
                },
            )
            .expect("create");
        assert_eq!(
            machine.merge_ready_reason("epic"),
            Some(NotReady::Phase(Phase::Init))
        );

        for step in [Phase::Planned, Phase::Queued, Phase::Executing, Phase::Completed] {
            machine.advance("epic", step).expect("advance");
        }
        assert_eq!(
            machine.merge_ready_reason("epic"),
            Some(NotReady::WorktreeMissing(None))
        );

        let worktree = harness.worktree("epic");
        machine
            .set_workspace("epic", Some(&worktree), Some("feature/epic"))
            .expect("workspace");
        machine.attach_session("epic", "live-1").expect("attach");
        harness.sessions.set_alive("live-1", true);
        assert_eq!(
            machine.merge_ready_reason("epic"),
            Some(NotReady::SessionAlive("live-1".to_string()))
        );

        harness.sessions.set_alive("live-1", false);
        assert_eq!(
            machine.merge_ready_reason("epic"),
            Some(NotReady::OpenIssues(vec![child.clone()]))
        );

        harness.tracker.close(&child, "done").expect("close");
        assert!(machine.is_merge_ready("epic"));
        machine.detach_session("epic").expect("detach");
        assert_eq!(machine.load("epic").expect("load").session_id, None);
    }

    #[test]
    fn tracker_failure_is_unknown_not_ready() {
        let harness = Harness::new("tracker-down");
        let machine = harness.machine();
        completed(&harness, "lonely");
        machine
            .store()
            .write("lonely", OperationField::ExternalRef, json!("bd-1"))
            .expect("external ref");
        // A corrupt tracker file is an unavailable tracker.
        std::fs::write(harness.tracker.path(), "not json\n").expect("corrupt tracker");
        assert!(matches!(
            machine.merge_ready_reason("lonely"),
            Some(NotReady::TrackerUnavailable(_))
        ));
    }
}
