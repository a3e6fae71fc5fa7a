//! Integration queue entries and the in-memory queue document.
//!
//! The document is persisted by `lander-store`; every mutation here is a
//! pure function of the document so the store can apply it under its lock.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::error::QueueError;

pub const QUEUE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Operation,
    Branch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Conflict,
    /// Sent back to execution; ignored until re-enqueued.
    Resumed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Processing => "processing",
            EntryStatus::Completed => "completed",
            EntryStatus::Failed => "failed",
            EntryStatus::Conflict => "conflict",
            EntryStatus::Resumed => "resumed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryStatus::Completed | EntryStatus::Failed)
    }
}

impl Display for EntryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Operation name, or bare branch name when `kind == Branch`.
    pub subject: String,
    pub kind: EntryKind,
    /// Lower runs sooner.
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub subject: String,
    pub kind: EntryKind,
    pub priority: i32,
    pub external_ref: Option<String>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Added(QueueEntry),
    /// A finished, conflicted, or resumed entry was reset to pending.
    Requeued(QueueEntry),
    /// The subject is already pending or processing.
    AlreadyQueued(QueueEntry),
}

impl EnqueueOutcome {
    pub fn entry(&self) -> &QueueEntry {
        match self {
            EnqueueOutcome::Added(entry)
            | EnqueueOutcome::Requeued(entry)
            | EnqueueOutcome::AlreadyQueued(entry) => entry,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDoc {
    #[serde(default = "default_queue_schema")]
    pub schema_version: u32,
    #[serde(default)]
    pub entries: Vec<QueueEntry>,
}

fn default_queue_schema() -> u32 {
    QUEUE_SCHEMA_VERSION
}

impl Default for QueueDoc {
    fn default() -> Self {
        Self {
            schema_version: QUEUE_SCHEMA_VERSION,
            entries: Vec::new(),
        }
    }
}

impl QueueDoc {
    pub fn entry(&self, subject: &str) -> Option<&QueueEntry> {
        self.entries.iter().find(|entry| entry.subject == subject)
    }

    fn entry_mut(&mut self, subject: &str) -> Result<&mut QueueEntry, QueueError> {
        self.entries
            .iter_mut()
            .find(|entry| entry.subject == subject)
            .ok_or_else(|| QueueError::NotFound(subject.to_string()))
    }

    pub fn processing(&self) -> Option<&QueueEntry> {
        self.entries
            .iter()
            .find(|entry| entry.status == EntryStatus::Processing)
    }

    /// Pending entries ordered by `(priority asc, enqueued_at asc)`; subject
    /// breaks exact ties deterministically.
    pub fn pending_in_order(&self) -> Vec<&QueueEntry> {
        let mut pending: Vec<&QueueEntry> = self
            .entries
            .iter()
            .filter(|entry| entry.status == EntryStatus::Pending)
            .collect();
        sort_dispatch_order(&mut pending);
        pending
    }

    /// 1-based position among pending entries.
    pub fn position(&self, subject: &str) -> Option<usize> {
        self.pending_in_order()
            .iter()
            .position(|entry| entry.subject == subject)
            .map(|index| index + 1)
    }

    pub fn enqueue(&mut self, request: EnqueueRequest) -> Result<EnqueueOutcome, QueueError> {
        let subject = request.subject.trim().to_string();
        if subject.is_empty() {
            return Err(QueueError::EmptySubject);
        }

        if let Some(existing) = self.entries.iter_mut().find(|e| e.subject == subject) {
            if matches!(
                existing.status,
                EntryStatus::Pending | EntryStatus::Processing
            ) {
                return Ok(EnqueueOutcome::AlreadyQueued(existing.clone()));
            }
            existing.kind = request.kind;
            existing.priority = request.priority;
            existing.enqueued_at = request.now;
            existing.updated_at = request.now;
            existing.status = EntryStatus::Pending;
            existing.error = None;
            if request.external_ref.is_some() {
                existing.external_ref = request.external_ref;
            }
            return Ok(EnqueueOutcome::Requeued(existing.clone()));
        }

        let entry = QueueEntry {
            subject,
            kind: request.kind,
            priority: request.priority,
            enqueued_at: request.now,
            updated_at: request.now,
            status: EntryStatus::Pending,
            external_ref: request.external_ref,
            error: None,
        };
        self.entries.push(entry.clone());
        Ok(EnqueueOutcome::Added(entry))
    }

    /// Claim `subject` for integration. Fails if any other entry is already
    /// processing, which keeps at most one integration in flight.
    pub fn mark_processing(
        &mut self,
        subject: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, QueueError> {
        if let Some(current) = self.processing() {
            return Err(QueueError::AlreadyProcessing {
                subject: subject.to_string(),
                current: current.subject.clone(),
            });
        }
        let entry = self.entry_mut(subject)?;
        if entry.status != EntryStatus::Pending {
            return Err(QueueError::UnexpectedStatus {
                subject: subject.to_string(),
                status: entry.status,
                expected: EntryStatus::Pending,
            });
        }
        entry.status = EntryStatus::Processing;
        entry.updated_at = now;
        entry.error = None;
        Ok(entry.clone())
    }

    /// Record the outcome of a processing entry.
    pub fn finish(
        &mut self,
        subject: &str,
        status: EntryStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, QueueError> {
        let entry = self.entry_mut(subject)?;
        if entry.status != EntryStatus::Processing {
            return Err(QueueError::UnexpectedStatus {
                subject: subject.to_string(),
                status: entry.status,
                expected: EntryStatus::Processing,
            });
        }
        entry.status = status;
        entry.error = error;
        entry.updated_at = now;
        Ok(entry.clone())
    }

    /// Move an entry to `to` only while it still sits in one of `from`.
    /// Returns false when the entry has moved on or is gone.
    pub fn transition(
        &mut self,
        subject: &str,
        from: &[EntryStatus],
        to: EntryStatus,
        now: DateTime<Utc>,
    ) -> bool {
        let Ok(entry) = self.entry_mut(subject) else {
            return false;
        };
        if !from.contains(&entry.status) || entry.status == to {
            return false;
        }
        entry.status = to;
        entry.updated_at = now;
        if to == EntryStatus::Pending {
            entry.error = None;
        }
        true
    }

    /// Remove an entry only while it still sits in one of `from`.
    pub fn remove_in(&mut self, subject: &str, from: &[EntryStatus]) -> Option<QueueEntry> {
        let current = self.entry(subject)?.status;
        if !from.contains(&current) {
            return None;
        }
        self.remove(subject)
    }

    /// Force a status regardless of the current one.
    pub fn set_status(
        &mut self,
        subject: &str,
        status: EntryStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let entry = self.entry_mut(subject)?;
        if entry.status == status {
            return Ok(false);
        }
        entry.status = status;
        entry.updated_at = now;
        if status == EntryStatus::Pending {
            entry.error = None;
        }
        Ok(true)
    }

    pub fn remove(&mut self, subject: &str) -> Option<QueueEntry> {
        let index = self.entries.iter().position(|e| e.subject == subject)?;
        Some(self.entries.remove(index))
    }

    /// Drop terminal entries last touched before `now - retention`.
    pub fn prune_terminal(&mut self, now: DateTime<Utc>, retention: Duration) -> Vec<String> {
        let cutoff = now - retention;
        let mut pruned = Vec::new();
        self.entries.retain(|entry| {
            let expired = entry.status.is_terminal() && entry.updated_at < cutoff;
            if expired {
                pruned.push(entry.subject.clone());
            }
            !expired
        });
        pruned
    }
}

pub fn sort_dispatch_order(entries: &mut [&QueueEntry]) {
    entries.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(a.enqueued_at.cmp(&b.enqueued_at))
            .then(a.subject.cmp(&b.subject))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0)
            .single()
            .expect("fixed time")
    }

    fn request(subject: &str, priority: i32, now: DateTime<Utc>) -> EnqueueRequest {
        EnqueueRequest {
            subject: subject.to_string(),
            kind: EntryKind::Operation,
            priority,
            external_ref: None,
            now,
        }
    }

    #[test]
    fn pending_order_is_priority_then_age() {
        let mut doc = QueueDoc::default();
        doc.enqueue(request("late-urgent", 0, at(5))).expect("enqueue");
        doc.enqueue(request("early-normal", 2, at(1))).expect("enqueue");
        doc.enqueue(request("early-urgent", 0, at(2))).expect("enqueue");

        let order: Vec<&str> = doc
            .pending_in_order()
            .iter()
            .map(|e| e.subject.as_str())
            .collect();
        assert_eq!(order, vec!["early-urgent", "late-urgent", "early-normal"]);
        assert_eq!(doc.position("early-normal"), Some(3));
    }

    #[test]
    fn only_one_entry_may_process() {
        let mut doc = QueueDoc::default();
        doc.enqueue(request("a", 1, at(0))).expect("enqueue");
        doc.enqueue(request("b", 1, at(1))).expect("enqueue");

        doc.mark_processing("a", at(2)).expect("first claim");
        let err = doc
            .mark_processing("b", at(3))
            .expect_err("second claim must fail");
        assert_eq!(
            err,
            QueueError::AlreadyProcessing {
                subject: "b".to_string(),
                current: "a".to_string()
            }
        );

        doc.finish("a", EntryStatus::Completed, None, at(4))
            .expect("finish");
        doc.mark_processing("b", at(5)).expect("claim after finish");
    }

    #[test]
    fn enqueue_is_idempotent_for_live_entries_and_requeues_finished_ones() {
        let mut doc = QueueDoc::default();
        let first = doc.enqueue(request("a", 1, at(0))).expect("enqueue");
        assert!(matches!(first, EnqueueOutcome::Added(_)));

        let again = doc.enqueue(request("a", 0, at(1))).expect("enqueue");
        assert!(matches!(again, EnqueueOutcome::AlreadyQueued(_)));
        assert_eq!(doc.entry("a").expect("entry").priority, 1);

        doc.mark_processing("a", at(2)).expect("claim");
        doc.finish("a", EntryStatus::Conflict, Some("overlap".into()), at(3))
            .expect("finish");

        let requeued = doc.enqueue(request("a", 0, at(4))).expect("enqueue");
        assert!(matches!(requeued, EnqueueOutcome::Requeued(_)));
        let entry = doc.entry("a").expect("entry");
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.enqueued_at, at(4));
        assert_eq!(entry.error, None);
        assert_eq!(doc.entries.len(), 1);
    }

    #[test]
    fn finish_requires_processing() {
        let mut doc = QueueDoc::default();
        doc.enqueue(request("a", 1, at(0))).expect("enqueue");
        let err = doc
            .finish("a", EntryStatus::Completed, None, at(1))
            .expect_err("pending entry cannot finish");
        assert!(matches!(err, QueueError::UnexpectedStatus { .. }));
    }

    #[test]
    fn transition_leaves_entries_that_moved_on() {
        let mut doc = QueueDoc::default();
        doc.enqueue(request("a", 1, at(0))).expect("enqueue");
        doc.mark_processing("a", at(1)).expect("claim");
        doc.finish("a", EntryStatus::Conflict, Some("overlap".into()), at(2))
            .expect("finish");

        assert!(!doc.transition("a", &[EntryStatus::Processing], EntryStatus::Pending, at(3)));
        let entry = doc.entry("a").expect("entry");
        assert_eq!(entry.status, EntryStatus::Conflict);
        assert_eq!(entry.updated_at, at(2));
        assert!(!doc.transition("gone", &[EntryStatus::Pending], EntryStatus::Resumed, at(3)));

        assert!(doc.transition("a", &[EntryStatus::Conflict], EntryStatus::Pending, at(4)));
        let entry = doc.entry("a").expect("entry");
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.error, None);

        doc.mark_processing("a", at(5)).expect("claim");
        assert!(doc.remove_in("a", &[EntryStatus::Pending, EntryStatus::Conflict]).is_none());
        assert!(doc.entry("a").is_some());
    }

    #[test]
    fn prune_removes_only_old_terminal_entries() {
        let mut doc = QueueDoc::default();
        for subject in ["old-done", "new-done", "old-pending"] {
            doc.enqueue(request(subject, 1, at(0))).expect("enqueue");
        }
        doc.set_status("old-done", EntryStatus::Completed, at(1))
            .expect("status");
        doc.set_status("new-done", EntryStatus::Completed, at(30))
            .expect("status");

        let pruned = doc.prune_terminal(at(40), Duration::minutes(20));
        assert_eq!(pruned, vec!["old-done".to_string()]);
        assert!(doc.entry("new-done").is_some());
        assert!(doc.entry("old-pending").is_some());
    }

    #[test]
    fn blank_subject_is_rejected() {
        let mut doc = QueueDoc::default();
        let err = doc
            .enqueue(request("  ", 1, at(0)))
            .expect_err("blank subject");
        assert_eq!(err, QueueError::EmptySubject);
    }
}
