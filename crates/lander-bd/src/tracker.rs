//! `Tracker` over the JSONL issue memory.
//!
//! Reads take no lock (the file is replaced atomically); writes go through
//! [`mutate_store_jsonl`].

use lander_kernel::{IssueStatus, Tracker, TrackerError};
use lander_store::LockError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::atomic_store::{AtomicStoreMutationError, mutate_store_jsonl};
use crate::dependency::DepType;
use crate::issue::{Issue, OPERATION_LABEL_PREFIX};
use crate::memory::{MemoryStore, MemoryStoreError};

pub const ISSUE_ID_PREFIX: &str = "bd";

#[derive(Debug, Clone)]
pub struct JsonlTracker {
    path: PathBuf,
    lock_timeout: Duration,
}

/// Fields for a new issue.
#[derive(Debug, Clone, Default)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    /// Operation this issue represents; stored as an `op:<name>` label.
    pub operation: Option<String>,
    /// Track the new issue under this parent.
    pub parent: Option<String>,
    pub priority: Option<i32>,
}

impl JsonlTracker {
    pub fn new(path: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            lock_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Result<MemoryStore, TrackerError> {
        MemoryStore::load_jsonl(&self.path).map_err(storage)
    }

    pub fn create(&self, new: NewIssue) -> Result<Issue, TrackerError> {
        if new.title.trim().is_empty() {
            return Err(TrackerError::Storage("issue title must not be empty".to_string()));
        }
        self.mutate(|store| {
            let mut issue = Issue::new(store.next_id(ISSUE_ID_PREFIX), new.title.trim());
            issue.description = new.description;
            if let Some(priority) = new.priority {
                issue.priority = priority;
            }
            if let Some(operation) = new.operation {
                issue
                    .labels
                    .push(format!("{OPERATION_LABEL_PREFIX}{operation}"));
            }
            let id = issue.id.clone();
            store.upsert_issue(issue);
            if let Some(parent) = new.parent {
                store.add_dependency(&id, &parent, DepType::ParentChild, String::new())?;
            }
            let created = store
                .issue(&id)
                .cloned()
                .ok_or_else(|| MemoryStoreError::IssueNotFound(id.clone()))?;
            Ok((created, true))
        })
    }

    pub fn reopen(&self, issue: &str) -> Result<(), TrackerError> {
        self.mutate(|store| {
            let target = store
                .issue_mut(issue)
                .ok_or_else(|| MemoryStoreError::IssueNotFound(issue.to_string()))?;
            if !target.is_closed() {
                return Ok(((), false));
            }
            target.set_status("open".to_string());
            target.close_reason.clear();
            Ok(((), true))
        })
    }

    fn mutate<T, F>(&self, mutator: F) -> Result<T, TrackerError>
    where
        F: FnOnce(&mut MemoryStore) -> Result<(T, bool), MemoryStoreError>,
    {
        mutate_store_jsonl(&self.path, self.lock_timeout, mutator).map_err(|err| match err {
            AtomicStoreMutationError::Lock(
                err @ (LockError::Busy { .. } | LockError::Timeout { .. }),
            ) => TrackerError::Busy(err.to_string()),
            AtomicStoreMutationError::Lock(err) => TrackerError::Storage(err.to_string()),
            AtomicStoreMutationError::Store(err) | AtomicStoreMutationError::Mutation(err) => {
                storage(err)
            }
        })
    }
}

fn storage(err: MemoryStoreError) -> TrackerError {
    match err {
        MemoryStoreError::IssueNotFound(id) => TrackerError::NotFound(id),
        other => TrackerError::Storage(other.to_string()),
    }
}

impl Tracker for JsonlTracker {
    fn get_blockers(&self, issue: &str) -> Result<Vec<String>, TrackerError> {
        let store = self.snapshot()?;
        if store.issue(issue).is_none() {
            return Err(TrackerError::NotFound(issue.to_string()));
        }
        Ok(store.blockers_of(issue))
    }

    fn get_status(&self, issue: &str) -> Result<IssueStatus, TrackerError> {
        let store = self.snapshot()?;
        match store.issue(issue) {
            Some(found) if found.is_closed() => Ok(IssueStatus::Done),
            Some(_) => Ok(IssueStatus::Open),
            None => Err(TrackerError::NotFound(issue.to_string())),
        }
    }

    fn find_blocking(&self, issue: &str) -> Result<Vec<String>, TrackerError> {
        Ok(self.snapshot()?.dependents_of(issue, DepType::Blocks))
    }

    fn resolve_label(&self, issue: &str) -> Result<Option<String>, TrackerError> {
        Ok(self
            .snapshot()?
            .issue(issue)
            .and_then(Issue::operation_label)
            .map(str::to_string))
    }

    fn add_blocked_by(&self, issue: &str, blockers: &[String]) -> Result<(), TrackerError> {
        self.mutate(|store| {
            let mut changed = false;
            for blocker in blockers {
                changed |= store.add_dependency(issue, blocker, DepType::Blocks, String::new())?;
            }
            Ok(((), changed))
        })?;
        debug!(issue, blockers = ?blockers, "registered blocking edges");
        Ok(())
    }

    fn close(&self, issue: &str, reason: &str) -> Result<(), TrackerError> {
        self.mutate(|store| {
            let target = store
                .issue_mut(issue)
                .ok_or_else(|| MemoryStoreError::IssueNotFound(issue.to_string()))?;
            if target.is_closed() {
                return Ok(((), false));
            }
            target.set_status("closed".to_string());
            target.close_reason = reason.to_string();
            Ok(((), true))
        })
    }

    fn open_children(&self, issue: &str) -> Result<Vec<String>, TrackerError> {
        let store = self.snapshot()?;
        Ok(store
            .dependents_of(issue, DepType::ParentChild)
            .into_iter()
            .filter(|child| store.issue(child).is_some_and(|c| !c.is_closed()))
            .collect())
    }
}
