//! Canonical in-memory representation of issue/dependency state.

use std::collections::BTreeMap;
use std::path::Path;

use crate::dependency::{DepType, Dependency};
use crate::issue::Issue;
use crate::jsonl::{JsonlError, read_issues_from_path, write_issues_to_path};

#[derive(Debug, thiserror::Error)]
pub enum MemoryStoreError {
    #[error(transparent)]
    Jsonl(#[from] JsonlError),

    #[error("issue not found: {0}")]
    IssueNotFound(String),

    #[error("issue cannot depend on itself: {0}")]
    SelfDependency(String),
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    issues: BTreeMap<String, Issue>,
}

impl MemoryStore {
    /// Duplicate IDs resolve last-write-wins, matching append/overlay JSONL
    /// workflows.
    pub fn from_issues(issues: Vec<Issue>) -> Self {
        let mut index = BTreeMap::new();
        for issue in issues {
            index.insert(issue.id.clone(), issue);
        }
        Self { issues: index }
    }

    pub fn load_jsonl(path: impl AsRef<Path>) -> Result<Self, MemoryStoreError> {
        Ok(Self::from_issues(read_issues_from_path(path)?))
    }

    pub fn save_jsonl(&self, path: impl AsRef<Path>) -> Result<(), MemoryStoreError> {
        let issues: Vec<Issue> = self.issues.values().cloned().collect();
        write_issues_to_path(path, &issues)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issue(&self, id: &str) -> Option<&Issue> {
        self.issues.get(id)
    }

    pub fn issue_mut(&mut self, id: &str) -> Option<&mut Issue> {
        self.issues.get_mut(id)
    }

    pub fn upsert_issue(&mut self, issue: Issue) -> Option<Issue> {
        self.issues.insert(issue.id.clone(), issue)
    }

    /// Iterate all issues in deterministic ID order.
    pub fn issues(&self) -> impl Iterator<Item = &Issue> {
        self.issues.values()
    }

    /// Next free `<prefix>-<n>` identifier.
    pub fn next_id(&self, prefix: &str) -> String {
        let dash = format!("{prefix}-");
        let highest = self
            .issues
            .keys()
            .filter_map(|id| id.strip_prefix(&dash))
            .filter_map(|n| n.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        format!("{prefix}-{}", highest + 1)
    }

    /// Add a typed edge. Both endpoints must exist. Returns `false` when the
    /// identical edge is already present.
    pub fn add_dependency(
        &mut self,
        issue_id: &str,
        depends_on_id: &str,
        dep_type: DepType,
        created_by: String,
    ) -> Result<bool, MemoryStoreError> {
        if issue_id == depends_on_id {
            return Err(MemoryStoreError::SelfDependency(issue_id.to_string()));
        }
        if self.issue(depends_on_id).is_none() {
            return Err(MemoryStoreError::IssueNotFound(depends_on_id.to_string()));
        }
        let issue = self
            .issue_mut(issue_id)
            .ok_or_else(|| MemoryStoreError::IssueNotFound(issue_id.to_string()))?;

        if issue
            .dependencies
            .iter()
            .any(|d| d.depends_on_id == depends_on_id && d.dep_type == dep_type)
        {
            return Ok(false);
        }

        issue.dependencies.push(Dependency {
            issue_id: issue_id.to_string(),
            depends_on_id: depends_on_id.to_string(),
            dep_type,
            created_by,
        });
        issue.touch_updated_at();
        Ok(true)
    }

    /// Targets of `issue_id`'s blocking edges.
    pub fn blockers_of(&self, issue_id: &str) -> Vec<String> {
        self.issue(issue_id)
            .into_iter()
            .flat_map(|issue| issue.dependencies.iter())
            .filter(|dep| dep.dep_type.is_blocking())
            .map(|dep| dep.depends_on_id.clone())
            .collect()
    }

    /// Issues with an edge of `dep_type` pointing at `issue_id`.
    pub fn dependents_of(&self, issue_id: &str, dep_type: DepType) -> Vec<String> {
        self.issues()
            .filter(|issue| {
                issue
                    .dependencies
                    .iter()
                    .any(|dep| dep.depends_on_id == issue_id && dep.dep_type == dep_type)
            })
            .map(|issue| issue.id.clone())
            .collect()
    }
}
