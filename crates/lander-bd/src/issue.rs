//! Issue: a tracked work item in the issue memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dependency::Dependency;

/// Label prefix that ties an issue to the operation it represents.
pub const OPERATION_LABEL_PREFIX: &str = "op:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,

    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    // ── Status ──
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(
        default = "default_issue_type",
        skip_serializing_if = "String::is_empty"
    )]
    pub issue_type: String,

    // ── Timestamps ──
    #[serde(default = "default_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub close_reason: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
}

fn default_status() -> String {
    "open".to_string()
}

fn default_priority() -> i32 {
    2
}

fn default_issue_type() -> String {
    "task".to_string()
}

fn default_timestamp() -> DateTime<Utc> {
    Utc::now()
}

impl Issue {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            status: default_status(),
            priority: default_priority(),
            issue_type: default_issue_type(),
            created_at: now,
            updated_at: now,
            closed_at: None,
            close_reason: String::new(),
            labels: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == "closed"
    }

    pub fn set_status(&mut self, status: String) {
        self.closed_at = if status == "closed" {
            Some(self.closed_at.unwrap_or_else(Utc::now))
        } else {
            None
        };
        self.status = status;
        self.touch_updated_at();
    }

    pub fn touch_updated_at(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Operation name from an `op:<name>` label, if any.
    pub fn operation_label(&self) -> Option<&str> {
        self.labels
            .iter()
            .find_map(|label| label.strip_prefix(OPERATION_LABEL_PREFIX))
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}
