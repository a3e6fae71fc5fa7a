//! Operation: the tracked unit of agent-driven work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use crate::phase::Phase;

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Feature,
    Fix,
    Chore,
    Plan,
    Roadmap,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Feature => "feature",
            OperationType::Fix => "fix",
            OperationType::Chore => "chore",
            OperationType::Plan => "plan",
            OperationType::Roadmap => "roadmap",
        }
    }
}

impl Display for OperationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "feature" => Ok(OperationType::Feature),
            "fix" => Ok(OperationType::Fix),
            "chore" => Ok(OperationType::Chore),
            "plan" => Ok(OperationType::Plan),
            "roadmap" => Ok(OperationType::Roadmap),
            other => Err(format!("unknown operation type `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Merged,
    Conflict,
    VerificationFailed,
}

impl MergeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStatus::Merged => "merged",
            MergeStatus::Conflict => "conflict",
            MergeStatus::VerificationFailed => "verification_failed",
        }
    }
}

/// One operation document.
///
/// Fields are mutated only through the state machine's named transitions.
/// `merge_commit` is the commit that actually landed on trunk, captured from
/// `HEAD` right after integration; it is never derived from `branch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    pub name: String,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub phase: Phase,

    #[serde(default)]
    pub external_ref: Option<String>,
    #[serde(default)]
    pub worktree_path: Option<PathBuf>,
    #[serde(default)]
    pub branch: Option<String>,

    // ── Integration ──
    #[serde(default)]
    pub merge_commit: Option<String>,
    #[serde(default)]
    pub merge_queued: bool,
    #[serde(default)]
    pub merge_status: Option<MergeStatus>,

    // ── Side flags ──
    #[serde(default)]
    pub held: bool,
    /// One-shot: the automatic conflict retry has been spent.
    #[serde(default)]
    pub retried: bool,
    /// One-shot: the daemon already kicked this operation back to execution.
    #[serde(default)]
    pub auto_resumed: bool,
    #[serde(default)]
    pub session_id: Option<String>,

    // ── Timestamps ──
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub held_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub error: Option<String>,
}

fn default_schema_version() -> u32 {
    1
}

impl Operation {
    pub fn new(name: impl Into<String>, op_type: OperationType, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            name: name.into(),
            op_type,
            phase: Phase::Init,
            external_ref: None,
            worktree_path: None,
            branch: None,
            merge_commit: None,
            merge_queued: false,
            merge_status: None,
            held: false,
            retried: false,
            auto_resumed: false,
            session_id: None,
            created_at: now,
            completed_at: None,
            merged_at: None,
            held_at: None,
            error: None,
        }
    }

    /// Branch name for this operation, recoverable after the worktree is gone.
    pub fn branch_name(&self) -> String {
        self.branch
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.op_type.as_str(), self.name))
    }
}

/// Addressable fields of an operation document, named by their JSON keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationField {
    SchemaVersion,
    Name,
    Type,
    Phase,
    ExternalRef,
    WorktreePath,
    Branch,
    MergeCommit,
    MergeQueued,
    MergeStatus,
    Held,
    Retried,
    AutoResumed,
    SessionId,
    CreatedAt,
    CompletedAt,
    MergedAt,
    HeldAt,
    Error,
}

impl OperationField {
    pub const ALL: [OperationField; 19] = [
        OperationField::SchemaVersion,
        OperationField::Name,
        OperationField::Type,
        OperationField::Phase,
        OperationField::ExternalRef,
        OperationField::WorktreePath,
        OperationField::Branch,
        OperationField::MergeCommit,
        OperationField::MergeQueued,
        OperationField::MergeStatus,
        OperationField::Held,
        OperationField::Retried,
        OperationField::AutoResumed,
        OperationField::SessionId,
        OperationField::CreatedAt,
        OperationField::CompletedAt,
        OperationField::MergedAt,
        OperationField::HeldAt,
        OperationField::Error,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            OperationField::SchemaVersion => "schema_version",
            OperationField::Name => "name",
            OperationField::Type => "type",
            OperationField::Phase => "phase",
            OperationField::ExternalRef => "external_ref",
            OperationField::WorktreePath => "worktree_path",
            OperationField::Branch => "branch",
            OperationField::MergeCommit => "merge_commit",
            OperationField::MergeQueued => "merge_queued",
            OperationField::MergeStatus => "merge_status",
            OperationField::Held => "held",
            OperationField::Retried => "retried",
            OperationField::AutoResumed => "auto_resumed",
            OperationField::SessionId => "session_id",
            OperationField::CreatedAt => "created_at",
            OperationField::CompletedAt => "completed_at",
            OperationField::MergedAt => "merged_at",
            OperationField::HeldAt => "held_at",
            OperationField::Error => "error",
        }
    }

    /// Fields a raw write may touch. Identity is fixed at creation and the
    /// lifecycle fields change only through guarded transitions.
    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            OperationField::ExternalRef
                | OperationField::WorktreePath
                | OperationField::Branch
                | OperationField::SessionId
        )
    }
}

impl Display for OperationField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for OperationField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationField::ALL
            .into_iter()
            .find(|field| field.key() == s.trim())
            .ok_or_else(|| format!("unknown operation field `{s}`"))
    }
}
