//! Dependency types: typed edges in the issue graph.

use serde::{Deserialize, Serialize};

/// `issue_id` depends on `depends_on_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub issue_id: String,
    pub depends_on_id: String,
    /// JSONL compatibility: `type`, with `dep_type` accepted as an alias.
    #[serde(rename = "type", alias = "dep_type")]
    pub dep_type: DepType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DepType {
    /// `depends_on_id` must close before `issue_id` can proceed.
    Blocks,
    /// `issue_id` is tracked under `depends_on_id`.
    ParentChild,
    Related,
    DiscoveredFrom,
}

impl DepType {
    /// Whether this edge gates the dependent.
    pub fn is_blocking(&self) -> bool {
        matches!(self, DepType::Blocks)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DepType::Blocks => "blocks",
            DepType::ParentChild => "parent-child",
            DepType::Related => "related",
            DepType::DiscoveredFrom => "discovered-from",
        }
    }
}

impl std::str::FromStr for DepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "blocks" => Ok(DepType::Blocks),
            "parent-child" => Ok(DepType::ParentChild),
            "related" => Ok(DepType::Related),
            "discovered-from" => Ok(DepType::DiscoveredFrom),
            other => Err(format!("unknown dependency type `{other}`")),
        }
    }
}
