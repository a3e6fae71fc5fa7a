//! # lander-bd
//!
//! Issue memory for the tracker collaborator.
//!
//! This crate provides:
//! - `Issue` and `Dependency` types with typed edges (`blocks`, `parent-child`, ...)
//! - JSONL read/write (portable persistence, atomic replace)
//! - `MemoryStore` (deterministic in-memory projection)
//! - `JsonlTracker`, the kernel `Tracker` implementation
//!
//! ## Data model
//!
//! ```text
//! JSONL (on disk, one line per issue)
//!     ↕  hydrate / flush under issues.jsonl.lock
//! MemoryStore (deterministic in-memory projection)
//! ```
//!
//! An issue that represents an operation carries an `op:<name>` label, which
//! is how blocker IDs are resolved back to operation names for display.

pub mod atomic_store;
pub mod dependency;
pub mod issue;
pub mod jsonl;
pub mod memory;
pub mod tracker;

#[cfg(test)]
mod test_support;

pub use atomic_store::{AtomicStoreMutationError, mutate_store_jsonl};
pub use dependency::{DepType, Dependency};
pub use issue::{Issue, OPERATION_LABEL_PREFIX};
pub use jsonl::{JsonlError, read_issues_from_path, write_issues_to_path};
pub use memory::{MemoryStore, MemoryStoreError};
pub use tracker::{ISSUE_ID_PREFIX, JsonlTracker, NewIssue};
