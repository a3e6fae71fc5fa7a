//! # lander-store
//!
//! Durable state for the operation lifecycle and the integration queue.
//!
//! - `StateStore`: `.lander/ops/<name>/state.json` plus a rotated event log,
//!   with schema migration on first read
//! - `QueueStore`: `.lander/queue.json`, mutated under its lock file
//! - `FileLock`: create-new lock files carrying `pid=`/`utc=`, reclaimed when
//!   the owner is dead
//! - `LanderConfig`: `.lander/config.toml`
//!
//! ## Data model
//!
//! ```text
//! state.json  ── atomic replace ──▶  readers (no lock)
//!     │ writers hold state.json.lock
//! events.jsonl → events.1.jsonl → … → events.N.jsonl
//! ```

pub mod atomic;
pub mod config;
pub mod error;
pub mod events;
pub mod layout;
pub mod lock;
pub mod migrate;
pub mod queue_store;
pub mod state_store;

#[cfg(test)]
mod test_support;

pub use atomic::{read_text, write_bytes_atomic, write_json_atomic};
pub use config::LanderConfig;
pub use error::StoreError;
pub use events::{EventLog, EventLogPolicy, EventRecord};
pub use layout::{ProjectLayout, STATE_DIR, validate_name};
pub use lock::{FileLock, LockError, LockOwner, is_held_live, lock_owner, lock_path_for, pid_is_alive};
pub use migrate::{MigrationContext, MigrationReport, document_version, migrate_document};
pub use queue_store::QueueStore;
pub use state_store::{Mutation, StateStore, UpdateError};
