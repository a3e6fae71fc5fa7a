//! # Lander Kernel
//!
//! The domain core for orchestrating agent-driven operations into a shared
//! trunk branch: what an operation is, which phase changes are legal, what a
//! queue entry looks like, and how one daemon cycle decides what to do.
//!
//! This crate performs no I/O. Everything that touches disk lives in
//! `lander-store`; everything that touches git, the issue tracker, or an
//! interactive session is reached through the traits in [`ports`].
//!
//! ## Architecture
//!
//! ```text
//! Phase / Transition     ← the legal lifecycle edges
//!     │
//! Operation              ← one unit of work, mutated only via transitions
//!     │
//! QueueEntry / QueueDoc  ← integration requests, at most one processing
//!     │
//! plan_cycle             ← (queue, facts) → actions, no side effects
//! ```

pub mod cycle;
pub mod error;
pub mod operation;
pub mod phase;
pub mod ports;
pub mod queue;
pub mod readiness;

pub use cycle::{CycleAction, CycleInput, EntryFacts, OperationFacts, StaleReason, plan_cycle};
pub use error::{QueueError, TransitionError};
pub use operation::{
    CURRENT_SCHEMA_VERSION, MergeStatus, Operation, OperationField, OperationType,
};
pub use phase::{Phase, Transition};
pub use ports::{
    IssueStatus, SessionError, SessionExit, SessionHandle, SessionHost, Tracker, TrackerError,
    Vcs, VcsError,
};
pub use queue::{EnqueueOutcome, EnqueueRequest, EntryKind, EntryStatus, QueueDoc, QueueEntry};
pub use readiness::NotReady;
