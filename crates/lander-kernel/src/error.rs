//! Validation errors raised by the kernel's guarded mutations.

use crate::phase::{Phase, Transition};
use crate::queue::EntryStatus;

/// A transition was attempted from a phase outside its predecessor set, or a
/// one-shot policy was already spent. The operation is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot {transition} operation {name}: phase is {from}, expected one of [{expected}]")]
    Illegal {
        name: String,
        transition: Transition,
        from: Phase,
        expected: String,
    },

    #[error("no transition from {from} to {to}")]
    NoEdge { from: Phase, to: Phase },

    #[error("operation {name} already used its automatic conflict retry")]
    RetryExhausted { name: String },

    #[error("operation {name} was already sent back to execution once")]
    AlreadyReopened { name: String },

    #[error("operation {name} is held")]
    Held { name: String },
}

impl TransitionError {
    pub fn illegal(name: &str, transition: Transition, from: Phase) -> Self {
        Self::Illegal {
            name: name.to_string(),
            transition,
            from,
            expected: transition
                .predecessors()
                .iter()
                .map(Phase::as_str)
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// Queue document invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue entry not found: {0}")]
    NotFound(String),

    #[error("cannot process {subject}: {current} is already processing")]
    AlreadyProcessing { subject: String, current: String },

    #[error("queue entry {subject} is {status}, expected {expected}")]
    UnexpectedStatus {
        subject: String,
        status: EntryStatus,
        expected: EntryStatus,
    },

    #[error("queue subject must not be empty")]
    EmptySubject,
}
