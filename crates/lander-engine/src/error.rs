use lander_kernel::{QueueError, SessionError, TrackerError, TransitionError, VcsError};
use lander_store::{LockError, StoreError, UpdateError};

/// Errors surfaced by the engine. Collaborator errors pass through unchanged.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("git: {0}")]
    Vcs(#[from] VcsError),

    #[error("tracker: {0}")]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("{0}")]
    Unsupported(String),

    #[error("daemon: {0}")]
    Daemon(String),
}

impl From<UpdateError<TransitionError>> for EngineError {
    fn from(err: UpdateError<TransitionError>) -> Self {
        match err {
            UpdateError::Store(err) => EngineError::Store(err),
            UpdateError::Rejected(err) => EngineError::Transition(err),
        }
    }
}

impl EngineError {
    /// The operation named by a command does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Store(StoreError::NotFound(_)))
    }
}
