use lander_kernel::{OperationField, QueueError};
use std::fmt::Display;
use std::path::Path;

use crate::lock::LockError;

/// Errors from the State Store and Queue Store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("operation not found: {0}")]
    NotFound(String),

    #[error("operation already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid operation name `{0}`: use letters, digits, '.', '_' or '-'")]
    InvalidName(String),

    #[error("{path}: I/O error: {message}")]
    Io { path: String, message: String },

    #[error("{path}: parse error: {message}")]
    Parse { path: String, message: String },

    #[error("corrupted document: {0}")]
    Corrupt(String),

    #[error("field `{0}` is read-only; writable fields are external_ref, worktree_path, branch, session_id")]
    ReadOnlyField(OperationField),

    #[error("invalid value for `{field}`: {message}")]
    InvalidField {
        field: OperationField,
        message: String,
    },

    #[error("operation {name} has schema version {found}, newer than supported {supported}")]
    FutureSchema {
        name: String,
        found: u32,
        supported: u32,
    },

    #[error("config {path}: {message}")]
    Config { path: String, message: String },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl StoreError {
    pub(crate) fn io(path: &Path, err: impl Display) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn parse(path: &Path, err: impl Display) -> Self {
        Self::Parse {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}
