//! Where everything lives under a project's `.lander/` directory.

use std::path::{Path, PathBuf};

use crate::error::StoreError;

pub const STATE_DIR: &str = ".lander";

const MAX_NAME_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Walk up from `start` until a directory containing `.lander/` is found.
    pub fn discover(start: &Path) -> Option<Self> {
        start
            .ancestors()
            .find(|dir| dir.join(STATE_DIR).is_dir())
            .map(Self::new)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir().join("config.toml")
    }

    pub fn queue_path(&self) -> PathBuf {
        self.state_dir().join("queue.json")
    }

    pub fn integration_lock_path(&self) -> PathBuf {
        self.state_dir().join("integration.lock")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.state_dir().join("daemon.pid")
    }

    pub fn daemon_log_path(&self) -> PathBuf {
        self.state_dir().join("daemon.log")
    }

    pub fn ops_dir(&self) -> PathBuf {
        self.state_dir().join("ops")
    }

    /// Temporary worktrees created for resolution sessions.
    pub fn worktrees_dir(&self) -> PathBuf {
        self.state_dir().join("worktrees")
    }

    pub fn op_dir(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.ops_dir().join(name))
    }

    pub fn op_state_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        Ok(self.op_dir(name)?.join("state.json"))
    }

    /// Resolve a configured path relative to the project root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Operation names become directory names; keep them to a portable charset.
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}
