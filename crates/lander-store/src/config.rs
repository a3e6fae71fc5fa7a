//! `.lander/config.toml`. Every key is optional.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::atomic::read_text;
use crate::error::StoreError;
use crate::events::EventLogPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanderConfig {
    pub trunk: String,
    pub remote: String,
    pub poll_interval_secs: u64,
    pub verify_attempts: u32,
    pub verify_delay_ms: u64,
    pub resolution_timeout_secs: u64,
    /// Resolution agent argv prefix; the prompt is appended as the last argument.
    pub agent_command: Vec<String>,
    pub event_log_max_bytes: u64,
    pub event_log_segments: usize,
    pub lock_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub completed_retention_secs: u64,
    pub tracker_path: PathBuf,
}

impl Default for LanderConfig {
    fn default() -> Self {
        Self {
            trunk: "main".to_string(),
            remote: "origin".to_string(),
            poll_interval_secs: 30,
            verify_attempts: 3,
            verify_delay_ms: 2000,
            resolution_timeout_secs: 1800,
            agent_command: vec!["claude".to_string(), "-p".to_string()],
            event_log_max_bytes: 1024 * 1024,
            event_log_segments: 3,
            lock_timeout_secs: 30,
            stop_timeout_secs: 10,
            completed_retention_secs: 7 * 24 * 60 * 60,
            tracker_path: PathBuf::from(".lander/issues.jsonl"),
        }
    }
}

impl LanderConfig {
    /// Missing file means defaults.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let Some(text) = read_text(path)? else {
            return Ok(Self::default());
        };
        let config: Self = toml::from_str(&text).map_err(|e| StoreError::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate(path)?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, StoreError> {
        toml::to_string_pretty(self).map_err(|e| StoreError::Config {
            path: "<memory>".to_string(),
            message: e.to_string(),
        })
    }

    fn validate(&self, path: &Path) -> Result<(), StoreError> {
        let problem = if self.trunk.trim().is_empty() {
            Some("`trunk` must not be empty")
        } else if self.remote.trim().is_empty() {
            Some("`remote` must not be empty")
        } else if self.verify_attempts == 0 {
            Some("`verify_attempts` must be at least 1")
        } else if self.event_log_segments == 0 {
            Some("`event_log_segments` must be at least 1")
        } else {
            None
        };
        match problem {
            Some(message) => Err(StoreError::Config {
                path: path.display().to_string(),
                message: message.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }

    pub fn resolution_timeout(&self) -> Duration {
        Duration::from_secs(self.resolution_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn completed_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.completed_retention_secs).unwrap_or(i64::MAX))
    }

    pub fn event_log_policy(&self) -> EventLogPolicy {
        EventLogPolicy {
            max_bytes: self.event_log_max_bytes,
            segments: self.event_log_segments,
        }
    }

    /// `remote/trunk`, the ref verification checks against.
    pub fn remote_trunk(&self) -> String {
        format!("{}/{}", self.remote, self.trunk)
    }
}
