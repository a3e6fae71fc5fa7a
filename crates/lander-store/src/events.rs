//! Per-operation event log: a current segment plus N rotated segments.
//!
//! ```text
//! events.jsonl      current, appended to
//! events.1.jsonl    newest archived
//! events.N.jsonl    oldest archived, dropped on the next rotation
//! ```
//!
//! Records carry a monotonically increasing `seq`; readers merge segments
//! by `seq` rather than by file order. Callers hold the operation lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::atomic::read_text;
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub event: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLogPolicy {
    /// Rotate once the current segment reaches this size.
    pub max_bytes: u64,
    /// Archived segments kept after rotation.
    pub segments: usize,
}

impl Default for EventLogPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 1024 * 1024,
            segments: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventLog {
    dir: PathBuf,
    policy: EventLogPolicy,
}

impl EventLog {
    pub fn new(dir: impl Into<PathBuf>, policy: EventLogPolicy) -> Self {
        Self {
            dir: dir.into(),
            policy,
        }
    }

    pub fn current_path(&self) -> PathBuf {
        self.dir.join("events.jsonl")
    }

    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("events.{index}.jsonl"))
    }

    pub fn append(
        &self,
        at: DateTime<Utc>,
        event: &str,
        detail: Value,
    ) -> Result<EventRecord, StoreError> {
        let current = self.current_path();
        let size = match fs::metadata(&current) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(err) => return Err(StoreError::io(&current, err)),
        };

        let record = EventRecord {
            seq: self.last_seq()? + 1,
            at,
            event: event.to_string(),
            detail,
        };

        if size >= self.policy.max_bytes && size > 0 {
            self.rotate()?;
        }

        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let line = serde_json::to_string(&record).map_err(|e| StoreError::parse(&current, e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&current)
            .map_err(|e| StoreError::io(&current, e))?;
        let size = file
            .metadata()
            .map_err(|e| StoreError::io(&current, e))?
            .len();
        if size > 0 && !ends_with_newline(&mut file, size) {
            writeln!(file).map_err(|e| StoreError::io(&current, e))?;
        }
        writeln!(file, "{line}").map_err(|e| StoreError::io(&current, e))?;
        file.sync_data().map_err(|e| StoreError::io(&current, e))?;
        Ok(record)
    }

    /// Shift `events.i` to `events.i+1`, dropping the oldest, then archive the
    /// current segment as `events.1`.
    fn rotate(&self) -> Result<(), StoreError> {
        let current = self.current_path();
        let keep = self.archives();
        remove_if_exists(&self.segment_path(keep))?;
        for index in (1..keep).rev() {
            let from = self.segment_path(index);
            if from.exists() {
                let to = self.segment_path(index + 1);
                fs::rename(&from, &to).map_err(|e| StoreError::io(&from, e))?;
            }
        }
        let first = self.segment_path(1);
        fs::rename(&current, &first).map_err(|e| StoreError::io(&current, e))
    }

    /// Highest `seq` written so far; 0 for an empty log. A torn trailing line
    /// is skipped.
    pub fn last_seq(&self) -> Result<u64, StoreError> {
        for path in [self.current_path(), self.segment_path(1)] {
            let Some(text) = read_text(&path)? else {
                continue;
            };
            let last = text
                .lines()
                .rev()
                .filter(|line| !line.trim().is_empty())
                .find_map(|line| serde_json::from_str::<EventRecord>(line).ok());
            if let Some(record) = last {
                return Ok(record.seq);
            }
        }
        Ok(0)
    }

    /// At least one archive is kept so `seq` survives rotation.
    fn archives(&self) -> usize {
        self.policy.segments.max(1)
    }

    /// Every retained record, oldest first.
    pub fn read_all(&self) -> Result<Vec<EventRecord>, StoreError> {
        let mut paths: Vec<PathBuf> = (1..=self.archives())
            .rev()
            .map(|index| self.segment_path(index))
            .collect();
        paths.push(self.current_path());

        let mut records = Vec::new();
        for path in paths {
            let Some(text) = read_text(&path)? else {
                continue;
            };
            for (line_no, line) in text.lines().enumerate() {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<EventRecord>(trimmed) {
                    Ok(record) => records.push(record),
                    Err(err) => warn!(
                        path = %path.display(),
                        line = line_no + 1,
                        error = %err,
                        "skipping unreadable event record"
                    ),
                }
            }
        }
        records.sort_by_key(|record| record.seq);
        Ok(records)
    }
}

fn ends_with_newline(file: &mut File, size: u64) -> bool {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(size - 1))
        .and_then(|_| file.read_exact(&mut last))
        .map(|()| last[0] == b'\n')
        .unwrap_or(true)
}

fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StoreError::io(path, err)),
    }
}
