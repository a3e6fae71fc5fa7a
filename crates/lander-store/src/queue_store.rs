//! The Queue Store: one shared document, mutated only under `queue.json.lock`.

use lander_kernel::{QueueDoc, QueueError};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::atomic::{read_text, write_json_atomic};
use crate::error::StoreError;
use crate::layout::ProjectLayout;
use crate::lock::{FileLock, lock_path_for};

#[derive(Debug, Clone)]
pub struct QueueStore {
    path: PathBuf,
    lock_timeout: Duration,
}

impl QueueStore {
    pub fn new(layout: &ProjectLayout, lock_timeout: Duration) -> Self {
        Self {
            path: layout.queue_path(),
            lock_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        lock_path_for(&self.path)
    }

    /// Lock-free snapshot; writes are atomic replaces. Missing file is an
    /// empty queue.
    pub fn load(&self) -> Result<QueueDoc, StoreError> {
        let Some(text) = read_text(&self.path)? else {
            return Ok(QueueDoc::default());
        };
        let doc: QueueDoc =
            serde_json::from_str(&text).map_err(|e| StoreError::parse(&self.path, e))?;
        if doc.schema_version > lander_kernel::queue::QUEUE_SCHEMA_VERSION {
            return Err(StoreError::Corrupt(format!(
                "{}: queue schema version {} is newer than supported {}",
                self.path.display(),
                doc.schema_version,
                lander_kernel::queue::QUEUE_SCHEMA_VERSION
            )));
        }
        Ok(doc)
    }

    /// Execute one lock-scoped mutation. The mutator returns `(value, changed)`;
    /// `changed=true` persists the document before the lock is released.
    pub fn mutate<T, F>(&self, mutator: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut QueueDoc) -> Result<(T, bool), QueueError>,
    {
        let _lock = FileLock::acquire(&self.lock_path(), self.lock_timeout)?;
        let mut doc = self.load()?;
        let (value, changed) = mutator(&mut doc)?;
        if changed {
            write_json_atomic(&self.path, &doc)?;
        }
        Ok(value)
    }
}
