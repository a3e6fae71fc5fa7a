//! The State Store: one JSON document per operation plus its event log.
//!
//! All writers go through the per-operation lock (`state.json.lock`) and
//! replace the whole document atomically, so readers take no lock. A document
//! older than the current schema is migrated on first read, under the lock,
//! after re-checking its version.

use chrono::Utc;
use lander_kernel::{CURRENT_SCHEMA_VERSION, Operation, OperationField, Tracker};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::atomic::{read_text, write_json_atomic};
use crate::config::LanderConfig;
use crate::error::StoreError;
use crate::events::{EventLog, EventLogPolicy, EventRecord};
use crate::layout::ProjectLayout;
use crate::lock::{FileLock, lock_path_for};
use crate::migrate::{MigrationContext, document_version, migrate_document};

/// Result of a guarded mutation closure.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation<T> {
    pub value: T,
    /// Persist the document before the lock is released.
    pub changed: bool,
    /// Event appended after a persisted change.
    pub event: Option<(String, Value)>,
}

impl<T> Mutation<T> {
    pub fn unchanged(value: T) -> Self {
        Self {
            value,
            changed: false,
            event: None,
        }
    }

    pub fn changed(value: T) -> Self {
        Self {
            value,
            changed: true,
            event: None,
        }
    }

    pub fn with_event(mut self, event: impl Into<String>, detail: Value) -> Self {
        self.event = Some((event.into(), detail));
        self
    }
}

#[derive(Debug)]
pub enum UpdateError<E> {
    Store(StoreError),
    /// The mutation closure refused; nothing was written.
    Rejected(E),
}

impl<E> From<StoreError> for UpdateError<E> {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl<E: Display> Display for UpdateError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Rejected(err) => write!(f, "{err}"),
        }
    }
}

impl<E> StdError for UpdateError<E> where E: Display + std::fmt::Debug + StdError + 'static {}

#[derive(Clone)]
pub struct StateStore {
    layout: ProjectLayout,
    policy: EventLogPolicy,
    lock_timeout: Duration,
    tracker: Option<Arc<dyn Tracker>>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("layout", &self.layout)
            .field("policy", &self.policy)
            .field("lock_timeout", &self.lock_timeout)
            .field("tracker", &self.tracker.is_some())
            .finish()
    }
}

impl StateStore {
    pub fn new(layout: ProjectLayout, config: &LanderConfig) -> Self {
        Self {
            layout,
            policy: config.event_log_policy(),
            lock_timeout: config.lock_timeout(),
            tracker: None,
        }
    }

    /// Tracker used to register dependency edges during migration.
    pub fn with_tracker(mut self, tracker: Arc<dyn Tracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    pub fn exists(&self, name: &str) -> bool {
        self.layout
            .op_state_path(name)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    /// Names of all operations, sorted.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.layout.ops_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(&dir, err)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.exists(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn create(&self, op: &Operation) -> Result<(), StoreError> {
        let path = self.layout.op_state_path(&op.name)?;
        let _lock = self.lock(&path)?;
        if path.exists() {
            return Err(StoreError::AlreadyExists(op.name.clone()));
        }
        write_json_atomic(&path, op)?;
        self.event_log(&op.name)?.append(
            op.created_at,
            "operation.created",
            json!({ "type": op.op_type, "phase": op.phase }),
        )?;
        debug!(operation = %op.name, "operation created");
        Ok(())
    }

    /// Delete an operation's document and event log.
    pub fn remove(&self, name: &str) -> Result<(), StoreError> {
        let path = self.layout.op_state_path(name)?;
        let _lock = self.lock(&path)?;
        if !path.exists() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        let dir = self.layout.op_dir(name)?;
        fs::remove_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        debug!(operation = name, "operation removed");
        Ok(())
    }

    pub fn load(&self, name: &str) -> Result<Operation, StoreError> {
        let path = self.layout.op_state_path(name)?;
        let doc = read_document(name, &path)?;
        let version = document_version(&doc);
        check_not_future(name, version)?;
        if version == CURRENT_SCHEMA_VERSION {
            return decode(&path, doc);
        }
        let _lock = self.lock(&path)?;
        self.load_locked(name, &path)
    }

    /// Batched multi-field read: one document load for any number of fields.
    /// Unset fields read as `null`.
    pub fn read(
        &self,
        name: &str,
        fields: &[OperationField],
    ) -> Result<BTreeMap<OperationField, Value>, StoreError> {
        let op = self.load(name)?;
        let path = self.layout.op_state_path(name)?;
        let doc = serde_json::to_value(&op).map_err(|e| StoreError::parse(&path, e))?;
        Ok(fields
            .iter()
            .map(|field| {
                let value = doc.get(field.key()).cloned().unwrap_or(Value::Null);
                (*field, value)
            })
            .collect())
    }

    pub fn write(
        &self,
        name: &str,
        field: OperationField,
        value: Value,
    ) -> Result<Operation, StoreError> {
        self.bulk_write(name, &[(field, value)])
    }

    /// Apply several field changes in one locked read-modify-replace. Every
    /// value is validated before anything is written.
    pub fn bulk_write(
        &self,
        name: &str,
        changes: &[(OperationField, Value)],
    ) -> Result<Operation, StoreError> {
        if let Some((field, _)) = changes.iter().find(|(field, _)| !field.is_writable()) {
            return Err(StoreError::ReadOnlyField(*field));
        }
        let path = self.layout.op_state_path(name)?;
        let result = self.update(name, |op| {
            let mut doc = serde_json::to_value(&*op).map_err(|e| StoreError::parse(&path, e))?;
            for (field, value) in changes {
                if let Some(object) = doc.as_object_mut() {
                    object.insert(field.key().to_string(), value.clone());
                }
                serde_json::from_value::<Operation>(doc.clone()).map_err(|e| {
                    StoreError::InvalidField {
                        field: *field,
                        message: e.to_string(),
                    }
                })?;
            }
            let patched: Operation =
                serde_json::from_value(doc).map_err(|e| StoreError::parse(&path, e))?;
            if patched == *op {
                return Ok(Mutation::unchanged(patched));
            }
            *op = patched.clone();
            let keys: Vec<&str> = changes.iter().map(|(field, _)| field.key()).collect();
            Ok(Mutation::changed(patched).with_event("fields.written", json!({ "fields": keys })))
        });
        result.map_err(|err| match err {
            UpdateError::Store(err) | UpdateError::Rejected(err) => err,
        })
    }

    /// Locked read-modify-write. The closure sees the current document; when
    /// it reports a change the document is replaced, then the event appended,
    /// both before the lock is released. A rejection writes nothing.
    pub fn update<T, E, F>(&self, name: &str, mutator: F) -> Result<T, UpdateError<E>>
    where
        F: FnOnce(&mut Operation) -> Result<Mutation<T>, E>,
    {
        let path = self.layout.op_state_path(name)?;
        let _lock = self.lock(&path)?;
        let mut op = self.load_locked(name, &path)?;
        let mutation = mutator(&mut op).map_err(UpdateError::Rejected)?;
        if mutation.changed {
            write_json_atomic(&path, &op)?;
            if let Some((event, detail)) = mutation.event {
                self.event_log(name)?.append(Utc::now(), &event, detail)?;
            }
        }
        Ok(mutation.value)
    }

    pub fn append_event(
        &self,
        name: &str,
        event: &str,
        detail: Value,
    ) -> Result<EventRecord, StoreError> {
        let path = self.layout.op_state_path(name)?;
        let _lock = self.lock(&path)?;
        if !path.exists() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        self.event_log(name)?.append(Utc::now(), event, detail)
    }

    pub fn events(&self, name: &str) -> Result<Vec<EventRecord>, StoreError> {
        if !self.exists(name) {
            return Err(StoreError::NotFound(name.to_string()));
        }
        self.event_log(name)?.read_all()
    }

    fn event_log(&self, name: &str) -> Result<EventLog, StoreError> {
        Ok(EventLog::new(self.layout.op_dir(name)?, self.policy))
    }

    fn lock(&self, state_path: &Path) -> Result<FileLock, StoreError> {
        Ok(FileLock::acquire(
            &lock_path_for(state_path),
            self.lock_timeout,
        )?)
    }

    /// Load with the operation lock already held, migrating if needed.
    fn load_locked(&self, name: &str, path: &Path) -> Result<Operation, StoreError> {
        let mut doc = read_document(name, path)?;
        let version = document_version(&doc);
        check_not_future(name, version)?;
        if version == CURRENT_SCHEMA_VERSION {
            return decode(path, doc);
        }

        let lookup = |other: &str| self.peek_external_ref(other);
        let ctx = MigrationContext {
            tracker: self.tracker.as_deref(),
            external_ref_of: &lookup,
        };
        let report = migrate_document(name, &mut doc, &ctx)?;
        let op = decode(path, doc)?;
        write_json_atomic(path, &op)?;
        if let Some(report) = report {
            self.event_log(name)?.append(
                Utc::now(),
                "schema.migrated",
                json!({
                    "from": report.from,
                    "to": report.to,
                    "registered_blockers": report.registered_blockers,
                    "skipped": report.skipped,
                }),
            )?;
        }
        Ok(op)
    }

    /// Raw `external_ref` of another operation, without migrating it.
    fn peek_external_ref(&self, name: &str) -> Option<String> {
        let path = self.layout.op_state_path(name).ok()?;
        let text = read_text(&path).ok()??;
        let doc: Value = serde_json::from_str(&text).ok()?;
        doc.get("external_ref")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

fn read_document(name: &str, path: &Path) -> Result<Value, StoreError> {
    let text = read_text(path)?.ok_or_else(|| StoreError::NotFound(name.to_string()))?;
    let doc: Value = serde_json::from_str(&text).map_err(|e| StoreError::parse(path, e))?;
    if !doc.is_object() {
        return Err(StoreError::Corrupt(format!(
            "{}: document is not an object",
            path.display()
        )));
    }
    Ok(doc)
}

fn decode(path: &Path, doc: Value) -> Result<Operation, StoreError> {
    serde_json::from_value(doc).map_err(|e| StoreError::parse(path, e))
}

fn check_not_future(name: &str, version: u32) -> Result<(), StoreError> {
    if version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::FutureSchema {
            name: name.to_string(),
            found: version,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }
    Ok(())
}
