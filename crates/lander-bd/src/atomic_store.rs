//! Lock-scoped atomic mutation helpers for JSONL issue memory.

use lander_store::{FileLock, LockError, lock_path_for};
use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::Duration;

use crate::{MemoryStore, MemoryStoreError};

#[derive(Debug)]
pub enum AtomicStoreMutationError<E> {
    Lock(LockError),
    Store(MemoryStoreError),
    Mutation(E),
}

impl<E: Display> Display for AtomicStoreMutationError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lock(err) => write!(f, "issue-memory {err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::Mutation(err) => write!(f, "{err}"),
        }
    }
}

impl<E> StdError for AtomicStoreMutationError<E> where
    E: Display + std::fmt::Debug + StdError + 'static
{
}

/// Execute one lock-scoped store mutation against an issues JSONL path.
///
/// The mutator returns `(value, changed)` where:
/// - `value` is returned to the caller
/// - `changed=true` persists the store to JSONL before lock release.
pub fn mutate_store_jsonl<T, E, F>(
    path: impl AsRef<Path>,
    lock_timeout: Duration,
    mutator: F,
) -> Result<T, AtomicStoreMutationError<E>>
where
    F: FnOnce(&mut MemoryStore) -> Result<(T, bool), E>,
{
    let path = path.as_ref();
    let _guard = FileLock::acquire(&lock_path_for(path), lock_timeout)
        .map_err(AtomicStoreMutationError::Lock)?;

    let mut store = MemoryStore::load_jsonl(path).map_err(AtomicStoreMutationError::Store)?;
    let (value, changed) = mutator(&mut store).map_err(AtomicStoreMutationError::Mutation)?;
    if changed {
        store
            .save_jsonl(path)
            .map_err(AtomicStoreMutationError::Store)?;
    }
    Ok(value)
}
