//! In-memory storage backend for testing.
//!
//! [`Store`] keeps every stream behind one `RwLock`. A [`Transaction`] buffers
//! its writes and applies them under the write lock on commit, after
//! re-validating every version compare-and-set and stream insert it made.
//! [`lock_stream`](StorageTransaction::lock_stream) holds a per-stream mutex
//! until the transaction ends, so writers to one stream queue up behind each
//! other. Reads take the read lock once, so they always see whole commits.
//!
//! # Example
//!
//! ```
//! use chronicle_core::storage::inmemory;
//!
//! let storage = inmemory::Store::new();
//! ```

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use nonempty::NonEmpty;
use tokio::sync::{Mutex as StreamLock, OwnedMutexGuard};

use crate::{
    concurrency::{ConcurrencyConflict, VersionCheck},
    identity::StreamId,
    storage::{
        CommitError, EventRow, EventStorage, SnapshotRow, StorageTransaction, StreamSlice,
        StreamState,
    },
};

#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<Inner>>,
    locks: Arc<Mutex<HashMap<StreamId, Arc<StreamLock<()>>>>>,
}

#[derive(Default)]
struct Inner {
    streams: HashMap<StreamId, StreamEntry>,
}

struct StreamEntry {
    state: StreamState,
    events: Vec<EventRow>,
    snapshot: Option<SnapshotRow>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("inmemory::Store").finish_non_exhaustive()
    }
}

/// Error type for the in-memory store.
#[derive(Debug, thiserror::Error)]
pub enum InMemoryError {
    #[error("in-memory store lock poisoned")]
    Poisoned,
    #[error("rows written for stream `{0}`, which does not exist")]
    UnknownStream(StreamId),
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, InMemoryError> {
        self.inner.read().map_err(|_| InMemoryError::Poisoned)
    }
}

impl EventStorage for Store {
    type Error = InMemoryError;
    type Transaction = Transaction;

    async fn begin(&self) -> Result<Transaction, InMemoryError> {
        Ok(Transaction {
            inner: Arc::clone(&self.inner),
            locks: Arc::clone(&self.locks),
            held: HashMap::new(),
            writes: Writes::default(),
        })
    }

    #[tracing::instrument(skip(self), fields(stream_id = %stream_id))]
    async fn read_stream<'a>(
        &'a self,
        stream_id: &'a StreamId,
        since: u64,
    ) -> Result<Option<StreamSlice>, InMemoryError> {
        let inner = self.read()?;
        let slice = inner.streams.get(stream_id).map(|entry| StreamSlice {
            state: entry.state.clone(),
            events: entry
                .events
                .iter()
                .filter(|row| row.sequence >= since)
                .cloned()
                .collect(),
        });
        drop(inner);
        tracing::trace!(found = slice.is_some(), "read stream");
        Ok(slice)
    }

    async fn read_stream_state<'a>(
        &'a self,
        stream_id: &'a StreamId,
    ) -> Result<Option<StreamState>, InMemoryError> {
        Ok(self
            .read()?
            .streams
            .get(stream_id)
            .map(|entry| entry.state.clone()))
    }

    async fn read_snapshot<'a>(
        &'a self,
        stream_id: &'a StreamId,
    ) -> Result<Option<SnapshotRow>, InMemoryError> {
        Ok(self
            .read()?
            .streams
            .get(stream_id)
            .and_then(|entry| entry.snapshot.clone()))
    }
}

#[derive(Default)]
struct Writes {
    streams: Vec<StreamState>,
    events: Vec<EventRow>,
    /// `(stream, expected, new)` compare-and-set operations.
    versions: Vec<(StreamId, u64, u64)>,
    snapshots: Vec<SnapshotRow>,
}

impl Writes {
    fn is_empty(&self) -> bool {
        self.streams.is_empty()
            && self.events.is_empty()
            && self.versions.is_empty()
            && self.snapshots.is_empty()
    }
}

/// Buffered unit of work against an in-memory [`Store`].
pub struct Transaction {
    inner: Arc<RwLock<Inner>>,
    locks: Arc<Mutex<HashMap<StreamId, Arc<StreamLock<()>>>>>,
    /// Stream locks taken by `lock_stream`, released on commit, rollback or drop.
    held: HashMap<StreamId, OwnedMutexGuard<()>>,
    writes: Writes,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("inmemory::Transaction")
            .field("locked_streams", &self.held.len())
            .field("pending_events", &self.writes.events.len())
            .finish_non_exhaustive()
    }
}

impl Transaction {
    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, InMemoryError> {
        self.inner.read().map_err(|_| InMemoryError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, InMemoryError> {
        self.inner.write().map_err(|_| InMemoryError::Poisoned)
    }

    fn stream_lock(&self, stream_id: &StreamId) -> Result<Arc<StreamLock<()>>, InMemoryError> {
        let mut locks = self.locks.lock().map_err(|_| InMemoryError::Poisoned)?;
        Ok(Arc::clone(locks.entry(stream_id.clone()).or_default()))
    }

    /// The stream as this transaction sees it: its own writes over the
    /// committed state.
    fn current(&self, stream_id: &StreamId) -> Result<Option<StreamState>, InMemoryError> {
        let pending = self
            .writes
            .streams
            .iter()
            .find(|stream| &stream.id == stream_id)
            .cloned();
        let mut state = match pending {
            Some(state) => Some(state),
            None => self
                .read()?
                .streams
                .get(stream_id)
                .map(|entry| entry.state.clone()),
        };
        if let Some(state) = state.as_mut()
            && let Some((_, _, new)) = self
                .writes
                .versions
                .iter()
                .rev()
                .find(|(id, _, _)| id == stream_id)
        {
            state.version = *new;
        }
        Ok(state)
    }

    /// Check every buffered precondition against committed state.
    fn validate(&self, inner: &Inner) -> Result<(), CommitError<InMemoryError>> {
        for stream in &self.writes.streams {
            if inner.streams.contains_key(&stream.id) {
                return Err(CommitError::StreamExists(stream.id.clone()));
            }
        }

        for (stream_id, expected, _) in &self.writes.versions {
            let actual = inner
                .streams
                .get(stream_id)
                .map_or(0, |entry| entry.state.version);
            if actual != *expected {
                return Err(ConcurrencyConflict {
                    stream_id: stream_id.clone(),
                    expected: *expected,
                    actual,
                }
                .into());
            }
        }

        let exists = |stream_id: &StreamId| {
            inner.streams.contains_key(stream_id)
                || self.writes.streams.iter().any(|s| &s.id == stream_id)
        };
        let orphan = self
            .writes
            .events
            .iter()
            .map(|row| &row.stream_id)
            .chain(self.writes.snapshots.iter().map(|s| &s.stream_id))
            .find(|stream_id| !exists(*stream_id));
        if let Some(stream_id) = orphan {
            return Err(CommitError::Store(InMemoryError::UnknownStream(
                stream_id.clone(),
            )));
        }

        Ok(())
    }
}

impl StorageTransaction for Transaction {
    type Error = InMemoryError;

    async fn lock_stream<'a>(
        &'a mut self,
        stream_id: &'a StreamId,
    ) -> Result<Option<StreamState>, InMemoryError> {
        if !self.held.contains_key(stream_id) {
            let guard = self.stream_lock(stream_id)?.lock_owned().await;
            self.held.insert(stream_id.clone(), guard);
        }
        self.current(stream_id)
    }

    async fn insert_stream<'a>(
        &'a mut self,
        stream: &'a StreamState,
    ) -> Result<bool, InMemoryError> {
        if self.current(&stream.id)?.is_some() {
            return Ok(false);
        }
        self.writes.streams.push(stream.clone());
        Ok(true)
    }

    async fn insert_events<'a>(
        &'a mut self,
        rows: &'a NonEmpty<EventRow>,
    ) -> Result<(), InMemoryError> {
        self.writes.events.extend(rows.iter().cloned());
        Ok(())
    }

    async fn advance_version<'a>(
        &'a mut self,
        stream_id: &'a StreamId,
        expected: u64,
        new_version: u64,
    ) -> Result<VersionCheck, InMemoryError> {
        let actual = self.current(stream_id)?.map_or(0, |state| state.version);
        if actual != expected {
            return Ok(VersionCheck::Stale { actual });
        }
        if let Some(stream) = self
            .writes
            .streams
            .iter_mut()
            .find(|stream| &stream.id == stream_id)
        {
            stream.version = new_version;
        } else {
            self.writes
                .versions
                .push((stream_id.clone(), expected, new_version));
        }
        Ok(VersionCheck::Advanced)
    }

    async fn load_snapshot<'a>(
        &'a mut self,
        stream_id: &'a StreamId,
    ) -> Result<Option<SnapshotRow>, InMemoryError> {
        if let Some(pending) = self
            .writes
            .snapshots
            .iter()
            .rev()
            .find(|snapshot| &snapshot.stream_id == stream_id)
        {
            return Ok(Some(pending.clone()));
        }
        Ok(self
            .read()?
            .streams
            .get(stream_id)
            .and_then(|entry| entry.snapshot.clone()))
    }

    async fn upsert_snapshot<'a>(
        &'a mut self,
        snapshot: &'a SnapshotRow,
    ) -> Result<(), InMemoryError> {
        self.writes.snapshots.push(snapshot.clone());
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(event_count = self.writes.events.len()))]
    async fn commit(self) -> Result<(), CommitError<InMemoryError>> {
        let writes = {
            let mut inner = self.write().map_err(CommitError::Store)?;
            if let Err(error) = self.validate(&inner) {
                tracing::debug!(%error, "rejecting commit");
                return Err(error);
            }

            let Self { writes, .. } = &self;
            for stream in &writes.streams {
                inner.streams.insert(
                    stream.id.clone(),
                    StreamEntry {
                        state: stream.clone(),
                        events: Vec::new(),
                        snapshot: None,
                    },
                );
            }
            for (stream_id, _, new_version) in &writes.versions {
                if let Some(entry) = inner.streams.get_mut(stream_id) {
                    entry.state.version = *new_version;
                }
            }
            for row in &writes.events {
                if let Some(entry) = inner.streams.get_mut(&row.stream_id) {
                    entry.events.push(row.clone());
                }
            }
            for snapshot in &writes.snapshots {
                if let Some(entry) = inner.streams.get_mut(&snapshot.stream_id) {
                    entry.snapshot = Some(snapshot.clone());
                }
            }
            drop(inner);
            writes.events.len()
        };
        tracing::debug!(events_appended = writes, "transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<(), InMemoryError> {
        tracing::trace!(
            discarded_events = self.writes.events.len(),
            "transaction rolled back"
        );
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.writes.is_empty() {
            tracing::trace!(
                event_count = self.writes.events.len(),
                "transaction dropped; discarding buffered writes"
            );
        }
    }
}
