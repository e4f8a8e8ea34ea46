//! Backing store abstraction.
//!
//! The event store core holds no shared state of its own. Everything it
//! persists goes through an [`EventStorage`] backend, whose
//! [`StorageTransaction`] is the unit of atomicity: stream row, event rows and
//! snapshot row of one append are committed together or not at all.
//!
//! Backends must make the conditional version update
//! ([`StorageTransaction::advance_version`]) the serialization point of a
//! stream: of two transactions that read the same version, at most one may
//! commit.
use std::future::Future;

use chrono::{DateTime, Utc};
use nonempty::NonEmpty;
use thiserror::Error;

use crate::{
    codec::Document,
    concurrency::{ConcurrencyConflict, VersionCheck},
    identity::StreamId,
};

pub mod inmemory;

/// Stream existence record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamState {
    pub id: StreamId,
    /// Sequence of the last event; 0 before any event.
    pub version: u64,
    /// Aggregate whose inline projection follows this stream.
    pub aggregate_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One persisted event.
#[derive(Clone, Debug, PartialEq)]
pub struct EventRow {
    pub stream_id: StreamId,
    pub sequence: u64,
    pub kind: String,
    pub data: Document,
    pub metadata: Document,
    pub timestamp: DateTime<Utc>,
}

/// Persisted aggregate state of one stream.
#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotRow {
    pub stream_id: StreamId,
    pub aggregate_type: String,
    pub version: u64,
    pub state: Document,
}

/// A stream and the events read from it in one consistent view.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamSlice {
    pub state: StreamState,
    pub events: Vec<EventRow>,
}

/// Error from committing a storage transaction.
#[derive(Debug, Error)]
pub enum CommitError<StoreError>
where
    StoreError: std::error::Error + 'static,
{
    /// A version compare-and-set was invalidated by a concurrent commit.
    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflict),
    /// A stream inserted by this transaction was created concurrently.
    #[error("stream `{0}` already exists")]
    StreamExists(StreamId),
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

/// Abstraction over the transactional backing store.
pub trait EventStorage: Send + Sync {
    /// Backend-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    type Transaction: StorageTransaction<Error = Self::Error>;

    /// Open a read-write transaction.
    ///
    /// # Errors
    ///
    /// Returns a backend error if no transaction can be opened.
    fn begin(&self) -> impl Future<Output = Result<Self::Transaction, Self::Error>> + Send + '_;

    /// Read a stream record and its events with `sequence >= since`, ordered
    /// by sequence, from a single point-in-time view.
    ///
    /// Returns `None` if the stream does not exist.
    ///
    /// # Errors
    ///
    /// Returns a backend error when the read fails.
    fn read_stream<'a>(
        &'a self,
        stream_id: &'a StreamId,
        since: u64,
    ) -> impl Future<Output = Result<Option<StreamSlice>, Self::Error>> + Send + 'a;

    /// Read a stream record without its events.
    ///
    /// # Errors
    ///
    /// Returns a backend error when the read fails.
    fn read_stream_state<'a>(
        &'a self,
        stream_id: &'a StreamId,
    ) -> impl Future<Output = Result<Option<StreamState>, Self::Error>> + Send + 'a;

    /// Read the aggregate snapshot of a stream.
    ///
    /// # Errors
    ///
    /// Returns a backend error when the read fails.
    fn read_snapshot<'a>(
        &'a self,
        stream_id: &'a StreamId,
    ) -> impl Future<Output = Result<Option<SnapshotRow>, Self::Error>> + Send + 'a;
}

/// One unit of work against the backing store.
///
/// Dropping a transaction without calling [`commit`](Self::commit) discards
/// everything it wrote.
pub trait StorageTransaction: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Read a stream record for update.
    ///
    /// Backends that lock rows should lock the stream here.
    fn lock_stream<'a>(
        &'a mut self,
        stream_id: &'a StreamId,
    ) -> impl Future<Output = Result<Option<StreamState>, Self::Error>> + Send + 'a;

    /// Create a stream record. Returns `false` if the id is already taken.
    fn insert_stream<'a>(
        &'a mut self,
        stream: &'a StreamState,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

    fn insert_events<'a>(
        &'a mut self,
        rows: &'a NonEmpty<EventRow>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

    /// Set the stream's version to `new_version` if it is still `expected`.
    fn advance_version<'a>(
        &'a mut self,
        stream_id: &'a StreamId,
        expected: u64,
        new_version: u64,
    ) -> impl Future<Output = Result<VersionCheck, Self::Error>> + Send + 'a;

    fn load_snapshot<'a>(
        &'a mut self,
        stream_id: &'a StreamId,
    ) -> impl Future<Output = Result<Option<SnapshotRow>, Self::Error>> + Send + 'a;

    fn upsert_snapshot<'a>(
        &'a mut self,
        snapshot: &'a SnapshotRow,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

    /// Make every write of this transaction durable and visible.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError::Conflict`] or [`CommitError::StreamExists`] if a
    /// concurrent commit invalidated this transaction, in which case nothing
    /// was written.
    fn commit(self) -> impl Future<Output = Result<(), CommitError<Self::Error>>> + Send;

    fn rollback(self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
