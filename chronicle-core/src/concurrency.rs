//! Optimistic concurrency.
//!
//! Appends to one stream are not coordinated in-process. Each append may carry
//! an expected version; the backing store compares it with the stream's version
//! inside the append transaction and at most one of several writers that read
//! the same version can commit.

use thiserror::Error;

use crate::identity::StreamId;

/// Error indicating that another writer moved the stream first.
///
/// The store never retries: the caller must re-fetch, re-derive its events
/// from the current state and try again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "concurrency conflict on stream `{stream_id}`: expected version {expected}, found {actual} \
     (hint: stream was modified; reload and retry)"
)]
pub struct ConcurrencyConflict {
    pub stream_id: StreamId,
    /// The version the writer expected.
    pub expected: u64,
    /// The stream's version in the store.
    pub actual: u64,
}

/// Outcome of a conditional version update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VersionCheck {
    /// The stored version matched and now holds the new value.
    Advanced,
    /// The stored version no longer matched.
    Stale { actual: u64 },
}
