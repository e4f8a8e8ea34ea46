//! Error taxonomy.
//!
//! - [`ConfigError`]: raised while building [`StoreOptions`](crate::store::StoreOptions);
//!   fatal, never retried.
//! - [`TypeError`]: a payload or stored row has no registered type tag.
//! - [`Error`]: everything an append or fetch can fail with, generic over the
//!   storage backend's own error type.

use thiserror::Error;

use crate::{concurrency::ConcurrencyConflict, identity::IdentityError, identity::StreamId};

/// Boxed source error from a codec.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Invalid store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("type tag `{tag}` is already bound to `{existing}`, cannot rebind it to `{requested}`")]
    DuplicateTypeTag {
        tag: String,
        existing: &'static str,
        requested: &'static str,
    },
    #[error("payload type `{payload}` is already registered under tag `{existing}`, cannot register it as `{requested}`")]
    PayloadAlreadyRegistered {
        payload: &'static str,
        existing: String,
        requested: String,
    },
    #[error("aggregate `{0}` already has an inline projection")]
    DuplicateAggregate(String),
    #[error("payload type `{payload}` already starts streams of aggregate `{existing}`")]
    StarterAlreadyClaimed {
        payload: &'static str,
        existing: String,
    },
}

/// Type tag resolution failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// A stored row carries a tag that is not registered (or not part of the
    /// store's payload set).
    #[error("unknown event type `{tag}`")]
    UnknownEventType { tag: String },
    /// A payload being appended has no registered tag.
    #[error("payload type `{payload}` is not registered with the store")]
    UnregisteredPayloadType { payload: &'static str },
}

/// Error returned by store operations.
#[derive(Debug, Error)]
pub enum Error<S>
where
    S: std::error::Error + 'static,
{
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error("stream `{0}` not found")]
    StreamNotFound(StreamId),
    #[error("stream `{0}` already exists")]
    StreamAlreadyExists(StreamId),
    #[error(transparent)]
    Conflict(#[from] ConcurrencyConflict),
    #[error("no inline projection registered for aggregate `{aggregate}`")]
    NoFoldFunctionRegistered { aggregate: String },
    #[error("stream `{stream_id}` is projected as `{found}`, not `{expected}`")]
    AggregateTypeMismatch {
        stream_id: StreamId,
        expected: &'static str,
        found: String,
    },
    #[error("cannot append an empty event batch")]
    EmptyAppend,
    /// Encoding event `index` of the batch (payload or metadata) failed.
    #[error("failed to serialize event {index} of the batch: {source}")]
    Serialization {
        index: usize,
        #[source]
        source: BoxError,
    },
    /// Decoding a stored row failed; the whole fetch is abandoned.
    #[error("failed to deserialize event {sequence} of stream `{stream_id}`: {source}")]
    Deserialization {
        stream_id: StreamId,
        sequence: u64,
        #[source]
        source: BoxError,
    },
    #[error("failed to encode or decode state of aggregate `{aggregate}`: {source}")]
    State {
        aggregate: String,
        #[source]
        source: BoxError,
    },
    #[error("store error: {0}")]
    Storage(#[source] S),
}

impl<S: std::error::Error + 'static> Error<S> {
    /// Whether the caller may reload the stream and retry its business
    /// operation.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
