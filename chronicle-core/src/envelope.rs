//! Events on their way in and out of the store.

use chrono::{DateTime, Utc};

use crate::{
    identity::StreamId,
    value::{Metadata, MetadataValue},
};

/// An event to be appended, with optional caller metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct NewEvent<E> {
    pub event: E,
    pub metadata: Option<Metadata>,
}

impl<E> NewEvent<E> {
    pub const fn new(event: E) -> Self {
        Self {
            event,
            metadata: None,
        }
    }

    pub const fn with_metadata(event: E, metadata: Metadata) -> Self {
        Self {
            event,
            metadata: Some(metadata),
        }
    }

    /// Add a single metadata entry.
    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata
            .get_or_insert_with(Metadata::new)
            .insert(key.into(), value.into());
        self
    }
}

impl<E> From<E> for NewEvent<E> {
    fn from(event: E) -> Self {
        Self {
            event,
            metadata: None,
        }
    }
}

/// A committed event, decoded.
#[derive(Clone, Debug, PartialEq)]
pub struct EventEnvelope<E> {
    pub stream_id: StreamId,
    /// 1-based position within the stream.
    pub sequence: u64,
    /// Registered type tag of the payload.
    pub kind: String,
    pub data: E,
    pub metadata: Metadata,
    /// Assigned by the store when the append committed.
    pub timestamp: DateTime<Utc>,
}

/// Identity and version of a stream after a successful start or append.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamHandle {
    pub id: StreamId,
    pub version: u64,
}
