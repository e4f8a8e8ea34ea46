//! Stream identity policy.
//!
//! A store is configured once to identify streams either by opaque UUIDs or by
//! caller-chosen string keys. Every stream-identifying argument is checked
//! against that choice; the two kinds are never mixed within one store.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Which kind of identifier a store uses for its streams.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamIdentity {
    #[default]
    AsUuid,
    AsString,
}

impl fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AsUuid => f.write_str("uuid"),
            Self::AsString => f.write_str("string"),
        }
    }
}

/// Identifier of a single stream.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum StreamId {
    Uuid(Uuid),
    Key(String),
}

impl StreamId {
    #[must_use]
    pub const fn kind(&self) -> StreamIdentity {
        match self {
            Self::Uuid(_) => StreamIdentity::AsUuid,
            Self::Key(_) => StreamIdentity::AsString,
        }
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Option<&Uuid> {
        match self {
            Self::Uuid(id) => Some(id),
            Self::Key(_) => None,
        }
    }

    #[must_use]
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Self::Uuid(_) => None,
            Self::Key(key) => Some(key),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(id) => id.fmt(f),
            Self::Key(key) => f.write_str(key),
        }
    }
}

impl From<Uuid> for StreamId {
    fn from(id: Uuid) -> Self {
        Self::Uuid(id)
    }
}

impl From<String> for StreamId {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<&str> for StreamId {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

/// Error raised when a stream identifier does not fit the store's policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("stream identity kind mismatch: store uses {expected} identifiers, got {found} `{id}`")]
    IdentityKindMismatch {
        expected: StreamIdentity,
        found: StreamIdentity,
        id: StreamId,
    },
    #[error("string-keyed stores cannot generate stream keys; supply one explicitly")]
    StreamKeyRequired,
}

impl StreamIdentity {
    /// Check that `id` is of this kind.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::IdentityKindMismatch`] for the other kind.
    pub fn validate(self, id: &StreamId) -> Result<(), IdentityError> {
        if id.kind() == self {
            Ok(())
        } else {
            Err(IdentityError::IdentityKindMismatch {
                expected: self,
                found: id.kind(),
                id: id.clone(),
            })
        }
    }

    /// Generate a fresh identifier for a new stream.
    ///
    /// UUID stores get a time-ordered v7 UUID.
    ///
    /// # Errors
    ///
    /// String-keyed stores return [`IdentityError::StreamKeyRequired`].
    pub fn generate(self) -> Result<StreamId, IdentityError> {
        match self {
            Self::AsUuid => Ok(StreamId::Uuid(Uuid::now_v7())),
            Self::AsString => Err(IdentityError::StreamKeyRequired),
        }
    }

    /// Validate a caller-supplied identifier, or generate one when absent.
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate) and [`generate`](Self::generate).
    pub fn resolve(self, id: Option<StreamId>) -> Result<StreamId, IdentityError> {
        match id {
            Some(id) => self.validate(&id).map(|()| id),
            None => self.generate(),
        }
    }
}
