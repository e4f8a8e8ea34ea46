//! Metadata merging.
//!
//! The metadata stored with an event is built from four layers, lowest
//! precedence first:
//!
//! 1. store-wide default entries ([`MetadataDefaults`]),
//! 2. the session context: correlation id, causation id and headers
//!    ([`SessionContext`]),
//! 3. metadata supplied by the caller with the event,
//! 4. reserved keys, which the store always writes itself.
//!
//! Reserved keys are [`SEQUENCE_KEY`], [`TIMESTAMP_KEY`], [`STREAM_ID_KEY`] and
//! [`AGGREGATE_TYPE_KEY`]. A caller value for any of them is dropped and
//! replaced by the store's value, without an error. The stream id and
//! aggregate type are only stamped when enabled on [`MetadataDefaults`]; when
//! disabled, those keys are still reserved and caller values are removed.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{
    identity::StreamId,
    value::{Metadata, MetadataValue},
};

pub const SEQUENCE_KEY: &str = "$sequence";
pub const TIMESTAMP_KEY: &str = "$timestamp";
pub const STREAM_ID_KEY: &str = "$stream_id";
pub const AGGREGATE_TYPE_KEY: &str = "$aggregate_type";

pub const CORRELATION_ID_KEY: &str = "correlation_id";
pub const CAUSATION_ID_KEY: &str = "causation_id";

const RESERVED_KEYS: [&str; 4] = [SEQUENCE_KEY, TIMESTAMP_KEY, STREAM_ID_KEY, AGGREGATE_TYPE_KEY];

/// Whether the store owns `key`.
#[must_use]
pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Store-wide metadata configuration.
#[derive(Clone, Debug, Default)]
pub struct MetadataDefaults {
    entries: Metadata,
    stamp_stream_id: bool,
    stamp_aggregate_type: bool,
}

impl MetadataDefaults {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a default entry, written unless the session or caller supplies the
    /// same key. Reserved keys are ignored.
    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        let key = key.into();
        if is_reserved(&key) {
            tracing::warn!(%key, "ignoring default metadata entry for reserved key");
        } else {
            self.entries.insert(key, value.into());
        }
        self
    }

    /// Stamp [`STREAM_ID_KEY`] on every event.
    #[must_use]
    pub const fn stamp_stream_id(mut self) -> Self {
        self.stamp_stream_id = true;
        self
    }

    /// Stamp [`AGGREGATE_TYPE_KEY`] on events of aggregate-tagged streams.
    #[must_use]
    pub const fn stamp_aggregate_type(mut self) -> Self {
        self.stamp_aggregate_type = true;
        self
    }

    #[must_use]
    pub const fn entries(&self) -> &Metadata {
        &self.entries
    }

    /// Build the stored metadata for one event.
    #[must_use]
    pub fn merge(
        &self,
        context: &SessionContext,
        caller: Option<&Metadata>,
        stamp: &Stamp<'_>,
    ) -> Metadata {
        let mut merged = self.entries.clone();

        if let Some(correlation_id) = &context.correlation_id {
            merged.insert(CORRELATION_ID_KEY.to_owned(), correlation_id.as_str().into());
        }
        if let Some(causation_id) = &context.causation_id {
            merged.insert(CAUSATION_ID_KEY.to_owned(), causation_id.as_str().into());
        }
        merged.extend(
            context
                .headers
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );

        if let Some(caller) = caller {
            for (key, value) in caller {
                if is_reserved(key) {
                    tracing::trace!(%key, "caller metadata superseded by reserved key");
                    continue;
                }
                merged.insert(key.clone(), value.clone());
            }
        }

        merged.retain(|key, _| !is_reserved(key));
        merged.insert(SEQUENCE_KEY.to_owned(), stamp.sequence.into());
        merged.insert(
            TIMESTAMP_KEY.to_owned(),
            stamp
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Micros, true)
                .into(),
        );
        if self.stamp_stream_id {
            merged.insert(STREAM_ID_KEY.to_owned(), stamp.stream_id.to_string().into());
        }
        if self.stamp_aggregate_type
            && let Some(aggregate_type) = stamp.aggregate_type
        {
            merged.insert(AGGREGATE_TYPE_KEY.to_owned(), aggregate_type.into());
        }

        merged
    }
}

/// Per-session metadata applied to every event the session writes.
#[derive(Clone, Debug, Default)]
pub struct SessionContext {
    correlation_id: Option<String>,
    causation_id: Option<String>,
    headers: Metadata,
}

impl SessionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_causation_id(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    #[must_use]
    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }
}

/// Store-controlled values for one event.
#[derive(Clone, Copy, Debug)]
pub struct Stamp<'a> {
    pub stream_id: &'a StreamId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub aggregate_type: Option<&'a str>,
}
