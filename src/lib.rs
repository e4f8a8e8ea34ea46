#![doc = include_str!("../README.md")]

pub use chronicle_core::{
    codec,
    codec::{Codec, JsonCodec},
    concurrency::ConcurrencyConflict,
    envelope::{EventEnvelope, NewEvent, StreamHandle},
    error,
    error::{ConfigError, Error, TypeError},
    event,
    event::{DomainEvent, EventSet, PayloadShape},
    event_set,
    identity::{IdentityError, StreamId, StreamIdentity},
    metadata,
    metadata::{MetadataDefaults, SessionContext},
    projection::{Aggregate, Snapshot},
    registry::EventTypeRegistry,
    store::{Session, Store, StoreOptions, StoreOptionsBuilder},
    value::{Metadata, MetadataValue},
};

pub mod storage {

    pub use chronicle_core::storage::{
        CommitError, EventRow, EventStorage, SnapshotRow, StorageTransaction, StreamSlice,
        StreamState,
    };

    // Needed by storage backend implementors only.
    #[doc(hidden)]
    pub use chronicle_core::concurrency::VersionCheck;

    pub use chronicle_core::storage::inmemory;

    #[cfg(feature = "postgres")]
    #[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
    pub mod postgres {
        pub use chronicle_postgres::{Error, Store, Transaction};
    }
}

pub mod projection {

    pub use chronicle_core::projection::{
        Aggregate, InlineProjections, ProjectionError, Snapshot,
    };
}
