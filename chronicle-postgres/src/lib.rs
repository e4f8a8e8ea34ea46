//! Postgres storage backend for the chronicle event store.
//!
//! [`Store`] implements [`chronicle_core::storage::EventStorage`] on top of a
//! `sqlx` connection pool. Three tables hold everything:
//!
//! - `es_streams`: one row per stream with its version and aggregate type
//! - `es_events`: one row per event, keyed by `(stream_id, sequence)`
//! - `es_snapshots`: one row per aggregate-tagged stream
//!
//! The stream id column is `UUID` or `TEXT` depending on the store's
//! [`StreamIdentity`](chronicle_core::identity::StreamIdentity), fixed when
//! the schema is created with [`Store::migrate`].
//!
//! Appends lock the stream row (`SELECT ... FOR UPDATE`) and advance its
//! version with a conditional `UPDATE`; reads run in a `REPEATABLE READ, READ
//! ONLY` transaction.

mod error;
pub mod store;

pub use error::Error;
pub use store::{Store, Transaction};
