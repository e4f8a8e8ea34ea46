//! Core types and traits for the chronicle event store.
//!
//! - [`store`] - Store configuration, appends and fetches (`StoreOptions`, `Store`, `Session`)
//! - [`storage`] - Backing store abstraction (`EventStorage`, `StorageTransaction`) and the in-memory backend
//! - [`event`] - Payload markers and closed payload sets (`DomainEvent`, `EventSet`, `event_set!`)
//! - [`registry`] - Type tag registry (`EventTypeRegistry`)
//! - [`identity`] - Stream identity policy (`StreamIdentity`, `StreamId`)
//! - [`metadata`] - Metadata merging and reserved keys
//! - [`projection`] - Inline projections (`Aggregate`, `InlineProjections`)
//! - [`codec`] - Value codec (`Codec`, `JsonCodec`)
//!
//! # Example
//!
//! ```
//! use chronicle_core::{
//!     event::DomainEvent,
//!     event_set,
//!     identity::StreamIdentity,
//!     storage::inmemory,
//!     store::{Store, StoreOptions},
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct MembersJoined {
//!     members: Vec<String>,
//! }
//!
//! impl DomainEvent for MembersJoined {
//!     const KIND: &'static str = "members_joined";
//! }
//!
//! event_set! {
//!     #[derive(Debug, Clone)]
//!     enum QuestEvent {
//!         Joined(MembersJoined),
//!     }
//! }
//!
//! let options = StoreOptions::<QuestEvent>::builder()
//!     .identity(StreamIdentity::AsString)
//!     .event_types_from_set()
//!     .unwrap()
//!     .build();
//! let store = Store::new(inmemory::Store::new(), options);
//! ```
//!
//! Most users should depend on the `chronicle` crate, which re-exports these
//! types.

pub mod codec;
pub mod concurrency;
pub mod envelope;
pub mod error;
pub mod event;
pub mod identity;
pub mod metadata;
pub mod projection;
pub mod registry;
pub mod storage;
pub mod store;
pub mod value;
