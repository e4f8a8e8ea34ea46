//! The event store.
//!
//! [`StoreOptions`] fixes everything a store needs to know up front: the
//! stream identity kind, registered event types, inline projections, metadata
//! defaults and the codec. Once built it is immutable and shared.
//!
//! [`Store`] pairs those options with an [`EventStorage`] backend. Writes go
//! through a [`Session`], which carries the caller's [`SessionContext`];
//! reads are available directly on the store.
//!
//! # Example
//!
//! ```ignore
//! let options = StoreOptions::<QuestEvent>::builder()
//!     .identity(StreamIdentity::AsString)
//!     .event_types_from_set()?
//!     .inline_projection::<QuestParty>()?
//!     .build();
//! let store = Store::new(inmemory::Store::new(), options);
//!
//! let handle = store
//!     .session()
//!     .start_stream(Some("quest-1".into()), [QuestEvent::from(started)])
//!     .await?;
//! let events = store.fetch_stream(&handle.id).await?;
//! ```

use std::{fmt, sync::Arc};

use crate::{
    codec::{Codec, JsonCodec},
    error::ConfigError,
    event::{DomainEvent, EventSet, PayloadShape},
    identity::StreamIdentity,
    metadata::{MetadataDefaults, SessionContext},
    projection::{Aggregate, InlineProjections},
    registry::EventTypeRegistry,
    storage::EventStorage,
};

mod append;
mod fetch;

/// Immutable configuration of a [`Store`].
pub struct StoreOptions<E, C: Codec = JsonCodec> {
    identity: StreamIdentity,
    registry: EventTypeRegistry,
    projections: InlineProjections<E, C>,
    metadata: MetadataDefaults,
    codec: C,
}

impl<E, C: Codec> fmt::Debug for StoreOptions<E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("identity", &self.identity)
            .field("registry", &self.registry)
            .field("projections", &self.projections)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl<E: EventSet> StoreOptions<E> {
    /// Start configuring a store that encodes with [`JsonCodec`].
    #[must_use]
    pub fn builder() -> StoreOptionsBuilder<E> {
        StoreOptionsBuilder::with_codec(JsonCodec)
    }
}

impl<E, C: Codec> StoreOptions<E, C> {
    #[must_use]
    pub const fn identity(&self) -> StreamIdentity {
        self.identity
    }

    #[must_use]
    pub const fn registry(&self) -> &EventTypeRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn projections(&self) -> &InlineProjections<E, C> {
        &self.projections
    }

    #[must_use]
    pub const fn metadata(&self) -> &MetadataDefaults {
        &self.metadata
    }

    #[must_use]
    pub const fn codec(&self) -> &C {
        &self.codec
    }
}

/// Builder for [`StoreOptions`].
pub struct StoreOptionsBuilder<E, C: Codec = JsonCodec> {
    options: StoreOptions<E, C>,
}

impl<E, C> StoreOptionsBuilder<E, C>
where
    E: EventSet,
    C: Codec,
{
    /// Start configuring a store that encodes with `codec`.
    #[must_use]
    pub fn with_codec(codec: C) -> Self {
        Self {
            options: StoreOptions {
                identity: StreamIdentity::default(),
                registry: EventTypeRegistry::new(),
                projections: InlineProjections::new(),
                metadata: MetadataDefaults::default(),
                codec,
            },
        }
    }

    /// Identify streams by UUID (the default) or by string key.
    #[must_use]
    pub const fn identity(mut self, identity: StreamIdentity) -> Self {
        self.options.identity = identity;
        self
    }

    /// Register payload `T` under [`DomainEvent::KIND`].
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the tag or payload is already bound
    /// differently.
    pub fn event_type<T>(mut self) -> Result<Self, ConfigError>
    where
        T: DomainEvent,
        E: From<T>,
    {
        self.options.registry.register::<T>()?;
        Ok(self)
    }

    /// Register payload `T` under an explicit tag.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the tag or payload is already bound
    /// differently.
    pub fn event_type_as<T>(mut self, tag: impl Into<String>) -> Result<Self, ConfigError>
    where
        T: DomainEvent,
        E: From<T>,
    {
        self.options.registry.register_as::<T>(tag)?;
        Ok(self)
    }

    /// Register every payload of the event set under its default tag.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a tag or payload is already bound
    /// differently.
    pub fn event_types_from_set(mut self) -> Result<Self, ConfigError> {
        for (tag, shape) in E::registrations() {
            self.options.registry.bind(tag, shape)?;
        }
        Ok(self)
    }

    /// Maintain a snapshot of `A` for every stream associated with it.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `A` is already registered or one of its
    /// starters is claimed by another aggregate.
    pub fn inline_projection<A: Aggregate<E>>(mut self) -> Result<Self, ConfigError> {
        self.options.projections.aggregate_streams_with::<A>()?;
        Ok(self)
    }

    #[must_use]
    pub fn metadata(mut self, defaults: MetadataDefaults) -> Self {
        self.options.metadata = defaults;
        self
    }

    #[must_use]
    pub fn build(self) -> StoreOptions<E, C> {
        tracing::debug!(
            identity = %self.options.identity,
            event_types = self.options.registry.len(),
            "store options built"
        );
        self.options
    }
}

/// Event store over a storage backend.
pub struct Store<S, E, C: Codec = JsonCodec> {
    storage: S,
    options: Arc<StoreOptions<E, C>>,
}

impl<S: Clone, E, C: Codec> Clone for Store<S, E, C> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            options: Arc::clone(&self.options),
        }
    }
}

impl<S: fmt::Debug, E, C: Codec> fmt::Debug for Store<S, E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("storage", &self.storage)
            .field("options", &self.options)
            .finish()
    }
}

impl<S, E, C> Store<S, E, C>
where
    S: EventStorage,
    E: EventSet,
    C: Codec,
{
    #[must_use]
    pub fn new(storage: S, options: StoreOptions<E, C>) -> Self {
        Self {
            storage,
            options: Arc::new(options),
        }
    }

    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    #[must_use]
    pub fn options(&self) -> &StoreOptions<E, C> {
        &self.options
    }

    /// Open a write session without correlation data.
    #[must_use]
    pub fn session(&self) -> Session<'_, S, E, C> {
        self.session_with(SessionContext::default())
    }

    /// Open a write session whose events carry `context`.
    #[must_use]
    pub fn session_with(&self, context: SessionContext) -> Session<'_, S, E, C> {
        Session {
            store: self,
            context,
        }
    }

    fn tag_for(&self, shape: PayloadShape) -> Result<&str, crate::error::TypeError> {
        self.options.registry.tag_for(shape)
    }
}

/// Unit of writes against a [`Store`].
///
/// Each start or append is its own transaction; the session only supplies the
/// shared [`SessionContext`].
pub struct Session<'a, S, E, C: Codec = JsonCodec> {
    store: &'a Store<S, E, C>,
    context: SessionContext,
}

impl<S, E, C: Codec> fmt::Debug for Session<'_, S, E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl<S, E, C: Codec> Session<'_, S, E, C> {
    #[must_use]
    pub const fn context(&self) -> &SessionContext {
        &self.context
    }
}
