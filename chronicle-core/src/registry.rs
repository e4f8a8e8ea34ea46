//! Event type registry.
//!
//! Maps stable textual type tags to payload shapes and back. Appends use
//! [`EventTypeRegistry::tag_for`] to label each row; fetches use
//! [`EventTypeRegistry::resolve`] to route a stored row back to its payload
//! type. The registry is populated while building the store options and is
//! read-only afterwards.

use std::collections::HashMap;

use crate::{
    error::{ConfigError, TypeError},
    event::{DomainEvent, PayloadShape},
};

#[derive(Clone, Debug, Default)]
pub struct EventTypeRegistry {
    by_tag: HashMap<String, PayloadShape>,
    by_shape: HashMap<PayloadShape, String>,
}

impl EventTypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under its [`DomainEvent::KIND`].
    ///
    /// # Errors
    ///
    /// See [`bind`](Self::bind).
    pub fn register<T: DomainEvent>(&mut self) -> Result<(), ConfigError> {
        self.bind(T::KIND, PayloadShape::of::<T>())
    }

    /// Register `T` under an explicit tag.
    ///
    /// # Errors
    ///
    /// See [`bind`](Self::bind).
    pub fn register_as<T: 'static>(&mut self, tag: impl Into<String>) -> Result<(), ConfigError> {
        self.bind(tag, PayloadShape::of::<T>())
    }

    /// Bind `tag` to `shape`.
    ///
    /// Binding an existing pair again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateTypeTag`] if `tag` is bound to another
    /// shape, or [`ConfigError::PayloadAlreadyRegistered`] if `shape` is bound
    /// to another tag.
    pub fn bind(&mut self, tag: impl Into<String>, shape: PayloadShape) -> Result<(), ConfigError> {
        let tag = tag.into();

        if let Some(existing) = self.by_tag.get(&tag) {
            if *existing == shape {
                return Ok(());
            }
            return Err(ConfigError::DuplicateTypeTag {
                tag,
                existing: existing.name(),
                requested: shape.name(),
            });
        }

        if let Some(existing) = self.by_shape.get(&shape) {
            return Err(ConfigError::PayloadAlreadyRegistered {
                payload: shape.name(),
                existing: existing.clone(),
                requested: tag,
            });
        }

        tracing::trace!(%tag, payload = shape.name(), "event type registered");
        self.by_shape.insert(shape, tag.clone());
        self.by_tag.insert(tag, shape);
        Ok(())
    }

    /// Resolve a stored tag to its payload shape.
    ///
    /// # Errors
    ///
    /// Returns [`TypeError::UnknownEventType`] if the tag was never registered.
    pub fn resolve(&self, tag: &str) -> Result<PayloadShape, TypeError> {
        self.by_tag
            .get(tag)
            .copied()
            .ok_or_else(|| TypeError::UnknownEventType {
                tag: tag.to_owned(),
            })
    }

    /// Look up the tag for a payload shape.
    ///
    /// # Errors
    ///
    /// Returns [`TypeError::UnregisteredPayloadType`] if the shape has no tag.
    pub fn tag_for(&self, shape: PayloadShape) -> Result<&str, TypeError> {
        self.by_shape
            .get(&shape)
            .map(String::as_str)
            .ok_or(TypeError::UnregisteredPayloadType {
                payload: shape.name(),
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_tag.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_tag.is_empty()
    }
}
