//! Domain event markers and payload sets.
//!
//! [`DomainEvent`] is implemented by every concrete payload struct. A store
//! carries a closed sum type of payloads, an [`EventSet`], which knows the
//! runtime [`PayloadShape`] of each value and how to encode and decode it.
//! Most projects generate the set with [`event_set!`](crate::event_set).

use std::any::{TypeId, type_name};

use serde::{Serialize, de::DeserializeOwned};

use crate::codec::{Codec, Document};

/// Marker trait for payloads that can be persisted by the store.
///
/// [`Self::KIND`] is the default type tag the payload is registered under.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: &'static str;
}

/// Runtime identity of a concrete payload type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PayloadShape {
    id: TypeId,
    name: &'static str,
}

impl PayloadShape {
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    /// Fully qualified Rust type name, for diagnostics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

/// Closed sum type of payloads carried by one store.
pub trait EventSet: Sized + Send + Sync + 'static {
    /// Default `(tag, shape)` bindings for every payload in the set.
    fn registrations() -> Vec<(&'static str, PayloadShape)>;

    /// Shape of the payload held by this value.
    fn shape(&self) -> PayloadShape;

    /// Encode the held payload (without any enum wrapper).
    ///
    /// # Errors
    ///
    /// Returns a codec error if the payload cannot be encoded.
    fn encode<C: Codec>(&self, codec: &C) -> Result<Document, C::Error>;

    /// Decode a document as the payload identified by `shape`.
    ///
    /// Returns `None` when `shape` is not part of this set.
    fn decode<C: Codec>(
        shape: PayloadShape,
        document: &Document,
        codec: &C,
    ) -> Option<Result<Self, C::Error>>;
}

/// Declare an [`EventSet`] enum with one variant per payload type.
///
/// ```
/// use chronicle_core::{event::DomainEvent, event_set};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct MembersJoined {
///     members: Vec<String>,
/// }
///
/// impl DomainEvent for MembersJoined {
///     const KIND: &'static str = "members_joined";
/// }
///
/// event_set! {
///     #[derive(Debug, Clone)]
///     pub enum QuestEvent {
///         MembersJoined(MembersJoined),
///     }
/// }
/// ```
#[macro_export]
macro_rules! event_set {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident($payload:ty)),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $($variant($payload),)+
        }

        $(
            impl ::core::convert::From<$payload> for $name {
                fn from(event: $payload) -> Self {
                    Self::$variant(event)
                }
            }
        )+

        impl $crate::event::EventSet for $name {
            fn registrations() -> ::std::vec::Vec<(&'static str, $crate::event::PayloadShape)> {
                ::std::vec![
                    $((
                        <$payload as $crate::event::DomainEvent>::KIND,
                        $crate::event::PayloadShape::of::<$payload>(),
                    ),)+
                ]
            }

            fn shape(&self) -> $crate::event::PayloadShape {
                match self {
                    $(Self::$variant(_) => $crate::event::PayloadShape::of::<$payload>(),)+
                }
            }

            fn encode<C: $crate::codec::Codec>(
                &self,
                codec: &C,
            ) -> ::core::result::Result<$crate::codec::Document, C::Error> {
                match self {
                    $(Self::$variant(event) => codec.encode(event),)+
                }
            }

            fn decode<C: $crate::codec::Codec>(
                shape: $crate::event::PayloadShape,
                document: &$crate::codec::Document,
                codec: &C,
            ) -> ::core::option::Option<::core::result::Result<Self, C::Error>> {
                $(
                    if shape == $crate::event::PayloadShape::of::<$payload>() {
                        return ::core::option::Option::Some(
                            codec.decode::<$payload>(document).map(Self::$variant),
                        );
                    }
                )+
                ::core::option::Option::None
            }
        }
    };
}
