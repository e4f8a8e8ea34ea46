//! Inline projection engine.
//!
//! An [`Aggregate`] is a serializable state folded from the events of one
//! stream. Registering it with [`InlineProjections`] stores a type-erased fold
//! under the aggregate's tag, so the append path can bring the stream's
//! snapshot up to date in the same transaction that writes the events.
//!
//! Folding is pure: decode the current snapshot (or start from
//! [`Default`]), apply each new event in order, encode the result.

use std::{collections::HashMap, fmt, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{
    codec::{Codec, Document},
    error::ConfigError,
    event::PayloadShape,
    identity::StreamId,
};

/// State materialized from the events of a single stream.
///
/// ```ignore
/// #[derive(Default, Serialize, Deserialize)]
/// struct QuestParty {
///     members: Vec<String>,
/// }
///
/// impl Aggregate<QuestEvent> for QuestParty {
///     const KIND: &'static str = "quest_party";
///
///     fn apply(&mut self, event: &QuestEvent) {
///         if let QuestEvent::Joined(joined) = event {
///             self.members.extend(joined.members.iter().cloned());
///         }
///     }
/// }
/// ```
pub trait Aggregate<E>: Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Aggregate type tag, recorded on the stream and its snapshot.
    const KIND: &'static str;

    /// Payload shapes whose appearance as the first event of a new stream
    /// associates that stream with this aggregate.
    fn stream_starters() -> Vec<PayloadShape> {
        Vec::new()
    }

    fn apply(&mut self, event: &E);
}

/// Aggregate state read back from its inline snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot<A> {
    pub stream_id: StreamId,
    /// Stream version the state reflects.
    pub version: u64,
    pub state: A,
}

/// Error from folding events into a snapshot.
#[derive(Debug, Error)]
pub enum ProjectionError<CodecError>
where
    CodecError: std::error::Error + 'static,
{
    #[error("no inline projection registered for aggregate `{0}`")]
    NoFoldFunctionRegistered(String),
    #[error("failed to encode or decode state of aggregate `{aggregate}`: {source}")]
    State {
        aggregate: String,
        #[source]
        source: CodecError,
    },
}

type FoldFn<E, C> = Arc<
    dyn Fn(&C, Option<&Document>, &[&E]) -> Result<Document, <C as Codec>::Error> + Send + Sync,
>;

/// Registered inline projections of one store.
pub struct InlineProjections<E, C: Codec> {
    folds: HashMap<String, FoldFn<E, C>>,
    starters: HashMap<PayloadShape, String>,
}

impl<E, C: Codec> Default for InlineProjections<E, C> {
    fn default() -> Self {
        Self {
            folds: HashMap::new(),
            starters: HashMap::new(),
        }
    }
}

impl<E, C: Codec> Clone for InlineProjections<E, C> {
    fn clone(&self) -> Self {
        Self {
            folds: self.folds.clone(),
            starters: self.starters.clone(),
        }
    }
}

impl<E, C: Codec> fmt::Debug for InlineProjections<E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineProjections")
            .field("aggregates", &self.folds.keys().collect::<Vec<_>>())
            .field("starters", &self.starters)
            .finish()
    }
}

fn fold_into<A, E, C>(
    codec: &C,
    current: Option<&Document>,
    events: &[&E],
) -> Result<Document, C::Error>
where
    A: Aggregate<E>,
    C: Codec,
{
    let mut state = match current {
        Some(document) => codec.decode::<A>(document)?,
        None => A::default(),
    };
    for event in events {
        state.apply(event);
    }
    codec.encode(&state)
}

impl<E, C> InlineProjections<E, C>
where
    E: Send + Sync + 'static,
    C: Codec,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `A` as an inline projection, along with its stream starters.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateAggregate`] if `A::KIND` is already
    /// registered, or [`ConfigError::StarterAlreadyClaimed`] if one of its
    /// starter shapes already belongs to another aggregate.
    pub fn aggregate_streams_with<A: Aggregate<E>>(&mut self) -> Result<(), ConfigError> {
        if self.folds.contains_key(A::KIND) {
            return Err(ConfigError::DuplicateAggregate(A::KIND.to_owned()));
        }

        let starters = A::stream_starters();
        if let Some((shape, existing)) = starters
            .iter()
            .find_map(|shape| self.starters.get(shape).map(|existing| (shape, existing)))
        {
            return Err(ConfigError::StarterAlreadyClaimed {
                payload: shape.name(),
                existing: existing.clone(),
            });
        }

        let fold: FoldFn<E, C> = Arc::new(fold_into::<A, E, C>);
        self.folds.insert(A::KIND.to_owned(), fold);
        for shape in starters {
            self.starters.insert(shape, A::KIND.to_owned());
        }
        tracing::trace!(aggregate = A::KIND, "inline projection registered");
        Ok(())
    }

    /// Aggregate that streams starting with `shape` are associated with.
    #[must_use]
    pub fn aggregate_for_shape(&self, shape: PayloadShape) -> Option<&str> {
        self.starters.get(&shape).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, aggregate: &str) -> bool {
        self.folds.contains_key(aggregate)
    }

    /// Fold `events` into the aggregate state `current` (or the initial state
    /// when `None`) and return the encoded result.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::NoFoldFunctionRegistered`] for an unknown
    /// aggregate, or [`ProjectionError::State`] if the state cannot be decoded
    /// or encoded.
    pub fn fold(
        &self,
        codec: &C,
        aggregate: &str,
        current: Option<&Document>,
        events: &[&E],
    ) -> Result<Document, ProjectionError<C::Error>> {
        let fold = self
            .folds
            .get(aggregate)
            .ok_or_else(|| ProjectionError::NoFoldFunctionRegistered(aggregate.to_owned()))?;
        fold(codec, current, events).map_err(|source| ProjectionError::State {
            aggregate: aggregate.to_owned(),
            source,
        })
    }
}
