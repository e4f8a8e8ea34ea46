use super::Store;
use crate::{
    codec::Codec,
    envelope::EventEnvelope,
    error::{Error, TypeError},
    event::EventSet,
    identity::StreamId,
    projection::{Aggregate, Snapshot},
    storage::{EventRow, EventStorage, StreamState},
    value::Metadata,
};

type StoreError<S> = Error<<S as EventStorage>::Error>;

impl<S, E, C> Store<S, E, C>
where
    S: EventStorage,
    E: EventSet,
    C: Codec,
{
    /// Every event of a stream, in sequence order.
    ///
    /// # Errors
    ///
    /// See [`fetch_stream_since`](Self::fetch_stream_since).
    pub async fn fetch_stream(
        &self,
        id: &StreamId,
    ) -> Result<Vec<EventEnvelope<E>>, StoreError<S>> {
        self.fetch_stream_since(id, 1).await
    }

    /// Events of a stream with `sequence >= since`, in sequence order.
    ///
    /// Returns an empty vector when `since` is past the stream's version.
    ///
    /// # Errors
    ///
    /// - [`Error::Identity`] if `id` is of the wrong kind.
    /// - [`Error::StreamNotFound`] if the stream does not exist.
    /// - [`Error::Type`] if a row's tag is not registered with this store.
    /// - [`Error::Deserialization`] if a row cannot be decoded; no partial
    ///   result is returned.
    #[tracing::instrument(skip(self), fields(stream_id = %id))]
    pub async fn fetch_stream_since(
        &self,
        id: &StreamId,
        since: u64,
    ) -> Result<Vec<EventEnvelope<E>>, StoreError<S>> {
        self.options.identity.validate(id)?;
        let slice = self
            .storage
            .read_stream(id, since)
            .await
            .map_err(Error::Storage)?
            .ok_or_else(|| Error::StreamNotFound(id.clone()))?;

        let events = slice
            .events
            .into_iter()
            .map(|row| self.decode(row))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::trace!(
            event_count = events.len(),
            version = slice.state.version,
            "stream fetched"
        );
        Ok(events)
    }

    /// Stream record without events, or `None` for an unknown stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Identity`] for an id of the wrong kind, or a storage
    /// error.
    pub async fn fetch_stream_state(
        &self,
        id: &StreamId,
    ) -> Result<Option<StreamState>, StoreError<S>> {
        self.options.identity.validate(id)?;
        self.storage
            .read_stream_state(id)
            .await
            .map_err(Error::Storage)
    }

    /// Fold the full history of a stream into a fresh `A`, ignoring any
    /// stored snapshot.
    ///
    /// # Errors
    ///
    /// As [`fetch_stream`](Self::fetch_stream).
    #[tracing::instrument(skip(self), fields(stream_id = %id, aggregate = A::KIND))]
    pub async fn aggregate_stream<A>(&self, id: &StreamId) -> Result<A, StoreError<S>>
    where
        A: Aggregate<E>,
    {
        let events = self.fetch_stream(id).await?;
        let mut state = A::default();
        for envelope in &events {
            state.apply(&envelope.data);
        }
        Ok(state)
    }

    /// Read the inline snapshot of `A` for a stream.
    ///
    /// Returns `None` when the stream has no snapshot.
    ///
    /// # Errors
    ///
    /// - [`Error::AggregateTypeMismatch`] if the stream is projected as a
    ///   different aggregate.
    /// - [`Error::State`] if the snapshot cannot be decoded as `A`.
    #[tracing::instrument(skip(self), fields(stream_id = %id, aggregate = A::KIND))]
    pub async fn load_aggregate<A>(
        &self,
        id: &StreamId,
    ) -> Result<Option<Snapshot<A>>, StoreError<S>>
    where
        A: Aggregate<E>,
    {
        self.options.identity.validate(id)?;
        let Some(row) = self
            .storage
            .read_snapshot(id)
            .await
            .map_err(Error::Storage)?
        else {
            return Ok(None);
        };

        if row.aggregate_type != A::KIND {
            return Err(Error::AggregateTypeMismatch {
                stream_id: id.clone(),
                expected: A::KIND,
                found: row.aggregate_type,
            });
        }

        let state = self
            .options
            .codec
            .decode::<A>(&row.state)
            .map_err(|source| Error::State {
                aggregate: A::KIND.to_owned(),
                source: Box::new(source),
            })?;
        Ok(Some(Snapshot {
            stream_id: row.stream_id,
            version: row.version,
            state,
        }))
    }

    fn decode(&self, row: EventRow) -> Result<EventEnvelope<E>, StoreError<S>> {
        let codec = &self.options.codec;
        let shape = self.options.registry.resolve(&row.kind)?;
        let data = E::decode(shape, &row.data, codec)
            .ok_or_else(|| TypeError::UnknownEventType {
                tag: row.kind.clone(),
            })?
            .map_err(|source| Error::Deserialization {
                stream_id: row.stream_id.clone(),
                sequence: row.sequence,
                source: Box::new(source),
            })?;
        let metadata = codec
            .decode::<Metadata>(&row.metadata)
            .map_err(|source| Error::Deserialization {
                stream_id: row.stream_id.clone(),
                sequence: row.sequence,
                source: Box::new(source),
            })?;

        Ok(EventEnvelope {
            stream_id: row.stream_id,
            sequence: row.sequence,
            kind: row.kind,
            data,
            metadata,
            timestamp: row.timestamp,
        })
    }
}
