use chrono::{DateTime, SubsecRound, Utc};
use nonempty::NonEmpty;

use super::Session;
use crate::{
    codec::Codec,
    concurrency::{ConcurrencyConflict, VersionCheck},
    envelope::{NewEvent, StreamHandle},
    error::Error,
    event::EventSet,
    identity::StreamId,
    metadata::Stamp,
    projection::{Aggregate, ProjectionError},
    storage::{
        CommitError, EventRow, EventStorage, SnapshotRow, StorageTransaction, StreamState,
    },
};

type StoreError<S> = Error<<S as EventStorage>::Error>;

/// Commit timestamps are kept at the precision every backend can store.
fn commit_timestamp() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn collect_batch<E>(
    events: impl IntoIterator<Item = impl Into<NewEvent<E>>>,
) -> Option<NonEmpty<NewEvent<E>>> {
    NonEmpty::from_vec(events.into_iter().map(Into::into).collect())
}

fn commit_error<S: std::error::Error + 'static>(err: CommitError<S>) -> Error<S> {
    match err {
        CommitError::Conflict(conflict) => Error::Conflict(conflict),
        CommitError::StreamExists(id) => Error::StreamAlreadyExists(id),
        CommitError::Store(err) => Error::Storage(err),
    }
}

fn projection_error<S, CE>(err: ProjectionError<CE>) -> Error<S>
where
    S: std::error::Error + 'static,
    CE: std::error::Error + Send + Sync + 'static,
{
    match err {
        ProjectionError::NoFoldFunctionRegistered(aggregate) => {
            Error::NoFoldFunctionRegistered { aggregate }
        }
        ProjectionError::State { aggregate, source } => Error::State {
            aggregate,
            source: Box::new(source),
        },
    }
}

/// Roll `tx` back and return `err`.
///
/// A failed rollback is logged; the caller sees the error that caused it.
async fn abort<T, Tx>(tx: Tx, err: Error<Tx::Error>) -> Result<T, Error<Tx::Error>>
where
    Tx: StorageTransaction,
{
    if let Err(rollback) = tx.rollback().await {
        tracing::warn!(error = %rollback, "rollback failed");
    }
    Err(err)
}

impl<S, E, C> Session<'_, S, E, C>
where
    S: EventStorage,
    E: EventSet,
    C: Codec,
{
    /// Create a new stream holding `events`.
    ///
    /// When `id` is `None` a UUID store generates one. The stream is
    /// associated with an aggregate if the first event's payload is a
    /// registered stream starter.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyAppend`] for an empty batch.
    /// - [`Error::Identity`] if `id` is of the wrong kind, or missing on a
    ///   string-keyed store.
    /// - [`Error::StreamAlreadyExists`] if the id is taken, including by a
    ///   concurrent start that committed first.
    /// - [`Error::Type`], [`Error::Serialization`] or [`Error::State`] if an
    ///   event or the snapshot cannot be encoded.
    #[tracing::instrument(skip(self, events), fields(stream_id))]
    pub async fn start_stream(
        &self,
        id: Option<StreamId>,
        events: impl IntoIterator<Item = impl Into<NewEvent<E>>>,
    ) -> Result<StreamHandle, StoreError<S>> {
        let batch = collect_batch(events).ok_or(Error::EmptyAppend)?;
        let options = &self.store.options;
        let aggregate = options
            .projections
            .aggregate_for_shape(batch.head.event.shape())
            .map(str::to_owned);
        self.start(id, batch, aggregate).await
    }

    /// Create a new stream holding `events`, projected as aggregate `A`
    /// regardless of its first payload.
    ///
    /// # Errors
    ///
    /// As [`start_stream`](Self::start_stream), plus
    /// [`Error::NoFoldFunctionRegistered`] if `A` has no inline projection.
    #[tracing::instrument(skip(self, events), fields(stream_id, aggregate = A::KIND))]
    pub async fn start_stream_for<A>(
        &self,
        id: Option<StreamId>,
        events: impl IntoIterator<Item = impl Into<NewEvent<E>>>,
    ) -> Result<StreamHandle, StoreError<S>>
    where
        A: Aggregate<E>,
    {
        if !self.store.options.projections.contains(A::KIND) {
            return Err(Error::NoFoldFunctionRegistered {
                aggregate: A::KIND.to_owned(),
            });
        }
        let batch = collect_batch(events).ok_or(Error::EmptyAppend)?;
        self.start(id, batch, Some(A::KIND.to_owned())).await
    }

    /// Append `events` to an existing stream.
    ///
    /// With `expected_version` set, the append only succeeds if the stream is
    /// still at that version. Without it, the append waits for concurrent
    /// writers to the same stream and continues from the version it finds.
    ///
    /// # Errors
    ///
    /// - [`Error::EmptyAppend`] for an empty batch.
    /// - [`Error::Identity`] if `id` is of the wrong kind.
    /// - [`Error::StreamNotFound`] if the stream does not exist.
    /// - [`Error::Conflict`] if the stream moved past the expected version.
    /// - [`Error::NoFoldFunctionRegistered`] if the stream's aggregate has no
    ///   inline projection.
    #[tracing::instrument(skip(self, events), fields(stream_id = %id, event_count))]
    pub async fn append(
        &self,
        id: &StreamId,
        expected_version: Option<u64>,
        events: impl IntoIterator<Item = impl Into<NewEvent<E>>>,
    ) -> Result<StreamHandle, StoreError<S>> {
        let batch = collect_batch(events).ok_or(Error::EmptyAppend)?;
        tracing::Span::current().record("event_count", batch.len());
        let options = &self.store.options;
        options.identity.validate(id)?;

        let mut tx = self.store.storage.begin().await.map_err(Error::Storage)?;

        let state = match tx.lock_stream(id).await {
            Ok(Some(state)) => state,
            Ok(None) => return abort(tx, Error::StreamNotFound(id.clone())).await,
            Err(err) => return abort(tx, Error::Storage(err)).await,
        };

        if let Some(expected) = expected_version
            && expected != state.version
        {
            tracing::debug!(expected, actual = state.version, "expected version mismatch");
            let conflict = ConcurrencyConflict {
                stream_id: id.clone(),
                expected,
                actual: state.version,
            };
            return abort(tx, conflict.into()).await;
        }

        let base = state.version;
        let timestamp = commit_timestamp();
        let rows = match self.encode(
            id,
            base,
            timestamp,
            state.aggregate_type.as_deref(),
            &batch,
        ) {
            Ok(rows) => rows,
            Err(err) => return abort(tx, err).await,
        };
        let version = rows.last().sequence;

        match tx.advance_version(id, base, version).await {
            Ok(VersionCheck::Advanced) => {}
            Ok(VersionCheck::Stale { actual }) => {
                tracing::debug!(expected = base, actual, "stream advanced concurrently");
                let conflict = ConcurrencyConflict {
                    stream_id: id.clone(),
                    expected: base,
                    actual,
                };
                return abort(tx, conflict.into()).await;
            }
            Err(err) => return abort(tx, Error::Storage(err)).await,
        }

        if let Err(err) = tx.insert_events(&rows).await {
            return abort(tx, Error::Storage(err)).await;
        }

        if let Some(aggregate) = &state.aggregate_type {
            let current = match tx.load_snapshot(id).await {
                Ok(snapshot) => snapshot,
                Err(err) => return abort(tx, Error::Storage(err)).await,
            };
            if let Some(snapshot) = &current
                && snapshot.version != base
            {
                tracing::warn!(
                    snapshot_version = snapshot.version,
                    stream_version = base,
                    "snapshot out of step with its stream"
                );
            }
            let snapshot = match self.project(
                id,
                aggregate,
                current.as_ref().map(|snapshot| &snapshot.state),
                &batch,
                version,
            ) {
                Ok(snapshot) => snapshot,
                Err(err) => return abort(tx, err).await,
            };
            if let Err(err) = tx.upsert_snapshot(&snapshot).await {
                return abort(tx, Error::Storage(err)).await;
            }
        }

        tx.commit().await.map_err(commit_error)?;
        tracing::debug!(version, "events appended");
        Ok(StreamHandle {
            id: id.clone(),
            version,
        })
    }

    async fn start(
        &self,
        id: Option<StreamId>,
        batch: NonEmpty<NewEvent<E>>,
        aggregate: Option<String>,
    ) -> Result<StreamHandle, StoreError<S>> {
        let options = &self.store.options;
        let id = options.identity.resolve(id)?;
        tracing::Span::current().record("stream_id", tracing::field::display(&id));

        let timestamp = commit_timestamp();
        let rows = self.encode(&id, 0, timestamp, aggregate.as_deref(), &batch)?;
        let version = rows.last().sequence;
        let snapshot = aggregate
            .as_deref()
            .map(|aggregate| self.project(&id, aggregate, None, &batch, version))
            .transpose()?;
        let state = StreamState {
            id: id.clone(),
            version,
            aggregate_type: aggregate,
            created_at: timestamp,
        };

        let mut tx = self.store.storage.begin().await.map_err(Error::Storage)?;
        match tx.insert_stream(&state).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("stream id already taken");
                return abort(tx, Error::StreamAlreadyExists(id)).await;
            }
            Err(err) => return abort(tx, Error::Storage(err)).await,
        }
        if let Err(err) = tx.insert_events(&rows).await {
            return abort(tx, Error::Storage(err)).await;
        }
        if let Some(snapshot) = &snapshot
            && let Err(err) = tx.upsert_snapshot(snapshot).await
        {
            return abort(tx, Error::Storage(err)).await;
        }

        tx.commit().await.map_err(commit_error)?;
        tracing::debug!(version, aggregate = ?state.aggregate_type, "stream started");
        Ok(StreamHandle { id, version })
    }

    /// Encode a batch as rows numbered from `base + 1`.
    fn encode(
        &self,
        id: &StreamId,
        base: u64,
        timestamp: DateTime<Utc>,
        aggregate: Option<&str>,
        batch: &NonEmpty<NewEvent<E>>,
    ) -> Result<NonEmpty<EventRow>, StoreError<S>> {
        let options = &self.store.options;
        let mut rows = Vec::with_capacity(batch.len());

        for (index, (new_event, sequence)) in batch.iter().zip(base + 1..).enumerate() {
            let kind = self.store.tag_for(new_event.event.shape())?.to_owned();
            let data = new_event
                .event
                .encode(&options.codec)
                .map_err(|source| Error::Serialization {
                    index,
                    source: Box::new(source),
                })?;
            let stamp = Stamp {
                stream_id: id,
                sequence,
                timestamp,
                aggregate_type: aggregate,
            };
            let merged = options
                .metadata
                .merge(&self.context, new_event.metadata.as_ref(), &stamp);
            let metadata = options
                .codec
                .encode(&merged)
                .map_err(|source| Error::Serialization {
                    index,
                    source: Box::new(source),
                })?;
            tracing::trace!(%kind, sequence, "event encoded");
            rows.push(EventRow {
                stream_id: id.clone(),
                sequence,
                kind,
                data,
                metadata,
                timestamp,
            });
        }

        NonEmpty::from_vec(rows).ok_or(Error::EmptyAppend)
    }

    fn project(
        &self,
        id: &StreamId,
        aggregate: &str,
        current: Option<&crate::codec::Document>,
        batch: &NonEmpty<NewEvent<E>>,
        version: u64,
    ) -> Result<SnapshotRow, StoreError<S>> {
        let options = &self.store.options;
        let events: Vec<&E> = batch.iter().map(|new_event| &new_event.event).collect();
        let state = options
            .projections
            .fold(&options.codec, aggregate, current, &events)
            .map_err(projection_error)?;
        tracing::trace!(aggregate, version, "snapshot folded");
        Ok(SnapshotRow {
            stream_id: id.clone(),
            aggregate_type: aggregate.to_owned(),
            version,
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        error::{Error, TypeError},
        event::fixtures::{departed, joined, started},
        identity::{IdentityError, StreamId, StreamIdentity},
        metadata::{SEQUENCE_KEY, SessionContext},
        projection::fixtures::QuestParty,
        storage::EventStorage,
        store::fixtures::quest_store,
    };

    #[tokio::test]
    async fn start_stream_numbers_events_from_one() {
        let store = quest_store(StreamIdentity::AsString);
        let handle = store
            .session()
            .start_stream(
                Some("quest-1".into()),
                [started("Find the horn"), joined(&["Mat"])],
            )
            .await
            .unwrap();

        assert_eq!(handle.version, 2);
        let events = store.fetch_stream(&handle.id).await.unwrap();
        assert_eq!(
            events.iter().map(|e| e.sequence).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn uuid_store_generates_ids() {
        let store = quest_store(StreamIdentity::AsUuid);
        let handle = store
            .session()
            .start_stream(None, [joined(&["Egwene"])])
            .await
            .unwrap();
        assert!(handle.id.as_uuid().is_some());
    }

    #[tokio::test]
    async fn string_store_requires_a_key() {
        let store = quest_store(StreamIdentity::AsString);
        let err = store
            .session()
            .start_stream(None, [joined(&["Egwene"])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Identity(IdentityError::StreamKeyRequired)
        ));
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let store = quest_store(StreamIdentity::AsString);
        let err = store
            .session()
            .start_stream(Some("quest-1".into()), Vec::<crate::event::fixtures::QuestEvent>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyAppend));
    }

    #[tokio::test]
    async fn starting_a_taken_id_fails() {
        let store = quest_store(StreamIdentity::AsString);
        let session = store.session();
        session
            .start_stream(Some("quest-1".into()), [joined(&["Rand"])])
            .await
            .unwrap();

        let err = session
            .start_stream(Some("quest-1".into()), [joined(&["Mat"])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::StreamAlreadyExists(ref id) if id.as_key() == Some("quest-1")
        ));
    }

    #[tokio::test]
    async fn append_to_missing_stream_fails() {
        let store = quest_store(StreamIdentity::AsString);
        let err = store
            .session()
            .append(&StreamId::from("ghost"), None, [joined(&["Rand"])])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StreamNotFound(_)));
    }

    #[tokio::test]
    async fn append_with_stale_expected_version_conflicts() {
        let store = quest_store(StreamIdentity::AsString);
        let session = store.session();
        let handle = session
            .start_stream(Some("quest-1".into()), [joined(&["Rand"]), joined(&["Mat"])])
            .await
            .unwrap();

        let err = session
            .append(&handle.id, Some(1), [departed(&["Mat"])])
            .await
            .unwrap_err();
        let Error::Conflict(conflict) = err else {
            panic!("expected a conflict, got {err:?}");
        };
        assert_eq!(conflict.expected, 1);
        assert_eq!(conflict.actual, 2);

        let state = store.storage().read_stream_state(&handle.id).await.unwrap();
        assert_eq!(state.map(|s| s.version), Some(2));
    }

    #[tokio::test]
    async fn append_continues_the_sequence() {
        let store = quest_store(StreamIdentity::AsString);
        let session = store.session();
        let handle = session
            .start_stream(Some("quest-1".into()), [joined(&["Rand"])])
            .await
            .unwrap();
        let handle = session
            .append(&handle.id, Some(1), [joined(&["Mat"]), joined(&["Perrin"])])
            .await
            .unwrap();

        assert_eq!(handle.version, 3);
        let events = store.fetch_stream(&handle.id).await.unwrap();
        assert_eq!(events[2].metadata[SEQUENCE_KEY].as_u64(), Some(3));
    }

    #[tokio::test]
    async fn unregistered_payload_fails_before_writing() {
        let options = crate::store::StoreOptions::<crate::event::fixtures::QuestEvent>::builder()
            .identity(StreamIdentity::AsString)
            .event_type::<crate::event::fixtures::MembersJoined>()
            .unwrap()
            .build();
        let store = crate::store::Store::new(crate::storage::inmemory::Store::new(), options);

        let err = store
            .session()
            .start_stream(Some("quest-1".into()), [departed(&["Rand"])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Type(TypeError::UnregisteredPayloadType { .. })
        ));
        assert!(
            store
                .fetch_stream_state(&StreamId::from("quest-1"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn start_stream_for_requires_registered_aggregate() {
        let options = crate::store::StoreOptions::<crate::event::fixtures::QuestEvent>::builder()
            .identity(StreamIdentity::AsString)
            .event_types_from_set()
            .unwrap()
            .build();
        let store = crate::store::Store::new(crate::storage::inmemory::Store::new(), options);

        let err = store
            .session()
            .start_stream_for::<QuestParty>(Some("quest-1".into()), [joined(&["Rand"])])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NoFoldFunctionRegistered { ref aggregate } if aggregate == "quest_party"
        ));
    }

    #[tokio::test]
    async fn session_context_is_stamped_on_every_event() {
        let store = quest_store(StreamIdentity::AsString);
        let session = store.session_with(
            SessionContext::new()
                .with_correlation_id("corr-9")
                .with_header("user", "moiraine"),
        );
        let handle = session
            .start_stream(Some("quest-1".into()), [joined(&["Rand"]), joined(&["Mat"])])
            .await
            .unwrap();

        for event in store.fetch_stream(&handle.id).await.unwrap() {
            assert_eq!(event.metadata["correlation_id"].as_str(), Some("corr-9"));
            assert_eq!(event.metadata["user"].as_str(), Some("moiraine"));
        }
    }
}
