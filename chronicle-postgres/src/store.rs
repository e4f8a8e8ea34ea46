mod statements;
mod transaction;

use std::sync::Arc;

use chronicle_core::{
    identity::{StreamId, StreamIdentity},
    storage::{EventRow, EventStorage, SnapshotRow, StreamSlice, StreamState},
};
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};

use self::statements::Statements;
pub use self::transaction::Transaction;
use crate::{Error, error::from_db};

/// A PostgreSQL-backed [`EventStorage`].
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone, Debug)]
pub struct Store {
    pool: PgPool,
    identity: StreamIdentity,
    statements: Arc<Statements>,
}

impl Store {
    /// Construct a store over the `public` schema.
    #[must_use]
    pub fn new(pool: PgPool, identity: StreamIdentity) -> Self {
        Self {
            pool,
            identity,
            statements: Arc::new(Statements::new(statements::DEFAULT_SCHEMA, identity)),
        }
    }

    /// Construct a store whose tables live in `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSchemaName`] unless `schema` is a plain SQL
    /// identifier (letters, digits and underscores, not starting with a digit).
    pub fn with_schema(
        pool: PgPool,
        identity: StreamIdentity,
        schema: &str,
    ) -> Result<Self, Error> {
        statements::validate_schema(schema)?;
        Ok(Self {
            pool,
            identity,
            statements: Arc::new(Statements::new(schema, identity)),
        })
    }

    #[must_use]
    pub const fn identity(&self) -> StreamIdentity {
        self.identity
    }

    #[must_use]
    pub fn schema(&self) -> &str {
        self.statements.schema()
    }

    /// Apply the schema (idempotent).
    ///
    /// This uses `CREATE ... IF NOT EXISTS` style DDL so it can be run on
    /// startup.
    ///
    /// # Errors
    ///
    /// Returns a `sqlx::Error` if any of the schema creation queries fail.
    #[tracing::instrument(skip(self), fields(schema = self.schema(), identity = %self.identity))]
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        for statement in self.statements.migrations() {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::debug!("schema migrated");
        Ok(())
    }

    async fn read_only(&self) -> Result<sqlx::Transaction<'static, Postgres>, Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

pub(crate) fn decode_state(id: &StreamId, row: &PgRow) -> Result<StreamState, Error> {
    Ok(StreamState {
        id: id.clone(),
        version: from_db(row.try_get("version")?)?,
        aggregate_type: row.try_get("aggregate_type")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn decode_snapshot(id: &StreamId, row: &PgRow) -> Result<SnapshotRow, Error> {
    let state: sqlx::types::Json<serde_json::Value> = row.try_get("state")?;
    Ok(SnapshotRow {
        stream_id: id.clone(),
        aggregate_type: row.try_get("aggregate_type")?,
        version: from_db(row.try_get("version")?)?,
        state: state.0,
    })
}

fn decode_event(id: &StreamId, row: &PgRow) -> Result<EventRow, Error> {
    let data: sqlx::types::Json<serde_json::Value> = row.try_get("data")?;
    let metadata: sqlx::types::Json<serde_json::Value> = row.try_get("metadata")?;
    Ok(EventRow {
        stream_id: id.clone(),
        sequence: from_db(row.try_get("sequence")?)?,
        kind: row.try_get("kind")?,
        data: data.0,
        metadata: metadata.0,
        timestamp: row.try_get("created_at")?,
    })
}

impl EventStorage for Store {
    type Error = Error;
    type Transaction = Transaction;

    async fn begin(&self) -> Result<Transaction, Error> {
        let tx = self.pool.begin().await?;
        Ok(Transaction::new(tx, Arc::clone(&self.statements)))
    }

    #[tracing::instrument(skip(self), fields(stream_id = %stream_id))]
    async fn read_stream<'a>(
        &'a self,
        stream_id: &'a StreamId,
        since: u64,
    ) -> Result<Option<StreamSlice>, Error> {
        let mut tx = self.read_only().await?;

        let Some(row) = sqlx::query(self.statements.select_stream())
            .bind(stream_id.to_string())
            .fetch_optional(&mut *tx)
            .await?
        else {
            tx.commit().await?;
            return Ok(None);
        };
        let state = decode_state(stream_id, &row)?;

        let rows = sqlx::query(self.statements.select_events())
            .bind(stream_id.to_string())
            .bind(i64::try_from(since).unwrap_or(i64::MAX))
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        let events = rows
            .iter()
            .map(|row| decode_event(stream_id, row))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::trace!(event_count = events.len(), "read stream");
        Ok(Some(StreamSlice { state, events }))
    }

    async fn read_stream_state<'a>(
        &'a self,
        stream_id: &'a StreamId,
    ) -> Result<Option<StreamState>, Error> {
        sqlx::query(self.statements.select_stream())
            .bind(stream_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| decode_state(stream_id, &row))
            .transpose()
    }

    async fn read_snapshot<'a>(
        &'a self,
        stream_id: &'a StreamId,
    ) -> Result<Option<SnapshotRow>, Error> {
        sqlx::query(self.statements.select_snapshot())
            .bind(stream_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| decode_snapshot(stream_id, &row))
            .transpose()
    }
}
