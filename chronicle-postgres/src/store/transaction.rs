use std::sync::Arc;

use chronicle_core::{
    concurrency::VersionCheck,
    identity::StreamId,
    storage::{CommitError, EventRow, SnapshotRow, StorageTransaction, StreamState},
};
use nonempty::NonEmpty;
use sqlx::{Postgres, QueryBuilder};

use super::{decode_snapshot, decode_state, statements::Statements};
use crate::{
    Error,
    error::{from_db, to_db},
};

/// An open read-write transaction against a [`Store`](super::Store).
///
/// Dropping it without committing rolls back.
pub struct Transaction {
    tx: sqlx::Transaction<'static, Postgres>,
    statements: Arc<Statements>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("schema", &self.statements.schema())
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(super) const fn new(
        tx: sqlx::Transaction<'static, Postgres>,
        statements: Arc<Statements>,
    ) -> Self {
        Self { tx, statements }
    }
}

impl StorageTransaction for Transaction {
    type Error = Error;

    async fn lock_stream<'a>(
        &'a mut self,
        stream_id: &'a StreamId,
    ) -> Result<Option<StreamState>, Error> {
        sqlx::query(self.statements.lock_stream())
            .bind(stream_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await?
            .map(|row| decode_state(stream_id, &row))
            .transpose()
    }

    async fn insert_stream<'a>(&'a mut self, stream: &'a StreamState) -> Result<bool, Error> {
        let result = sqlx::query(self.statements.insert_stream())
            .bind(stream.id.to_string())
            .bind(to_db(stream.version)?)
            .bind(stream.aggregate_type.as_deref())
            .bind(stream.created_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip_all, fields(event_count = rows.len()))]
    async fn insert_events<'a>(&'a mut self, rows: &'a NonEmpty<EventRow>) -> Result<(), Error> {
        let sequences = rows
            .iter()
            .map(|row| to_db(row.sequence))
            .collect::<Result<Vec<_>, _>>()?;
        let id_type = self.statements.id_type();

        let mut qb = QueryBuilder::<Postgres>::new(self.statements.insert_events());
        qb.push_values(rows.iter().zip(sequences), |mut b, (row, sequence)| {
            b.push("CAST(")
                .push_bind_unseparated(row.stream_id.to_string())
                .push_unseparated(format!(" AS {id_type})"));
            b.push_bind(sequence);
            b.push_bind(row.kind.clone());
            b.push_bind(sqlx::types::Json(row.data.clone()));
            b.push_bind(sqlx::types::Json(row.metadata.clone()));
            b.push_bind(row.timestamp);
        });
        qb.build().execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn advance_version<'a>(
        &'a mut self,
        stream_id: &'a StreamId,
        expected: u64,
        new_version: u64,
    ) -> Result<VersionCheck, Error> {
        let result = sqlx::query(self.statements.advance_version())
            .bind(stream_id.to_string())
            .bind(to_db(expected)?)
            .bind(to_db(new_version)?)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 1 {
            return Ok(VersionCheck::Advanced);
        }

        let actual: Option<i64> = sqlx::query_scalar(self.statements.select_version())
            .bind(stream_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await?;
        let actual = actual.map(from_db).transpose()?.unwrap_or(0);
        tracing::debug!(expected, actual, "conditional version update missed");
        Ok(VersionCheck::Stale { actual })
    }

    async fn load_snapshot<'a>(
        &'a mut self,
        stream_id: &'a StreamId,
    ) -> Result<Option<SnapshotRow>, Error> {
        sqlx::query(self.statements.select_snapshot())
            .bind(stream_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await?
            .map(|row| decode_snapshot(stream_id, &row))
            .transpose()
    }

    async fn upsert_snapshot<'a>(&'a mut self, snapshot: &'a SnapshotRow) -> Result<(), Error> {
        sqlx::query(self.statements.upsert_snapshot())
            .bind(snapshot.stream_id.to_string())
            .bind(&snapshot.aggregate_type)
            .bind(to_db(snapshot.version)?)
            .bind(sqlx::types::Json(&snapshot.state))
            .execute(&mut *self.tx)
            .await?;
        tracing::trace!(version = snapshot.version, "snapshot upserted");
        Ok(())
    }

    async fn commit(self) -> Result<(), CommitError<Error>> {
        self.tx
            .commit()
            .await
            .map_err(|e| CommitError::Store(Error::Database(e)))
    }

    async fn rollback(self) -> Result<(), Error> {
        self.tx.rollback().await?;
        Ok(())
    }
}
