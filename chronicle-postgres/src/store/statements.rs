//! SQL text for one schema and identity kind.
//!
//! Stream ids are always bound as text and cast to the column type in SQL,
//! so one set of bind calls serves both `UUID` and `TEXT` id columns.

use chronicle_core::identity::StreamIdentity;

use crate::Error;

pub(super) const DEFAULT_SCHEMA: &str = "public";

const MAX_IDENTIFIER_LEN: usize = 63;

pub(super) fn validate_schema(schema: &str) -> Result<(), Error> {
    let mut chars = schema.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid_start && valid_rest && schema.len() <= MAX_IDENTIFIER_LEN {
        Ok(())
    } else {
        Err(Error::InvalidSchemaName(schema.to_owned()))
    }
}

#[derive(Debug)]
pub(crate) struct Statements {
    schema: String,
    id_type: &'static str,
    migrations: Vec<String>,
    select_stream: String,
    lock_stream: String,
    insert_stream: String,
    insert_events: String,
    advance_version: String,
    select_version: String,
    select_events: String,
    select_snapshot: String,
    upsert_snapshot: String,
}

impl Statements {
    pub(super) fn new(schema: &str, identity: StreamIdentity) -> Self {
        let id_type = match identity {
            StreamIdentity::AsUuid => "UUID",
            StreamIdentity::AsString => "TEXT",
        };
        let streams = format!(r#""{schema}".es_streams"#);
        let events = format!(r#""{schema}".es_events"#);
        let snapshots = format!(r#""{schema}".es_snapshots"#);
        let id = format!("CAST($1 AS {id_type})");

        let migrations = vec![
            format!(r#"CREATE SCHEMA IF NOT EXISTS "{schema}""#),
            format!(
                r"
                CREATE TABLE IF NOT EXISTS {streams} (
                    stream_id      {id_type} PRIMARY KEY,
                    version        BIGINT NOT NULL,
                    aggregate_type TEXT NULL,
                    created_at     TIMESTAMPTZ NOT NULL
                )
                "
            ),
            format!(
                r"
                CREATE TABLE IF NOT EXISTS {events} (
                    stream_id  {id_type} NOT NULL REFERENCES {streams} (stream_id),
                    sequence   BIGINT NOT NULL,
                    kind       TEXT NOT NULL,
                    data       JSONB NOT NULL,
                    metadata   JSONB NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    PRIMARY KEY (stream_id, sequence)
                )
                "
            ),
            format!(
                r"
                CREATE TABLE IF NOT EXISTS {snapshots} (
                    stream_id      {id_type} PRIMARY KEY REFERENCES {streams} (stream_id),
                    aggregate_type TEXT NOT NULL,
                    version        BIGINT NOT NULL,
                    state          JSONB NOT NULL
                )
                "
            ),
        ];

        let select_stream = format!(
            "SELECT version, aggregate_type, created_at FROM {streams} WHERE stream_id = {id}"
        );

        Self {
            schema: schema.to_owned(),
            id_type,
            migrations,
            lock_stream: format!("{select_stream} FOR UPDATE"),
            select_stream,
            insert_stream: format!(
                "INSERT INTO {streams} (stream_id, version, aggregate_type, created_at) \
                 VALUES ({id}, $2, $3, $4) ON CONFLICT (stream_id) DO NOTHING"
            ),
            insert_events: format!(
                "INSERT INTO {events} (stream_id, sequence, kind, data, metadata, created_at) "
            ),
            advance_version: format!(
                "UPDATE {streams} SET version = $3 WHERE stream_id = {id} AND version = $2"
            ),
            select_version: format!("SELECT version FROM {streams} WHERE stream_id = {id}"),
            select_events: format!(
                "SELECT sequence, kind, data, metadata, created_at FROM {events} \
                 WHERE stream_id = {id} AND sequence >= $2 ORDER BY sequence ASC"
            ),
            select_snapshot: format!(
                "SELECT aggregate_type, version, state FROM {snapshots} WHERE stream_id = {id}"
            ),
            upsert_snapshot: format!(
                "INSERT INTO {snapshots} (stream_id, aggregate_type, version, state) \
                 VALUES ({id}, $2, $3, $4) \
                 ON CONFLICT (stream_id) DO UPDATE SET \
                 aggregate_type = EXCLUDED.aggregate_type, \
                 version = EXCLUDED.version, \
                 state = EXCLUDED.state"
            ),
        }
    }

    pub(crate) fn schema(&self) -> &str {
        &self.schema
    }

    /// Column type of stream ids, used to cast bound text.
    pub(crate) const fn id_type(&self) -> &'static str {
        self.id_type
    }

    pub(crate) fn migrations(&self) -> impl Iterator<Item = &str> {
        self.migrations.iter().map(String::as_str)
    }

    pub(crate) fn select_stream(&self) -> &str {
        &self.select_stream
    }

    pub(crate) fn lock_stream(&self) -> &str {
        &self.lock_stream
    }

    pub(crate) fn insert_stream(&self) -> &str {
        &self.insert_stream
    }

    pub(crate) fn insert_events(&self) -> &str {
        &self.insert_events
    }

    pub(crate) fn advance_version(&self) -> &str {
        &self.advance_version
    }

    pub(crate) fn select_version(&self) -> &str {
        &self.select_version
    }

    pub(crate) fn select_events(&self) -> &str {
        &self.select_events
    }

    pub(crate) fn select_snapshot(&self) -> &str {
        &self.select_snapshot
    }

    pub(crate) fn upsert_snapshot(&self) -> &str {
        &self.upsert_snapshot
    }
}
