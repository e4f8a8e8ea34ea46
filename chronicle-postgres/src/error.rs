/// Error type for `PostgreSQL` storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Query execution or transaction failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Negative version or sequence read from the database.
    #[error("invalid version value from database: {0}")]
    InvalidVersion(i64),
    /// Version or sequence too large for a `BIGINT` column.
    #[error("version {0} does not fit in a BIGINT column")]
    VersionOverflow(u64),
    #[error("invalid schema name `{0}`")]
    InvalidSchemaName(String),
}

pub(crate) fn to_db(value: u64) -> Result<i64, Error> {
    i64::try_from(value).map_err(|_| Error::VersionOverflow(value))
}

pub(crate) fn from_db(value: i64) -> Result<u64, Error> {
    u64::try_from(value).map_err(|_| Error::InvalidVersion(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_round_trip_within_bigint_range() {
        assert_eq!(from_db(to_db(42).unwrap()).unwrap(), 42);
    }

    #[test]
    fn oversized_version_is_rejected() {
        assert!(matches!(to_db(u64::MAX), Err(Error::VersionOverflow(u64::MAX))));
    }

    #[test]
    fn negative_version_is_rejected() {
        assert!(matches!(from_db(-1), Err(Error::InvalidVersion(-1))));
    }
}
