#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Schema creation or migration failed. Fatal — the store is unusable.
    #[error("schema error: {0}")]
    Schema(String),

    /// I/O-level storage failure. The enclosing unit of work was rolled back.
    #[error("storage error: {0}")]
    Storage(String),

    /// A write violated a referential or uniqueness invariant.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// An active session already exists for this external id.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A persisted row failed to decode.
    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Integrity(e.to_string())
            }
            _ => StoreError::Storage(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_violations_map_to_integrity() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT NOT NULL UNIQUE);")
            .unwrap();
        conn.execute("INSERT INTO t (v) VALUES ('a')", []).unwrap();

        let err: StoreError = conn
            .execute("INSERT INTO t (v) VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, StoreError::Integrity(_)), "got: {err:?}");
    }

    #[test]
    fn other_sqlite_errors_map_to_storage() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err: StoreError = conn
            .execute("SELECT * FROM missing_table", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, StoreError::Storage(_)), "got: {err:?}");
    }
}
