//! Unified error type for the data layer

use thiserror::Error;

/// Unified error type for data layer operations
#[derive(Error, Debug)]
pub enum DataError {
    /// SQLite database error
    #[error("SQLite error: {0}")]
    Sqlite(sqlx::Error),

    /// Migration failed
    #[error("Migration {version} ({name}) failed: {error}")]
    MigrationFailed {
        version: i32,
        name: String,
        error: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Query timeout
    #[error("Query timeout after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Connection pool exhausted
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Conflict error (e.g. duplicate entry, stale update)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Requested entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not implemented for this backend
    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

impl DataError {
    pub fn timeout(timeout_secs: u64) -> Self {
        Self::Timeout { timeout_secs }
    }

    /// Whether the operation is worth retrying via the WAL/Retry path (§7 `TransientStoreError`).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::PoolExhausted => true,
            Self::Sqlite(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            _ => false,
        }
    }
}

impl From<crate::data::sqlite::SqliteError> for DataError {
    fn from(e: crate::data::sqlite::SqliteError) -> Self {
        match e {
            crate::data::sqlite::SqliteError::Database(e) => Self::Sqlite(e),
            crate::data::sqlite::SqliteError::MigrationFailed {
                version,
                name,
                error,
            } => Self::MigrationFailed {
                version,
                name,
                error,
            },
            crate::data::sqlite::SqliteError::Io(e) => Self::Io(e),
            crate::data::sqlite::SqliteError::Conflict(msg) => Self::Conflict(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_failed_error_display() {
        let err = DataError::MigrationFailed {
            version: 2,
            name: "add_conversations_table".into(),
            error: "syntax error".into(),
        };
        assert_eq!(
            err.to_string(),
            "Migration 2 (add_conversations_table) failed: syntax error"
        );
    }

    #[test]
    fn test_timeout_error_display() {
        let err = DataError::timeout(5);
        assert_eq!(err.to_string(), "Query timeout after 5s");
    }

    #[test]
    fn test_is_transient() {
        assert!(DataError::timeout(5).is_transient());
        assert!(DataError::PoolExhausted.is_transient());
        assert!(!DataError::Config("bad config".into()).is_transient());
        assert!(!DataError::NotFound("m1".into()).is_transient());
    }
}
