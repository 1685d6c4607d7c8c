//! Error types for the status store.

use thiserror::Error;

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the status store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists for the requested info-hash.
    #[error("download record '{id}' not found")]
    NotFound {
        /// Info-hash that was looked up.
        id: String,
    },
    /// A record with this info-hash already exists.
    #[error("download record '{id}' already exists")]
    Duplicate {
        /// Info-hash of the conflicting record.
        id: String,
    },
    /// Migration execution failed.
    #[error("migration failed")]
    Migration {
        /// Underlying migration error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },
    /// A database operation failed.
    #[error("database operation '{operation}' failed")]
    Query {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying SQL error.
        #[source]
        source: sqlx::Error,
    },
    /// A JSON column could not be encoded or decoded.
    #[error("invalid JSON in column '{column}'")]
    Json {
        /// Column that held the payload.
        column: &'static str,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
    /// A state column held a value outside the known enum range.
    #[error("column '{column}' holds unknown state value {value}")]
    InvalidState {
        /// Column that held the value.
        column: &'static str,
        /// The out-of-range value.
        value: i64,
    },
}
