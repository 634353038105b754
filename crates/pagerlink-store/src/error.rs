//! Error types for the pagerlink-store crate.
//!
//! All storage operations return [`StoreError`] via [`StoreResult`].

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// The requested record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// An insert or update hit a uniqueness constraint.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// An invalid argument was provided to a store operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),

    /// Cache operation failed.
    #[error("cache error: {0}")]
    Cache(String),
}

impl StoreError {
    /// Whether this error is a uniqueness violation.
    ///
    /// Callers that treat a duplicate insert as already satisfied match on
    /// this instead of the variant.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }

    /// Translate a rusqlite error, turning UNIQUE / PRIMARY KEY failures into
    /// [`StoreError::UniqueViolation`].
    ///
    /// SQLite reports the offending columns (`UNIQUE constraint failed:
    /// t.a, t.b`) rather than the constraint name, so the message is kept
    /// verbatim and `constraint` falls back to it when no name is known.
    pub(crate) fn from_insert(err: rusqlite::Error, constraint: &str) -> Self {
        if let rusqlite::Error::SqliteFailure(ref inner, ref message) = err
            && matches!(
                inner.extended_code,
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            )
        {
            let constraint = if constraint.is_empty() {
                message.clone().unwrap_or_default()
            } else {
                constraint.to_string()
            };
            return Self::UniqueViolation { constraint };
        }
        Self::Sqlite(err)
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
