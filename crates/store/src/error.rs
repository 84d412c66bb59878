//! Error types for the store crate.

/// Errors raised by a [`SqlStore`](crate::SqlStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The startup connection could not be established.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// A statement failed. Carries the driver's message unchanged.
    #[error("{0}")]
    Query(String),

    /// A column value could not be converted to JSON.
    #[error("Failed to decode column '{column}': {message}")]
    Decode { column: String, message: String },
}

impl StoreError {
    /// Wrap a sqlx error raised while executing a statement.
    ///
    /// Database errors keep only the server's message text, so callers see
    /// e.g. `Table 'test.nope' doesn't exist` rather than sqlx's wrapper.
    pub fn from_query(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => StoreError::Query(db.message().to_string()),
            other => StoreError::Query(other.to_string()),
        }
    }

    /// The text forwarded to clients.
    pub fn message(&self) -> String {
        match self {
            StoreError::Query(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}
