use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The stored version no longer matches the version the writer read
    #[error(
        "Concurrency conflict on {saga_type}/{correlation_id}: expected version {expected:?}, found {actual:?}"
    )]
    ConcurrencyConflict {
        saga_type: String,
        correlation_id: Uuid,
        expected: Option<i64>,
        actual: Option<i64>,
    },

    #[error("Saga instance not found: {saga_type}/{correlation_id}")]
    NotFound {
        saga_type: String,
        correlation_id: Uuid,
    },

    #[error("Database error during {operation}: {message}")]
    Database { operation: String, message: String },

    #[error("Saga record serialization failed: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn conflict(
        saga_type: impl Into<String>,
        correlation_id: Uuid,
        expected: Option<i64>,
        actual: Option<i64>,
    ) -> Self {
        Self::ConcurrencyConflict {
            saga_type: saga_type.into(),
            correlation_id,
            expected,
            actual,
        }
    }

    pub fn database(operation: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::Database {
            operation: operation.into(),
            message: error.to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database { .. } | Self::ConcurrencyConflict { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
