//! # Error Types
//!
//! Crate-level error that the binary and bootstrap code surface. Each layer
//! keeps its own `thiserror` enum; this type only aggregates them.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::saga::EngineError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum DocflowError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Saga store error: {0}")]
    Store(#[from] StoreError),

    #[error("Saga engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Worker bootstrap error: {0}")]
    Bootstrap(String),
}

impl DocflowError {
    pub fn bootstrap(message: impl Into<String>) -> Self {
        Self::Bootstrap(message.into())
    }
}

pub type DocflowResult<T> = Result<T, DocflowError>;
