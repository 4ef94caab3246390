use async_trait::async_trait;
use thiserror::Error;
use tracing::error;

use crate::messaging::{MessageEnvelope, MessagingError};
use crate::saga::EngineError;

/// How a handler failed; decides between redelivery and dead-lettering
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// Redelivered according to the retry policy
    #[error("Transient handler failure: {message}")]
    Transient { message: String },

    /// Dead-lettered immediately
    #[error("Permanent handler failure: {message}")]
    Permanent { message: String },
}

impl HandlerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl From<EngineError> for HandlerError {
    fn from(error: EngineError) -> Self {
        if error.is_transient() {
            Self::transient(error.to_string())
        } else {
            Self::permanent(error.to_string())
        }
    }
}

impl From<MessagingError> for HandlerError {
    fn from(error: MessagingError) -> Self {
        if error.is_transient() {
            Self::transient(error.to_string())
        } else {
            Self::permanent(error.to_string())
        }
    }
}

/// Consumer of one subscription's envelopes
///
/// Handlers must be idempotent: delivery is at-least-once.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn handle(&self, envelope: &MessageEnvelope) -> Result<(), HandlerError>;

    /// Called once the envelope has been dead-lettered
    async fn on_retries_exhausted(&self, envelope: &MessageEnvelope, error: &HandlerError) {
        error!(
            correlation_id = %envelope.correlation_id,
            handler = self.name(),
            message_type = %envelope.message_type,
            delivery_attempt = envelope.delivery_attempt,
            error = %error,
            "Message dead-lettered"
        );
    }
}
