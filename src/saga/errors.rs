use thiserror::Error;
use uuid::Uuid;

use crate::collaborators::CollaboratorError;
use crate::messaging::MessagingError;
use crate::store::StoreError;

/// Failure raised by an activity while a transition is being applied
///
/// Any activity error aborts the dispatch before anything is saved.
#[derive(Debug, Error)]
pub enum ActivityError {
    /// A dependency was unavailable; redelivering the event may succeed
    #[error("Activity {activity} failed transiently: {message}")]
    Transient { activity: String, message: String },

    /// Redelivering the same event will fail the same way
    #[error("Activity {activity} failed: {message}")]
    Permanent { activity: String, message: String },

    #[error("Saga instance is not in a valid state for this activity: {0}")]
    InvalidState(String),

    #[error("Failed to build message: {0}")]
    Message(#[from] MessagingError),
}

impl ActivityError {
    pub fn transient(activity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            activity: activity.into(),
            message: message.into(),
        }
    }

    pub fn permanent(activity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            activity: activity.into(),
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Activity(#[from] ActivityError),

    #[error(
        "Gave up on {saga_type}/{correlation_id} after {attempts} concurrency conflicts"
    )]
    ConcurrencyRetriesExhausted {
        saga_type: String,
        correlation_id: Uuid,
        attempts: u32,
    },

    #[error("Stored {saga_type}/{correlation_id} cannot be read: {message}")]
    CorruptRecord {
        saga_type: String,
        correlation_id: Uuid,
        message: String,
    },

    #[error("No branch matched leaving {state} on {event_type}")]
    NoBranchMatched {
        state: &'static str,
        event_type: &'static str,
    },

    #[error("Publishing a committed effect failed: {0}")]
    Publish(#[from] MessagingError),

    #[error("Updating target status failed: {0}")]
    TargetStatus(#[from] CollaboratorError),
}

impl EngineError {
    pub fn corrupt_record(
        saga_type: impl Into<String>,
        correlation_id: Uuid,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::CorruptRecord {
            saga_type: saga_type.into(),
            correlation_id,
            message: message.to_string(),
        }
    }

    /// Whether redelivering the triggering message can succeed
    ///
    /// Effect failures count as transient: the effects stay in the
    /// instance's outbox and the next dispatch flushes them.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Activity(e) => e.is_transient(),
            Self::ConcurrencyRetriesExhausted { .. } => true,
            Self::Publish(_) | Self::TargetStatus(_) => true,
            Self::CorruptRecord { .. } | Self::NoBranchMatched { .. } => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
