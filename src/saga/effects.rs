//! # Saga Effects
//!
//! External side effects recorded by activities. They are persisted in the
//! instance's outbox together with the state change and executed only after
//! the unit of work commits.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::errors::EngineError;
use crate::collaborators::TargetStatusSink;
use crate::messaging::{MessageEnvelope, MessagePublisher};

/// Status of the business entity a workflow runs for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Validated,
    ValidationFailed,
    Ingested,
    Rejected,
    Generated,
    GenerationFailed,
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validated => "validated",
            Self::ValidationFailed => "validation_failed",
            Self::Ingested => "ingested",
            Self::Rejected => "rejected",
            Self::Generated => "generated",
            Self::GenerationFailed => "generation_failed",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SagaEffect {
    Publish {
        envelope: MessageEnvelope,
    },
    UpdateTargetStatus {
        target_id: Uuid,
        status: TargetStatus,
        detail: Option<String>,
    },
}

impl SagaEffect {
    pub fn describe(&self) -> String {
        match self {
            Self::Publish { envelope } => format!("publish {}", envelope.message_type),
            Self::UpdateTargetStatus {
                target_id, status, ..
            } => format!("mark {target_id} {status}"),
        }
    }
}

/// Executes committed effects against the transport and the status sink
#[derive(Clone)]
pub struct EffectExecutor {
    publisher: MessagePublisher,
    status_sink: Arc<dyn TargetStatusSink>,
}

impl fmt::Debug for EffectExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectExecutor")
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}

impl EffectExecutor {
    pub fn new(publisher: MessagePublisher, status_sink: Arc<dyn TargetStatusSink>) -> Self {
        Self {
            publisher,
            status_sink,
        }
    }

    pub fn publisher(&self) -> &MessagePublisher {
        &self.publisher
    }

    pub async fn execute(&self, correlation_id: Uuid, effect: &SagaEffect) -> Result<(), EngineError> {
        debug!(
            correlation_id = %correlation_id,
            effect = %effect.describe(),
            "Executing saga effect"
        );
        match effect {
            SagaEffect::Publish { envelope } => {
                self.publisher.publish(envelope).await?;
            }
            SagaEffect::UpdateTargetStatus {
                target_id,
                status,
                detail,
            } => {
                self.status_sink
                    .update_status(correlation_id, *target_id, *status, detail.as_deref())
                    .await?;
            }
        }
        Ok(())
    }

    /// Execute in order; stops at the first failure
    pub async fn execute_all(
        &self,
        correlation_id: Uuid,
        effects: &[SagaEffect],
    ) -> Result<(), EngineError> {
        for effect in effects {
            self.execute(correlation_id, effect).await?;
        }
        Ok(())
    }
}
