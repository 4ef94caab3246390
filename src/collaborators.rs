//! # External Collaborators
//!
//! Narrow traits for the systems the core coordinates but does not own:
//! step execution engines, the store of business entities whose status a
//! workflow updates, and the source of per-process validation pipelines.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::pipeline::{ExecutionType, StepDefinition};
use crate::saga::TargetStatus;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The collaborator could not be reached; retrying may succeed
    #[error("{collaborator} unavailable: {message}")]
    Unavailable {
        collaborator: String,
        message: String,
    },

    #[error("{collaborator} rejected the request: {message}")]
    Rejected {
        collaborator: String,
        message: String,
    },
}

impl CollaboratorError {
    pub fn unavailable(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }

    pub fn rejected(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Everything a step executor needs to run one step
#[derive(Debug, Clone, PartialEq)]
pub struct StepRequest {
    pub correlation_id: Uuid,
    pub target_id: Uuid,
    pub document_process_name: Option<String>,
    pub step: StepDefinition,
    pub step_index: i32,
}

/// Business result of a step; infrastructure failures are `Err` instead
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Failed { reason: String },
}

/// Runs one kind of validation step
#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn execution_type(&self) -> ExecutionType;

    /// `Err` is treated as transient and retried by the dispatcher
    async fn execute(&self, request: &StepRequest) -> Result<StepOutcome, CollaboratorError>;
}

/// Marks the business entity a workflow ran for
#[async_trait]
pub trait TargetStatusSink: Send + Sync {
    async fn update_status(
        &self,
        correlation_id: Uuid,
        target_id: Uuid,
        status: TargetStatus,
        detail: Option<&str>,
    ) -> Result<(), CollaboratorError>;
}

/// Sink that only logs; used when no entity store is wired in
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingStatusSink;

#[async_trait]
impl TargetStatusSink for LoggingStatusSink {
    async fn update_status(
        &self,
        correlation_id: Uuid,
        target_id: Uuid,
        status: TargetStatus,
        detail: Option<&str>,
    ) -> Result<(), CollaboratorError> {
        info!(
            correlation_id = %correlation_id,
            target_id = %target_id,
            status = %status,
            detail = detail,
            "🎯 Target status updated"
        );
        Ok(())
    }
}

/// One configured step of a validation pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredStep {
    pub execution_type: ExecutionType,
    pub order: i32,
}

/// Source of validation pipelines keyed by document process
#[async_trait]
pub trait PipelineConfigurationSource: Send + Sync {
    /// `Ok(None)` when the process has no pipeline configured
    async fn validation_steps(
        &self,
        document_process_name: &str,
    ) -> Result<Option<Vec<ConfiguredStep>>, CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_logging_sink_accepts_updates() {
        let sink = LoggingStatusSink;
        let result = sink
            .update_status(Uuid::new_v4(), Uuid::new_v4(), TargetStatus::Validated, None)
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_collaborator_error_classification() {
        assert!(CollaboratorError::unavailable("entity-store", "timeout").is_transient());
        assert!(!CollaboratorError::rejected("entity-store", "unknown id").is_transient());
    }
}
