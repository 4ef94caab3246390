use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::collaborators::{CollaboratorError, StepOutcome, StepRequest};
use crate::dispatcher::{HandlerError, MessageHandler};
use crate::messaging::messages::{
    ExecuteValidationStep, ValidationStepCompleted, ValidationStepFailed,
};
use crate::messaging::{MessageEnvelope, MessagePublisher};
use crate::pipeline::StepExecutorRegistry;
use crate::worker::broadcast::PluginRegistry;

/// Runs `ExecuteValidationStep` commands against the local executors and
/// reports exactly one `ValidationStepCompleted` or `ValidationStepFailed`
///
/// Steps whose plugin was stopped on this replica are released for another
/// replica to pick up.
pub struct StepExecutionHandler {
    registry: Arc<StepExecutorRegistry>,
    plugins: Arc<PluginRegistry>,
    publisher: MessagePublisher,
}

impl StepExecutionHandler {
    pub fn new(
        registry: Arc<StepExecutorRegistry>,
        plugins: Arc<PluginRegistry>,
        publisher: MessagePublisher,
    ) -> Self {
        Self {
            registry,
            plugins,
            publisher,
        }
    }

    async fn report_failed(
        &self,
        command: &ExecuteValidationStep,
        reason: String,
    ) -> Result<(), HandlerError> {
        warn!(
            correlation_id = %command.correlation_id,
            execution_type = %command.step.execution_type,
            step_index = command.step_index,
            reason = %reason,
            "Validation step failed"
        );
        self.publisher
            .publish_message(&ValidationStepFailed {
                correlation_id: command.correlation_id,
                step_id: command.step.step_id,
                step_index: command.step_index,
                reason,
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for StepExecutionHandler {
    fn name(&self) -> &'static str {
        "step_execution"
    }

    async fn handle(&self, envelope: &MessageEnvelope) -> Result<(), HandlerError> {
        let command: ExecuteValidationStep = envelope.decode()?;

        if self.plugins.is_stopped(command.step.execution_type.as_str()) {
            return Err(HandlerError::transient(format!(
                "plugin '{}' is stopped on this replica",
                command.step.execution_type
            )));
        }

        let Some(executor) = self.registry.get(&command.step.execution_type) else {
            let reason = format!(
                "no executor registered for execution type '{}'",
                command.step.execution_type
            );
            return self.report_failed(&command, reason).await;
        };

        let request = StepRequest {
            correlation_id: command.correlation_id,
            target_id: command.generated_document_id,
            document_process_name: command.document_process_name.clone(),
            step: command.step.clone(),
            step_index: command.step_index,
        };

        match executor.execute(&request).await {
            Ok(StepOutcome::Completed) => {
                info!(
                    correlation_id = %command.correlation_id,
                    execution_type = %command.step.execution_type,
                    step_index = command.step_index,
                    "✅ Validation step completed"
                );
                self.publisher
                    .publish_message(&ValidationStepCompleted {
                        correlation_id: command.correlation_id,
                        step_id: command.step.step_id,
                        step_index: command.step_index,
                    })
                    .await?;
                Ok(())
            }
            Ok(StepOutcome::Failed { reason }) => self.report_failed(&command, reason).await,
            Err(e @ CollaboratorError::Unavailable { .. }) => {
                Err(HandlerError::transient(e.to_string()))
            }
            Err(e @ CollaboratorError::Rejected { .. }) => {
                self.report_failed(&command, e.to_string()).await
            }
        }
    }

    /// The step never produced a result; fail it so the pipeline stops
    async fn on_retries_exhausted(&self, envelope: &MessageEnvelope, error: &HandlerError) {
        let command: ExecuteValidationStep = match envelope.decode() {
            Ok(command) => command,
            Err(e) => {
                warn!(
                    correlation_id = %envelope.correlation_id,
                    error = %e,
                    "Dead-lettered step command does not decode"
                );
                return;
            }
        };
        let reason = format!(
            "retries exhausted after {} attempts: {}",
            envelope.delivery_attempt, error
        );
        if let Err(e) = self.report_failed(&command, reason).await {
            warn!(
                correlation_id = %command.correlation_id,
                error = %e,
                "Could not report exhausted validation step"
            );
        }
    }
}
