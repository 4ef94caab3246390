//! # Validation Pipeline
//!
//! Dynamic-step pipeline. The steps come from the document process's
//! configured validation pipeline and run strictly one at a time; the first
//! failed step stops the run.
//!
//! ```text
//! Initial --Start--> LoadingSteps --StepsLoaded--> ExecutingStep --StepCompleted--> ExecutingStep
//!                         |   \                         |    \
//!                         |    StepsLoaded([])          |     StepCompleted (last) --> Completed
//!                         |         \--> Completed      |
//!                         StepsLoadFailed --> Failed    StepFailed --> Failed
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::resolver::{ResolutionContext, StepPipelineResolver};
use super::step::StepStatus;
use crate::constants::{message_types, saga_types};
use crate::messaging::messages::{
    ExecuteValidationStep, StartValidationPipeline, ValidationPipelineCompleted,
    ValidationPipelineFailed, ValidationStepCompleted, ValidationStepFailed,
    ValidationStepsLoadFailed, ValidationStepsLoaded,
};
use crate::messaging::{MessageEnvelope, MessagingError};
use crate::saga::{
    activity, Activity, ActivityContext, ActivityError, Branch, InstanceOf, SagaDefinition,
    SagaEvent, SagaState, TargetStatus, Transition, TransitionTable,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationState {
    Initial,
    LoadingSteps,
    ExecutingStep,
    Completed,
    Failed,
}

impl SagaState for ValidationState {
    fn initial() -> Self {
        Self::Initial
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::LoadingSteps => "loading_steps",
            Self::ExecutingStep => "executing_step",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "initial" => Some(Self::Initial),
            "loading_steps" => Some(Self::LoadingSteps),
            "executing_step" => Some(Self::ExecutingStep),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationEvent {
    Start(StartValidationPipeline),
    StepsLoaded(ValidationStepsLoaded),
    StepsLoadFailed(ValidationStepsLoadFailed),
    StepCompleted(ValidationStepCompleted),
    StepFailed(ValidationStepFailed),
}

impl SagaEvent for ValidationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Start(_) => message_types::START_VALIDATION_PIPELINE,
            Self::StepsLoaded(_) => message_types::VALIDATION_STEPS_LOADED,
            Self::StepsLoadFailed(_) => message_types::VALIDATION_STEPS_LOAD_FAILED,
            Self::StepCompleted(_) => message_types::VALIDATION_STEP_COMPLETED,
            Self::StepFailed(_) => message_types::VALIDATION_STEP_FAILED,
        }
    }

    fn correlation_id(&self) -> Uuid {
        match self {
            Self::Start(m) => m.correlation_id,
            Self::StepsLoaded(m) => m.correlation_id,
            Self::StepsLoadFailed(m) => m.correlation_id,
            Self::StepCompleted(m) => m.correlation_id,
            Self::StepFailed(m) => m.correlation_id,
        }
    }

    fn from_envelope(envelope: &MessageEnvelope) -> Result<Option<Self>, MessagingError> {
        let event = match envelope.message_type.as_str() {
            message_types::START_VALIDATION_PIPELINE => Self::Start(envelope.decode()?),
            message_types::VALIDATION_STEPS_LOADED => Self::StepsLoaded(envelope.decode()?),
            message_types::VALIDATION_STEPS_LOAD_FAILED => {
                Self::StepsLoadFailed(envelope.decode()?)
            }
            message_types::VALIDATION_STEP_COMPLETED => Self::StepCompleted(envelope.decode()?),
            message_types::VALIDATION_STEP_FAILED => Self::StepFailed(envelope.decode()?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationPayload {
    pub generated_document_id: Option<Uuid>,
    pub document_process_name: Option<String>,
}

pub struct ValidationSaga {
    resolver: Arc<dyn StepPipelineResolver>,
}

impl ValidationSaga {
    pub fn new(resolver: Arc<dyn StepPipelineResolver>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &Arc<dyn StepPipelineResolver> {
        &self.resolver
    }
}

type Ctx<'a> = ActivityContext<'a, ValidationSaga>;
type Instance = InstanceOf<ValidationSaga>;

impl SagaDefinition for ValidationSaga {
    type State = ValidationState;
    type Event = ValidationEvent;
    type Payload = ValidationPayload;

    const SAGA_TYPE: &'static str = saga_types::VALIDATION;

    fn transitions(&self) -> TransitionTable<Self> {
        use ValidationState::*;

        let resolve: Arc<dyn Activity<Self>> = Arc::new(ResolveSteps {
            resolver: self.resolver.clone(),
        });

        TransitionTable::new()
            .on(
                Initial,
                message_types::START_VALIDATION_PIPELINE,
                Transition::to(LoadingSteps)
                    .with_activity(activity("record_start", record_start))
                    .with_activity(resolve),
            )
            .on(
                LoadingSteps,
                message_types::VALIDATION_STEPS_LOADED,
                Transition::branching(vec![
                    Branch::when("has_steps", has_current_step, ExecutingStep)
                        .with_activity(activity("dispatch_current_step", dispatch_current_step)),
                    Branch::otherwise(Completed)
                        .with_activity(activity("finalize_completed", finalize_completed)),
                ])
                .with_activity(activity("store_steps", store_steps)),
            )
            .on(
                LoadingSteps,
                message_types::VALIDATION_STEPS_LOAD_FAILED,
                Transition::to(Failed)
                    .with_activity(activity("record_load_failure", record_load_failure))
                    .with_activity(activity("finalize_failed", finalize_failed)),
            )
            .on(
                ExecutingStep,
                message_types::VALIDATION_STEP_COMPLETED,
                Transition::branching(vec![
                    Branch::when("steps_remaining", has_current_step, ExecutingStep)
                        .with_activity(activity("dispatch_current_step", dispatch_current_step)),
                    Branch::otherwise(Completed)
                        .with_activity(activity("finalize_completed", finalize_completed)),
                ])
                .guarded("event_matches_current_step", event_matches_current_step)
                .with_activity(activity("complete_current_step", complete_current_step)),
            )
            .on(
                ExecutingStep,
                message_types::VALIDATION_STEP_FAILED,
                Transition::to(Failed)
                    .guarded("event_matches_current_step", event_matches_current_step)
                    .with_activity(activity("record_step_failure", record_step_failure))
                    .with_activity(activity("finalize_failed", finalize_failed)),
            )
    }
}

fn has_current_step(instance: &Instance) -> bool {
    instance.has_current_step()
}

/// Stale or duplicate step results are ignored
fn event_matches_current_step(instance: &Instance, event: &ValidationEvent) -> bool {
    let (step_id, step_index) = match event {
        ValidationEvent::StepCompleted(m) => (m.step_id, m.step_index),
        ValidationEvent::StepFailed(m) => (m.step_id, m.step_index),
        _ => return false,
    };
    step_index == instance.current_step_index
        && instance
            .current_step()
            .is_some_and(|step| step.step_id == step_id)
}

fn record_start(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let ValidationEvent::Start(start) = ctx.event else {
        return Err(ActivityError::invalid_state("record_start expects a start event"));
    };
    ctx.instance.payload = ValidationPayload {
        generated_document_id: start.generated_document_id,
        document_process_name: start.document_process_name.clone(),
    };
    ctx.instance.current_step_index = -1;
    Ok(())
}

/// Resolve the step list and report it back as an event
struct ResolveSteps {
    resolver: Arc<dyn StepPipelineResolver>,
}

#[async_trait]
impl Activity<ValidationSaga> for ResolveSteps {
    fn name(&self) -> &'static str {
        "resolve_steps"
    }

    async fn execute(&self, ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
        let context = ResolutionContext {
            correlation_id: ctx.correlation_id(),
            target_id: ctx.instance.payload.generated_document_id,
            document_process_name: ctx.instance.payload.document_process_name.clone(),
        };

        match self.resolver.load_steps(&context).await {
            Ok(steps) => ctx.publish(&ValidationStepsLoaded {
                correlation_id: context.correlation_id,
                steps,
            }),
            Err(e) if e.is_permanent() => ctx.publish(&ValidationStepsLoadFailed {
                correlation_id: context.correlation_id,
                reason: e.to_string(),
            }),
            Err(e) => Err(ActivityError::transient(self.name(), e.to_string())),
        }
    }
}

fn store_steps(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let ValidationEvent::StepsLoaded(loaded) = ctx.event else {
        return Err(ActivityError::invalid_state("store_steps expects StepsLoaded"));
    };
    ctx.instance.load_steps(loaded.steps.clone())
}

fn dispatch_current_step(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let generated_document_id = ctx
        .instance
        .payload
        .generated_document_id
        .ok_or_else(|| ActivityError::invalid_state("validation run has no generated document"))?;
    let step = ctx
        .instance
        .current_step()
        .cloned()
        .ok_or_else(|| ActivityError::invalid_state("no current step to dispatch"))?;

    ctx.instance.set_current_step_status(StepStatus::Running)?;
    let command = ExecuteValidationStep {
        correlation_id: ctx.correlation_id(),
        generated_document_id,
        document_process_name: ctx.instance.payload.document_process_name.clone(),
        step,
        step_index: ctx.instance.current_step_index,
    };
    ctx.publish(&command)
}

fn complete_current_step(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    ctx.instance.set_current_step_status(StepStatus::Completed)?;
    ctx.instance.advance();
    Ok(())
}

fn record_load_failure(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let reason = match ctx.event {
        ValidationEvent::StepsLoadFailed(m) => m.reason.clone(),
        _ => "step resolution failed".to_string(),
    };
    ctx.fail(reason);
    Ok(())
}

fn record_step_failure(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let reason = match ctx.event {
        ValidationEvent::StepFailed(m) => m.reason.clone(),
        _ => "step failed".to_string(),
    };
    let execution_type = ctx
        .instance
        .current_step()
        .map(|s| s.execution_type.to_string())
        .unwrap_or_default();
    ctx.instance.set_current_step_status(StepStatus::Failed)?;
    ctx.fail(format!("step {execution_type} failed: {reason}"));
    Ok(())
}

fn finalize_completed(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let generated_document_id = ctx.instance.payload.generated_document_id;
    ctx.publish(&ValidationPipelineCompleted {
        correlation_id: ctx.correlation_id(),
        generated_document_id,
        steps_executed: ctx.instance.ordered_steps.len(),
    })?;
    if let Some(target_id) = generated_document_id {
        ctx.update_target_status(target_id, TargetStatus::Validated, None);
    }
    Ok(())
}

fn finalize_failed(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let generated_document_id = ctx.instance.payload.generated_document_id;
    let (failed_stage, reason) = ctx
        .instance
        .failure
        .as_ref()
        .map(|f| (f.stage.clone(), f.reason.clone()))
        .unwrap_or_else(|| (ctx.state_name().to_string(), "unknown".to_string()));

    ctx.publish(&ValidationPipelineFailed {
        correlation_id: ctx.correlation_id(),
        generated_document_id,
        failed_stage,
        reason: reason.clone(),
    })?;
    if let Some(target_id) = generated_document_id {
        ctx.update_target_status(target_id, TargetStatus::ValidationFailed, Some(reason));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FixedStepResolver;

    fn saga() -> ValidationSaga {
        ValidationSaga::new(Arc::new(FixedStepResolver::new(["schema_check"])))
    }

    #[test]
    fn test_table_shape() {
        let table = saga().transitions();
        assert_eq!(table.len(), 5);
        assert!(table.terminal_states_absorb());
        assert!(table.contains(
            ValidationState::Initial,
            message_types::START_VALIDATION_PIPELINE
        ));
        assert!(!table.contains(
            ValidationState::Initial,
            message_types::VALIDATION_STEP_COMPLETED
        ));
        assert_eq!(
            table.event_types().into_iter().collect::<Vec<_>>(),
            vec![
                message_types::START_VALIDATION_PIPELINE,
                message_types::VALIDATION_STEP_COMPLETED,
                message_types::VALIDATION_STEP_FAILED,
                message_types::VALIDATION_STEPS_LOAD_FAILED,
                message_types::VALIDATION_STEPS_LOADED,
            ]
        );
    }

    #[test]
    fn test_state_names_round_trip() {
        for state in [
            ValidationState::Initial,
            ValidationState::LoadingSteps,
            ValidationState::ExecutingStep,
            ValidationState::Completed,
            ValidationState::Failed,
        ] {
            assert_eq!(ValidationState::from_name(state.as_str()), Some(state));
        }
    }

    #[test]
    fn test_from_envelope_skips_foreign_messages() {
        let envelope = MessageEnvelope::from_parts(
            message_types::PLUGIN_UPDATE,
            Uuid::new_v4(),
            serde_json::json!({}),
        );
        assert_eq!(ValidationEvent::from_envelope(&envelope).unwrap(), None);
    }

    #[test]
    fn test_stale_step_result_fails_guard() {
        let mut instance = Instance::new(Uuid::new_v4());
        instance
            .load_steps(FixedStepResolver::new(["a", "b"]).steps())
            .unwrap();
        let current = instance.current_step().unwrap().step_id;

        let matching = ValidationEvent::StepCompleted(ValidationStepCompleted {
            correlation_id: instance.correlation_id,
            step_id: current,
            step_index: 0,
        });
        let stale = ValidationEvent::StepCompleted(ValidationStepCompleted {
            correlation_id: instance.correlation_id,
            step_id: current,
            step_index: 1,
        });
        assert!(event_matches_current_step(&instance, &matching));
        assert!(!event_matches_current_step(&instance, &stale));
    }
}
