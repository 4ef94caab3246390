use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::message_types;
use crate::message_contract;
use crate::pipeline::StepDefinition;

/// Starts a validation run for a generated document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartValidationPipeline {
    pub correlation_id: Uuid,
    pub generated_document_id: Option<Uuid>,
    pub document_process_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStepsLoaded {
    pub correlation_id: Uuid,
    pub steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStepsLoadFailed {
    pub correlation_id: Uuid,
    pub reason: String,
}

/// Command to run one step; handled by whichever replica wins the message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteValidationStep {
    pub correlation_id: Uuid,
    pub generated_document_id: Uuid,
    pub document_process_name: Option<String>,
    pub step: StepDefinition,
    pub step_index: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStepCompleted {
    pub correlation_id: Uuid,
    pub step_id: Uuid,
    pub step_index: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationStepFailed {
    pub correlation_id: Uuid,
    pub step_id: Uuid,
    pub step_index: i32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationPipelineCompleted {
    pub correlation_id: Uuid,
    pub generated_document_id: Option<Uuid>,
    pub steps_executed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationPipelineFailed {
    pub correlation_id: Uuid,
    pub generated_document_id: Option<Uuid>,
    pub failed_stage: String,
    pub reason: String,
}

message_contract!(StartValidationPipeline, message_types::START_VALIDATION_PIPELINE);
message_contract!(ValidationStepsLoaded, message_types::VALIDATION_STEPS_LOADED);
message_contract!(ValidationStepsLoadFailed, message_types::VALIDATION_STEPS_LOAD_FAILED);
message_contract!(ExecuteValidationStep, message_types::EXECUTE_VALIDATION_STEP);
message_contract!(ValidationStepCompleted, message_types::VALIDATION_STEP_COMPLETED);
message_contract!(ValidationStepFailed, message_types::VALIDATION_STEP_FAILED);
message_contract!(ValidationPipelineCompleted, message_types::VALIDATION_PIPELINE_COMPLETED);
message_contract!(ValidationPipelineFailed, message_types::VALIDATION_PIPELINE_FAILED);
