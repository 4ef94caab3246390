//! Generation pipeline: create the document record, generate its outline,
//! then fan content generation out into per-node jobs and wait until every
//! node has reported back.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::resolver::FixedStepResolver;
use super::step::StepStatus;
use crate::constants::{message_types, saga_types};
use crate::messaging::messages::{
    ContentNodeGenerated, CreateGeneratedDocument, DocumentOutlineGenerated,
    DocumentOutlineGenerationFailed, GenerateDocumentOutline, GenerateReportContent,
    GeneratedDocumentCreated, GeneratedDocumentCreationFailed, GenerationPipelineCompleted,
    GenerationPipelineFailed, ReportContentGenerationSubmitted, StartDocumentGeneration,
};
use crate::messaging::{MessageContract, MessageEnvelope, MessagingError};
use crate::saga::{
    activity, ActivityContext, ActivityError, Branch, InstanceOf, SagaDefinition, SagaEvent,
    SagaState, TargetStatus, Transition, TransitionTable,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Initial,
    Creating,
    Outlining,
    GeneratingContent,
    Completed,
    Failed,
}

impl SagaState for GenerationState {
    fn initial() -> Self {
        Self::Initial
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Creating => "creating",
            Self::Outlining => "outlining",
            Self::GeneratingContent => "generating_content",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "initial" => Some(Self::Initial),
            "creating" => Some(Self::Creating),
            "outlining" => Some(Self::Outlining),
            "generating_content" => Some(Self::GeneratingContent),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    Start(StartDocumentGeneration),
    Created(GeneratedDocumentCreated),
    CreationFailed(GeneratedDocumentCreationFailed),
    OutlineGenerated(DocumentOutlineGenerated),
    OutlineFailed(DocumentOutlineGenerationFailed),
    ContentSubmitted(ReportContentGenerationSubmitted),
    NodeGenerated(ContentNodeGenerated),
}

impl SagaEvent for GenerationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Start(_) => StartDocumentGeneration::MESSAGE_TYPE,
            Self::Created(_) => GeneratedDocumentCreated::MESSAGE_TYPE,
            Self::CreationFailed(_) => GeneratedDocumentCreationFailed::MESSAGE_TYPE,
            Self::OutlineGenerated(_) => DocumentOutlineGenerated::MESSAGE_TYPE,
            Self::OutlineFailed(_) => DocumentOutlineGenerationFailed::MESSAGE_TYPE,
            Self::ContentSubmitted(_) => ReportContentGenerationSubmitted::MESSAGE_TYPE,
            Self::NodeGenerated(_) => ContentNodeGenerated::MESSAGE_TYPE,
        }
    }

    fn correlation_id(&self) -> Uuid {
        match self {
            Self::Start(m) => m.correlation_id,
            Self::Created(m) => m.correlation_id,
            Self::CreationFailed(m) => m.correlation_id,
            Self::OutlineGenerated(m) => m.correlation_id,
            Self::OutlineFailed(m) => m.correlation_id,
            Self::ContentSubmitted(m) => m.correlation_id,
            Self::NodeGenerated(m) => m.correlation_id,
        }
    }

    fn from_envelope(envelope: &MessageEnvelope) -> Result<Option<Self>, MessagingError> {
        use message_types as t;

        let event = match envelope.message_type.as_str() {
            t::START_DOCUMENT_GENERATION => Self::Start(envelope.decode()?),
            t::GENERATED_DOCUMENT_CREATED => Self::Created(envelope.decode()?),
            t::GENERATED_DOCUMENT_CREATION_FAILED => Self::CreationFailed(envelope.decode()?),
            t::DOCUMENT_OUTLINE_GENERATED => Self::OutlineGenerated(envelope.decode()?),
            t::DOCUMENT_OUTLINE_GENERATION_FAILED => Self::OutlineFailed(envelope.decode()?),
            t::REPORT_CONTENT_GENERATION_SUBMITTED => Self::ContentSubmitted(envelope.decode()?),
            t::CONTENT_NODE_GENERATED => Self::NodeGenerated(envelope.decode()?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationPayload {
    pub document_title: String,
    pub author_oid: String,
    pub document_process_name: String,
    pub metadata_json: Option<serde_json::Value>,
    pub generated_document_id: Option<Uuid>,
    pub metadata_id: Option<Uuid>,
    /// Unknown until content generation reports how many nodes it submitted
    pub submitted_content_nodes: Option<u32>,
    #[serde(default)]
    pub successful_nodes: BTreeSet<Uuid>,
    #[serde(default)]
    pub failed_nodes: BTreeSet<Uuid>,
}

impl GenerationPayload {
    pub fn reported_nodes(&self) -> u32 {
        (self.successful_nodes.len() + self.failed_nodes.len()) as u32
    }

    /// Every submitted node has reported success or failure
    pub fn all_nodes_reported(&self) -> bool {
        self.submitted_content_nodes
            .is_some_and(|submitted| self.reported_nodes() >= submitted)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationSaga;

impl GenerationSaga {
    pub fn new() -> Self {
        Self
    }
}

type Ctx<'a> = ActivityContext<'a, GenerationSaga>;
type Instance = InstanceOf<GenerationSaga>;

impl SagaDefinition for GenerationSaga {
    type State = GenerationState;
    type Event = GenerationEvent;
    type Payload = GenerationPayload;

    const SAGA_TYPE: &'static str = saga_types::GENERATION;

    fn transitions(&self) -> TransitionTable<Self> {
        use message_types as t;
        use GenerationState::*;

        TransitionTable::new()
            .on(
                Initial,
                t::START_DOCUMENT_GENERATION,
                Transition::to(Creating)
                    .with_activity(activity("record_start", record_start))
                    .with_activity(activity("request_create", request_create)),
            )
            .on(
                Creating,
                t::GENERATED_DOCUMENT_CREATED,
                Transition::to(Outlining)
                    .with_activity(activity("record_created", record_created))
                    .with_activity(activity("complete_stage", complete_stage))
                    .with_activity(activity("request_outline", request_outline)),
            )
            .on(Creating, t::GENERATED_DOCUMENT_CREATION_FAILED, stage_failed())
            .on(
                Outlining,
                t::DOCUMENT_OUTLINE_GENERATED,
                Transition::to(GeneratingContent)
                    .with_activity(activity("complete_stage", complete_stage))
                    .with_activity(activity("request_content", request_content)),
            )
            .on(Outlining, t::DOCUMENT_OUTLINE_GENERATION_FAILED, stage_failed())
            .on(
                GeneratingContent,
                t::REPORT_CONTENT_GENERATION_SUBMITTED,
                content_progress()
                    .guarded("node_count_not_recorded", node_count_not_recorded)
                    .with_activity(activity("record_node_count", record_node_count)),
            )
            .on(
                GeneratingContent,
                t::CONTENT_NODE_GENERATED,
                content_progress().with_activity(activity("record_node", record_node)),
            )
    }
}

fn stage_failed() -> Transition<GenerationSaga> {
    Transition::to(GenerationState::Failed)
        .with_activity(activity("record_stage_failure", record_stage_failure))
        .with_activity(activity("finalize_failed", finalize_failed))
}

/// Stay in content generation until every node has reported
fn content_progress() -> Transition<GenerationSaga> {
    Transition::branching(vec![
        Branch::when("content_failed", content_failed, GenerationState::Failed)
            .with_activity(activity("record_content_failure", record_content_failure))
            .with_activity(activity("finalize_failed", finalize_failed)),
        Branch::when("content_complete", content_complete, GenerationState::Completed)
            .with_activity(activity("complete_stage", complete_stage))
            .with_activity(activity("finalize_completed", finalize_completed)),
        Branch::otherwise(GenerationState::GeneratingContent),
    ])
}

fn node_count_not_recorded(instance: &Instance, _event: &GenerationEvent) -> bool {
    instance.payload.submitted_content_nodes.is_none()
}

fn content_failed(instance: &Instance) -> bool {
    instance.payload.all_nodes_reported() && !instance.payload.failed_nodes.is_empty()
}

fn content_complete(instance: &Instance) -> bool {
    instance.payload.all_nodes_reported()
}

fn record_start(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let GenerationEvent::Start(start) = ctx.event else {
        return Err(ActivityError::invalid_state("record_start expects a start event"));
    };
    ctx.instance.payload = GenerationPayload {
        document_title: start.document_title.clone(),
        author_oid: start.author_oid.clone(),
        document_process_name: start.document_process_name.clone(),
        metadata_json: start.metadata_json.clone(),
        ..GenerationPayload::default()
    };
    ctx.instance.load_steps(FixedStepResolver::generation().steps())
}

fn request_create(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    ctx.instance.set_current_step_status(StepStatus::Running)?;
    let payload = &ctx.instance.payload;
    let command = CreateGeneratedDocument {
        correlation_id: ctx.instance.correlation_id,
        document_title: payload.document_title.clone(),
        author_oid: payload.author_oid.clone(),
        document_process_name: payload.document_process_name.clone(),
        metadata_json: payload.metadata_json.clone(),
    };
    ctx.publish(&command)
}

fn record_created(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let GenerationEvent::Created(created) = ctx.event else {
        return Err(ActivityError::invalid_state("record_created expects GeneratedDocumentCreated"));
    };
    ctx.instance.payload.generated_document_id = Some(created.generated_document_id);
    ctx.instance.payload.metadata_id = created.metadata_id;
    Ok(())
}

fn complete_stage(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    ctx.instance.set_current_step_status(StepStatus::Completed)?;
    ctx.instance.advance();
    if ctx.instance.has_current_step() {
        ctx.instance.set_current_step_status(StepStatus::Running)?;
    }
    Ok(())
}

fn generated_document_id(ctx: &Ctx<'_>) -> Result<Uuid, ActivityError> {
    ctx.instance
        .payload
        .generated_document_id
        .ok_or_else(|| ActivityError::invalid_state("generated document id not recorded"))
}

fn request_outline(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let command = GenerateDocumentOutline {
        correlation_id: ctx.correlation_id(),
        generated_document_id: generated_document_id(ctx)?,
        document_process_name: ctx.instance.payload.document_process_name.clone(),
    };
    ctx.publish(&command)
}

fn request_content(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let command = GenerateReportContent {
        correlation_id: ctx.correlation_id(),
        generated_document_id: generated_document_id(ctx)?,
    };
    ctx.publish(&command)
}

fn record_node_count(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let GenerationEvent::ContentSubmitted(submitted) = ctx.event else {
        return Err(ActivityError::invalid_state(
            "record_node_count expects ReportContentGenerationSubmitted",
        ));
    };
    ctx.instance.payload.submitted_content_nodes = Some(submitted.number_of_content_nodes);
    Ok(())
}

/// Node results may be redelivered; a later success replaces an earlier failure
fn record_node(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let GenerationEvent::NodeGenerated(node) = ctx.event else {
        return Err(ActivityError::invalid_state("record_node expects ContentNodeGenerated"));
    };
    let payload = &mut ctx.instance.payload;
    if node.is_successful {
        payload.failed_nodes.remove(&node.content_node_id);
        payload.successful_nodes.insert(node.content_node_id);
    } else if !payload.successful_nodes.contains(&node.content_node_id) {
        payload.failed_nodes.insert(node.content_node_id);
    }
    Ok(())
}

fn record_stage_failure(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let reason = match ctx.event {
        GenerationEvent::CreationFailed(m) => m.reason.clone(),
        GenerationEvent::OutlineFailed(m) => m.reason.clone(),
        _ => "stage failed".to_string(),
    };
    if ctx.instance.has_current_step() {
        ctx.instance.set_current_step_status(StepStatus::Failed)?;
    }
    ctx.fail(reason);
    Ok(())
}

fn record_content_failure(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let failed = ctx.instance.payload.failed_nodes.len();
    let submitted = ctx.instance.payload.submitted_content_nodes.unwrap_or_default();
    ctx.instance.set_current_step_status(StepStatus::Failed)?;
    ctx.fail(format!("{failed} of {submitted} content nodes failed"));
    Ok(())
}

fn finalize_completed(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let generated_document_id = ctx.instance.payload.generated_document_id;
    ctx.publish(&GenerationPipelineCompleted {
        correlation_id: ctx.correlation_id(),
        generated_document_id,
        content_nodes_generated: ctx.instance.payload.successful_nodes.len() as u32,
    })?;
    if let Some(target_id) = generated_document_id {
        ctx.update_target_status(target_id, TargetStatus::Generated, None);
    }
    Ok(())
}

fn finalize_failed(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let generated_document_id = ctx.instance.payload.generated_document_id;
    let (failed_stage, reason) = match &ctx.instance.failure {
        Some(f) => (f.stage.clone(), f.reason.clone()),
        None => (ctx.state_name().to_string(), "unknown".to_string()),
    };
    ctx.publish(&GenerationPipelineFailed {
        correlation_id: ctx.correlation_id(),
        generated_document_id,
        failed_stage,
        reason: reason.clone(),
    })?;
    if let Some(target_id) = generated_document_id {
        ctx.update_target_status(target_id, TargetStatus::GenerationFailed, Some(reason));
    }
    Ok(())
}
