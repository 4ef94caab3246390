//! Ingestion pipeline: create, classify, process and index an uploaded
//! document. Each stage is one command/event round trip; any failed stage
//! rejects the document.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::resolver::FixedStepResolver;
use super::step::StepStatus;
use crate::constants::{message_types, saga_types};
use crate::messaging::messages::{
    ClassifyIngestedDocument, CreateIngestedDocument, IndexIngestedDocument,
    IngestedDocumentClassificationFailed, IngestedDocumentClassified, IngestedDocumentCreated,
    IngestedDocumentIndexed, IngestedDocumentIndexingFailed, IngestedDocumentProcessed,
    IngestedDocumentProcessingFailed, IngestedDocumentRejected, IngestionPipelineCompleted,
    IngestionPipelineFailed, ProcessIngestedDocument, ProcessingStoppedByUnsupportedClassification,
    StartDocumentIngestion,
};
use crate::messaging::{MessageContract, MessageEnvelope, MessagingError};
use crate::saga::{
    activity, ActivityContext, ActivityError, SagaDefinition, SagaEvent, SagaState, TargetStatus,
    Transition, TransitionTable,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionState {
    Initial,
    Creating,
    Classifying,
    Processing,
    Indexing,
    Completed,
    Failed,
}

impl SagaState for IngestionState {
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
            Self::Classifying => "classifying",
            Self::Processing => "processing",
            Self::Indexing => "indexing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "initial" => Some(Self::Initial),
            "creating" => Some(Self::Creating),
            "classifying" => Some(Self::Classifying),
            "processing" => Some(Self::Processing),
            "indexing" => Some(Self::Indexing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestionEvent {
    Start(StartDocumentIngestion),
    Created(IngestedDocumentCreated),
    Rejected(IngestedDocumentRejected),
    Classified(IngestedDocumentClassified),
    ClassificationFailed(IngestedDocumentClassificationFailed),
    Processed(IngestedDocumentProcessed),
    ProcessingFailed(IngestedDocumentProcessingFailed),
    UnsupportedClassification(ProcessingStoppedByUnsupportedClassification),
    Indexed(IngestedDocumentIndexed),
    IndexingFailed(IngestedDocumentIndexingFailed),
}

impl IngestionEvent {
    /// Failure reason carried by a stage-failed event
    fn failure_reason(&self) -> Option<String> {
        match self {
            Self::Rejected(m) => Some(m.reason.clone()),
            Self::ClassificationFailed(m) => Some(m.reason.clone()),
            Self::ProcessingFailed(m) => Some(m.reason.clone()),
            Self::UnsupportedClassification(m) => Some(format!(
                "classification '{}' is not supported",
                m.classification_short_code
            )),
            Self::IndexingFailed(m) => Some(m.reason.clone()),
            _ => None,
        }
    }
}

impl SagaEvent for IngestionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Start(_) => StartDocumentIngestion::MESSAGE_TYPE,
            Self::Created(_) => IngestedDocumentCreated::MESSAGE_TYPE,
            Self::Rejected(_) => IngestedDocumentRejected::MESSAGE_TYPE,
            Self::Classified(_) => IngestedDocumentClassified::MESSAGE_TYPE,
            Self::ClassificationFailed(_) => IngestedDocumentClassificationFailed::MESSAGE_TYPE,
            Self::Processed(_) => IngestedDocumentProcessed::MESSAGE_TYPE,
            Self::ProcessingFailed(_) => IngestedDocumentProcessingFailed::MESSAGE_TYPE,
            Self::UnsupportedClassification(_) => {
                ProcessingStoppedByUnsupportedClassification::MESSAGE_TYPE
            }
            Self::Indexed(_) => IngestedDocumentIndexed::MESSAGE_TYPE,
            Self::IndexingFailed(_) => IngestedDocumentIndexingFailed::MESSAGE_TYPE,
        }
    }

    fn correlation_id(&self) -> Uuid {
        match self {
            Self::Start(m) => m.correlation_id,
            Self::Created(m) => m.correlation_id,
            Self::Rejected(m) => m.correlation_id,
            Self::Classified(m) => m.correlation_id,
            Self::ClassificationFailed(m) => m.correlation_id,
            Self::Processed(m) => m.correlation_id,
            Self::ProcessingFailed(m) => m.correlation_id,
            Self::UnsupportedClassification(m) => m.correlation_id,
            Self::Indexed(m) => m.correlation_id,
            Self::IndexingFailed(m) => m.correlation_id,
        }
    }

    fn from_envelope(envelope: &MessageEnvelope) -> Result<Option<Self>, MessagingError> {
        use message_types as t;

        let event = match envelope.message_type.as_str() {
            t::START_DOCUMENT_INGESTION => Self::Start(envelope.decode()?),
            t::INGESTED_DOCUMENT_CREATED => Self::Created(envelope.decode()?),
            t::INGESTED_DOCUMENT_REJECTED => Self::Rejected(envelope.decode()?),
            t::INGESTED_DOCUMENT_CLASSIFIED => Self::Classified(envelope.decode()?),
            t::INGESTED_DOCUMENT_CLASSIFICATION_FAILED => {
                Self::ClassificationFailed(envelope.decode()?)
            }
            t::INGESTED_DOCUMENT_PROCESSED => Self::Processed(envelope.decode()?),
            t::INGESTED_DOCUMENT_PROCESSING_FAILED => Self::ProcessingFailed(envelope.decode()?),
            t::PROCESSING_STOPPED_BY_UNSUPPORTED_CLASSIFICATION => {
                Self::UnsupportedClassification(envelope.decode()?)
            }
            t::INGESTED_DOCUMENT_INDEXED => Self::Indexed(envelope.decode()?),
            t::INGESTED_DOCUMENT_INDEXING_FAILED => Self::IndexingFailed(envelope.decode()?),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionPayload {
    pub file_name: String,
    pub original_document_url: String,
    pub uploaded_by_user_oid: String,
    pub document_process_name: String,
    pub plugin: Option<String>,
    pub ingested_document_id: Option<Uuid>,
    pub file_hash: Option<String>,
    pub classification_short_code: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestionSaga;

impl IngestionSaga {
    pub fn new() -> Self {
        Self
    }
}

type Ctx<'a> = ActivityContext<'a, IngestionSaga>;

impl SagaDefinition for IngestionSaga {
    type State = IngestionState;
    type Event = IngestionEvent;
    type Payload = IngestionPayload;

    const SAGA_TYPE: &'static str = saga_types::INGESTION;

    fn transitions(&self) -> TransitionTable<Self> {
        use message_types as t;
        use IngestionState::*;

        TransitionTable::new()
            .on(
                Initial,
                t::START_DOCUMENT_INGESTION,
                Transition::to(Creating)
                    .with_activity(activity("record_start", record_start))
                    .with_activity(activity("request_create", request_create)),
            )
            .on(
                Creating,
                t::INGESTED_DOCUMENT_CREATED,
                Transition::to(Classifying)
                    .with_activity(activity("record_created", record_created))
                    .with_activity(activity("complete_stage", complete_stage))
                    .with_activity(activity("request_classify", request_classify)),
            )
            .on(Creating, t::INGESTED_DOCUMENT_REJECTED, stage_failed())
            .on(
                Classifying,
                t::INGESTED_DOCUMENT_CLASSIFIED,
                Transition::to(Processing)
                    .with_activity(activity("record_classification", record_classification))
                    .with_activity(activity("complete_stage", complete_stage))
                    .with_activity(activity("request_process", request_process)),
            )
            .on(
                Classifying,
                t::INGESTED_DOCUMENT_CLASSIFICATION_FAILED,
                stage_failed(),
            )
            .on(
                Processing,
                t::INGESTED_DOCUMENT_PROCESSED,
                Transition::to(Indexing)
                    .with_activity(activity("complete_stage", complete_stage))
                    .with_activity(activity("request_index", request_index)),
            )
            .on(Processing, t::INGESTED_DOCUMENT_PROCESSING_FAILED, stage_failed())
            .on(
                Processing,
                t::PROCESSING_STOPPED_BY_UNSUPPORTED_CLASSIFICATION,
                stage_failed(),
            )
            .on(
                Indexing,
                t::INGESTED_DOCUMENT_INDEXED,
                Transition::to(Completed)
                    .with_activity(activity("complete_stage", complete_stage))
                    .with_activity(activity("finalize_completed", finalize_completed)),
            )
            .on(Indexing, t::INGESTED_DOCUMENT_INDEXING_FAILED, stage_failed())
    }
}

fn stage_failed() -> Transition<IngestionSaga> {
    Transition::to(IngestionState::Failed)
        .with_activity(activity("record_stage_failure", record_stage_failure))
        .with_activity(activity("finalize_failed", finalize_failed))
}

fn document_id(ctx: &Ctx<'_>) -> Result<Uuid, ActivityError> {
    ctx.instance
        .payload
        .ingested_document_id
        .ok_or_else(|| ActivityError::invalid_state("ingested document id not recorded"))
}

fn record_start(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let IngestionEvent::Start(start) = ctx.event else {
        return Err(ActivityError::invalid_state("record_start expects a start event"));
    };
    ctx.instance.payload = IngestionPayload {
        file_name: start.file_name.clone(),
        original_document_url: start.original_document_url.clone(),
        uploaded_by_user_oid: start.uploaded_by_user_oid.clone(),
        document_process_name: start.document_process_name.clone(),
        plugin: start.plugin.clone(),
        ..IngestionPayload::default()
    };
    ctx.instance.load_steps(FixedStepResolver::ingestion().steps())
}

fn request_create(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    ctx.instance.set_current_step_status(StepStatus::Running)?;
    let payload = &ctx.instance.payload;
    let command = CreateIngestedDocument {
        correlation_id: ctx.instance.correlation_id,
        file_name: payload.file_name.clone(),
        original_document_url: payload.original_document_url.clone(),
        uploaded_by_user_oid: payload.uploaded_by_user_oid.clone(),
        document_process_name: payload.document_process_name.clone(),
        plugin: payload.plugin.clone(),
    };
    ctx.publish(&command)
}

fn record_created(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let IngestionEvent::Created(created) = ctx.event else {
        return Err(ActivityError::invalid_state("record_created expects IngestedDocumentCreated"));
    };
    ctx.instance.payload.ingested_document_id = Some(created.ingested_document_id);
    ctx.instance.payload.file_hash = Some(created.file_hash.clone());
    Ok(())
}

fn record_classification(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let IngestionEvent::Classified(classified) = ctx.event else {
        return Err(ActivityError::invalid_state(
            "record_classification expects IngestedDocumentClassified",
        ));
    };
    ctx.instance.payload.classification_short_code =
        Some(classified.classification_short_code.clone());
    Ok(())
}

/// Mark the current stage done and move to the next one
fn complete_stage(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    ctx.instance.set_current_step_status(StepStatus::Completed)?;
    ctx.instance.advance();
    if ctx.instance.has_current_step() {
        ctx.instance.set_current_step_status(StepStatus::Running)?;
    }
    Ok(())
}

fn request_classify(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let command = ClassifyIngestedDocument {
        correlation_id: ctx.correlation_id(),
        ingested_document_id: document_id(ctx)?,
        document_process_name: ctx.instance.payload.document_process_name.clone(),
    };
    ctx.publish(&command)
}

fn request_process(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let classification_short_code = ctx
        .instance
        .payload
        .classification_short_code
        .clone()
        .ok_or_else(|| ActivityError::invalid_state("classification not recorded"))?;
    let command = ProcessIngestedDocument {
        correlation_id: ctx.correlation_id(),
        ingested_document_id: document_id(ctx)?,
        classification_short_code,
        plugin: ctx.instance.payload.plugin.clone(),
    };
    ctx.publish(&command)
}

fn request_index(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let command = IndexIngestedDocument {
        correlation_id: ctx.correlation_id(),
        ingested_document_id: document_id(ctx)?,
    };
    ctx.publish(&command)
}

fn record_stage_failure(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let reason = ctx
        .event
        .failure_reason()
        .unwrap_or_else(|| "stage failed".to_string());
    if ctx.instance.has_current_step() {
        ctx.instance.set_current_step_status(StepStatus::Failed)?;
    }
    ctx.fail(reason);
    Ok(())
}

fn finalize_completed(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let ingested_document_id = ctx.instance.payload.ingested_document_id;
    ctx.publish(&IngestionPipelineCompleted {
        correlation_id: ctx.correlation_id(),
        ingested_document_id,
        classification_short_code: ctx.instance.payload.classification_short_code.clone(),
    })?;
    if let Some(target_id) = ingested_document_id {
        ctx.update_target_status(target_id, TargetStatus::Ingested, None);
    }
    Ok(())
}

fn finalize_failed(ctx: &mut Ctx<'_>) -> Result<(), ActivityError> {
    let ingested_document_id = ctx.instance.payload.ingested_document_id;
    let (failed_stage, reason) = match &ctx.instance.failure {
        Some(f) => (f.stage.clone(), f.reason.clone()),
        None => (ctx.state_name().to_string(), "unknown".to_string()),
    };
    ctx.publish(&IngestionPipelineFailed {
        correlation_id: ctx.correlation_id(),
        ingested_document_id,
        failed_stage,
        reason: reason.clone(),
    })?;
    // a rejection before creation has no document to mark
    if let Some(target_id) = ingested_document_id {
        ctx.update_target_status(target_id, TargetStatus::Rejected, Some(reason));
    }
    Ok(())
}
