use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::message_types;
use crate::message_contract;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartDocumentGeneration {
    pub correlation_id: Uuid,
    pub document_title: String,
    pub author_oid: String,
    pub document_process_name: String,
    #[serde(default)]
    pub metadata_json: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateGeneratedDocument {
    pub correlation_id: Uuid,
    pub document_title: String,
    pub author_oid: String,
    pub document_process_name: String,
    #[serde(default)]
    pub metadata_json: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedDocumentCreated {
    pub correlation_id: Uuid,
    pub generated_document_id: Uuid,
    pub metadata_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedDocumentCreationFailed {
    pub correlation_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateDocumentOutline {
    pub correlation_id: Uuid,
    pub generated_document_id: Uuid,
    pub document_process_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentOutlineGenerated {
    pub correlation_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentOutlineGenerationFailed {
    pub correlation_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateReportContent {
    pub correlation_id: Uuid,
    pub generated_document_id: Uuid,
}

/// Content generation fanned out into this many node jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportContentGenerationSubmitted {
    pub correlation_id: Uuid,
    pub number_of_content_nodes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentNodeGenerated {
    pub correlation_id: Uuid,
    pub content_node_id: Uuid,
    pub is_successful: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationPipelineCompleted {
    pub correlation_id: Uuid,
    pub generated_document_id: Option<Uuid>,
    pub content_nodes_generated: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationPipelineFailed {
    pub correlation_id: Uuid,
    pub generated_document_id: Option<Uuid>,
    pub failed_stage: String,
    pub reason: String,
}

message_contract!(StartDocumentGeneration, message_types::START_DOCUMENT_GENERATION);
message_contract!(CreateGeneratedDocument, message_types::CREATE_GENERATED_DOCUMENT);
message_contract!(GeneratedDocumentCreated, message_types::GENERATED_DOCUMENT_CREATED);
message_contract!(
    GeneratedDocumentCreationFailed,
    message_types::GENERATED_DOCUMENT_CREATION_FAILED
);
message_contract!(GenerateDocumentOutline, message_types::GENERATE_DOCUMENT_OUTLINE);
message_contract!(DocumentOutlineGenerated, message_types::DOCUMENT_OUTLINE_GENERATED);
message_contract!(
    DocumentOutlineGenerationFailed,
    message_types::DOCUMENT_OUTLINE_GENERATION_FAILED
);
message_contract!(GenerateReportContent, message_types::GENERATE_REPORT_CONTENT);
message_contract!(
    ReportContentGenerationSubmitted,
    message_types::REPORT_CONTENT_GENERATION_SUBMITTED
);
message_contract!(ContentNodeGenerated, message_types::CONTENT_NODE_GENERATED);
message_contract!(GenerationPipelineCompleted, message_types::GENERATION_PIPELINE_COMPLETED);
message_contract!(GenerationPipelineFailed, message_types::GENERATION_PIPELINE_FAILED);
