use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::message_types;
use crate::message_contract;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartDocumentIngestion {
    pub correlation_id: Uuid,
    pub file_name: String,
    pub original_document_url: String,
    pub uploaded_by_user_oid: String,
    pub document_process_name: String,
    pub plugin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateIngestedDocument {
    pub correlation_id: Uuid,
    pub file_name: String,
    pub original_document_url: String,
    pub uploaded_by_user_oid: String,
    pub document_process_name: String,
    pub plugin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedDocumentCreated {
    pub correlation_id: Uuid,
    pub ingested_document_id: Uuid,
    pub file_hash: String,
}

/// Creation refused (duplicate hash, unreadable upload)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedDocumentRejected {
    pub correlation_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyIngestedDocument {
    pub correlation_id: Uuid,
    pub ingested_document_id: Uuid,
    pub document_process_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedDocumentClassified {
    pub correlation_id: Uuid,
    pub classification_short_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedDocumentClassificationFailed {
    pub correlation_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessIngestedDocument {
    pub correlation_id: Uuid,
    pub ingested_document_id: Uuid,
    pub classification_short_code: String,
    pub plugin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedDocumentProcessed {
    pub correlation_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedDocumentProcessingFailed {
    pub correlation_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStoppedByUnsupportedClassification {
    pub correlation_id: Uuid,
    pub classification_short_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexIngestedDocument {
    pub correlation_id: Uuid,
    pub ingested_document_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedDocumentIndexed {
    pub correlation_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedDocumentIndexingFailed {
    pub correlation_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionPipelineCompleted {
    pub correlation_id: Uuid,
    pub ingested_document_id: Option<Uuid>,
    pub classification_short_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionPipelineFailed {
    pub correlation_id: Uuid,
    pub ingested_document_id: Option<Uuid>,
    pub failed_stage: String,
    pub reason: String,
}

message_contract!(StartDocumentIngestion, message_types::START_DOCUMENT_INGESTION);
message_contract!(CreateIngestedDocument, message_types::CREATE_INGESTED_DOCUMENT);
message_contract!(IngestedDocumentCreated, message_types::INGESTED_DOCUMENT_CREATED);
message_contract!(IngestedDocumentRejected, message_types::INGESTED_DOCUMENT_REJECTED);
message_contract!(ClassifyIngestedDocument, message_types::CLASSIFY_INGESTED_DOCUMENT);
message_contract!(IngestedDocumentClassified, message_types::INGESTED_DOCUMENT_CLASSIFIED);
message_contract!(
    IngestedDocumentClassificationFailed,
    message_types::INGESTED_DOCUMENT_CLASSIFICATION_FAILED
);
message_contract!(ProcessIngestedDocument, message_types::PROCESS_INGESTED_DOCUMENT);
message_contract!(IngestedDocumentProcessed, message_types::INGESTED_DOCUMENT_PROCESSED);
message_contract!(
    IngestedDocumentProcessingFailed,
    message_types::INGESTED_DOCUMENT_PROCESSING_FAILED
);
message_contract!(
    ProcessingStoppedByUnsupportedClassification,
    message_types::PROCESSING_STOPPED_BY_UNSUPPORTED_CLASSIFICATION
);
message_contract!(IndexIngestedDocument, message_types::INDEX_INGESTED_DOCUMENT);
message_contract!(IngestedDocumentIndexed, message_types::INGESTED_DOCUMENT_INDEXED);
message_contract!(
    IngestedDocumentIndexingFailed,
    message_types::INGESTED_DOCUMENT_INDEXING_FAILED
);
message_contract!(IngestionPipelineCompleted, message_types::INGESTION_PIPELINE_COMPLETED);
message_contract!(IngestionPipelineFailed, message_types::INGESTION_PIPELINE_FAILED);
