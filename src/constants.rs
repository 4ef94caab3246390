//! # System Constants
//!
//! Message type names, saga type names and operational defaults shared by
//! the pipeline definitions, the dispatcher and the worker bootstrap.

/// Saga type discriminators stored alongside every persisted instance
pub mod saga_types {
    pub const VALIDATION: &str = "validation";
    pub const INGESTION: &str = "ingestion";
    pub const GENERATION: &str = "generation";
}

/// Wire names of every command and event the core publishes or consumes
pub mod message_types {
    // Validation pipeline
    pub const START_VALIDATION_PIPELINE: &str = "StartValidationPipeline";
    pub const VALIDATION_STEPS_LOADED: &str = "ValidationStepsLoaded";
    pub const VALIDATION_STEPS_LOAD_FAILED: &str = "ValidationStepsLoadFailed";
    pub const EXECUTE_VALIDATION_STEP: &str = "ExecuteValidationStep";
    pub const VALIDATION_STEP_COMPLETED: &str = "ValidationStepCompleted";
    pub const VALIDATION_STEP_FAILED: &str = "ValidationStepFailed";
    pub const VALIDATION_PIPELINE_COMPLETED: &str = "ValidationPipelineCompleted";
    pub const VALIDATION_PIPELINE_FAILED: &str = "ValidationPipelineFailed";

    // Ingestion pipeline
    pub const START_DOCUMENT_INGESTION: &str = "StartDocumentIngestion";
    pub const CREATE_INGESTED_DOCUMENT: &str = "CreateIngestedDocument";
    pub const INGESTED_DOCUMENT_CREATED: &str = "IngestedDocumentCreated";
    pub const INGESTED_DOCUMENT_REJECTED: &str = "IngestedDocumentRejected";
    pub const CLASSIFY_INGESTED_DOCUMENT: &str = "ClassifyIngestedDocument";
    pub const INGESTED_DOCUMENT_CLASSIFIED: &str = "IngestedDocumentClassified";
    pub const INGESTED_DOCUMENT_CLASSIFICATION_FAILED: &str =
        "IngestedDocumentClassificationFailed";
    pub const PROCESS_INGESTED_DOCUMENT: &str = "ProcessIngestedDocument";
    pub const INGESTED_DOCUMENT_PROCESSED: &str = "IngestedDocumentProcessed";
    pub const INGESTED_DOCUMENT_PROCESSING_FAILED: &str = "IngestedDocumentProcessingFailed";
    pub const PROCESSING_STOPPED_BY_UNSUPPORTED_CLASSIFICATION: &str =
        "ProcessingStoppedByUnsupportedClassification";
    pub const INDEX_INGESTED_DOCUMENT: &str = "IndexIngestedDocument";
    pub const INGESTED_DOCUMENT_INDEXED: &str = "IngestedDocumentIndexed";
    pub const INGESTED_DOCUMENT_INDEXING_FAILED: &str = "IngestedDocumentIndexingFailed";
    pub const INGESTION_PIPELINE_COMPLETED: &str = "IngestionPipelineCompleted";
    pub const INGESTION_PIPELINE_FAILED: &str = "IngestionPipelineFailed";

    // Generation pipeline
    pub const START_DOCUMENT_GENERATION: &str = "StartDocumentGeneration";
    pub const CREATE_GENERATED_DOCUMENT: &str = "CreateGeneratedDocument";
    pub const GENERATED_DOCUMENT_CREATED: &str = "GeneratedDocumentCreated";
    pub const GENERATED_DOCUMENT_CREATION_FAILED: &str = "GeneratedDocumentCreationFailed";
    pub const GENERATE_DOCUMENT_OUTLINE: &str = "GenerateDocumentOutline";
    pub const DOCUMENT_OUTLINE_GENERATED: &str = "DocumentOutlineGenerated";
    pub const DOCUMENT_OUTLINE_GENERATION_FAILED: &str = "DocumentOutlineGenerationFailed";
    pub const GENERATE_REPORT_CONTENT: &str = "GenerateReportContent";
    pub const REPORT_CONTENT_GENERATION_SUBMITTED: &str = "ReportContentGenerationSubmitted";
    pub const CONTENT_NODE_GENERATED: &str = "ContentNodeGenerated";
    pub const GENERATION_PIPELINE_COMPLETED: &str = "GenerationPipelineCompleted";
    pub const GENERATION_PIPELINE_FAILED: &str = "GenerationPipelineFailed";

    // Broadcast (fan-out) control messages
    pub const CONFIGURATION_UPDATED: &str = "ConfigurationUpdated";
    pub const RESTART_WORKER: &str = "RestartWorker";
    pub const PLUGIN_UPDATE: &str = "PluginUpdate";
}

/// Message header names
pub mod headers {
    pub const SERVER_NAMESPACE: &str = "docflow-server-namespace";
    pub const ORIGIN_REPLICA: &str = "docflow-origin-replica";
}

/// Operational defaults used when configuration omits a value
pub mod defaults {
    pub const MAX_CONCURRENCY_RETRIES: u32 = 5;
    pub const OUTBOX_RESEND_AFTER_SECONDS: u64 = 30;
    pub const LOCK_DURATION_SECONDS: u64 = 300;
    pub const MAX_AUTO_RENEW_SECONDS: u64 = 1200;
    pub const POLL_INTERVAL_MS: u64 = 250;
    pub const SERVER_NAMESPACE: &str = "docflow";

    /// Saga-mutating subscriptions handle one message at a time
    pub const SAGA_CONCURRENCY_LIMIT: usize = 1;
    pub const SAGA_PREFETCH_COUNT: usize = 1;

    pub const STEP_EXECUTION_CONCURRENCY_LIMIT: usize = 1;
    pub const STEP_EXECUTION_PREFETCH_COUNT: usize = 3;

    pub const BROADCAST_CONCURRENCY_LIMIT: usize = 4;
    pub const BROADCAST_PREFETCH_COUNT: usize = 3;

    /// Redelivery ranges in seconds: attempt 1, 2 and 3
    pub const RETRY_RANGES_SECONDS: [(u64, u64); 3] = [(3, 9), (10, 30), (30, 60)];
}
