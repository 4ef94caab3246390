//! # Pipelines
//!
//! Step definitions, step resolution and the three saga definitions built on
//! the generic engine: validation (steps resolved per document process),
//! ingestion and generation (fixed stage lists).

pub mod generation;
pub mod ingestion;
pub mod registry;
pub mod resolver;
pub mod step;
pub mod validation;

pub use generation::{GenerationEvent, GenerationPayload, GenerationSaga, GenerationState};
pub use ingestion::{IngestionEvent, IngestionPayload, IngestionSaga, IngestionState};
pub use registry::StepExecutorRegistry;
pub use resolver::{
    ConfiguredStepResolver, FixedStepResolver, ResolutionContext, ResolutionError,
    StaticPipelineConfiguration, StepPipelineResolver,
};
pub use step::{ExecutionType, StepDefinition, StepStatus};
pub use validation::{ValidationEvent, ValidationPayload, ValidationSaga, ValidationState};
