//! # Step Pipeline Resolver
//!
//! Turns a workflow's context into its ordered step list. Fixed pipelines
//! (ingestion, generation) always return the same stages; validation reads
//! the steps configured for the document process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use super::registry::StepExecutorRegistry;
use super::step::{ExecutionType, StepDefinition};
use crate::collaborators::{CollaboratorError, ConfiguredStep, PipelineConfigurationSource};
use crate::config::PipelinesConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionContext {
    pub correlation_id: Uuid,
    pub target_id: Option<Uuid>,
    pub document_process_name: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Workflow {correlation_id} has no target entity")]
    MissingTarget { correlation_id: Uuid },

    #[error("No pipeline configured for document process '{document_process}'")]
    NoPipelineConfigured { document_process: String },

    #[error("Execution type '{execution_type}' configured for '{document_process}' has no executor")]
    UnknownExecutionType {
        execution_type: String,
        document_process: String,
    },

    /// The configuration source could not be read; retrying may succeed
    #[error("Pipeline configuration unavailable: {message}")]
    Unavailable { message: String },
}

impl ResolutionError {
    /// Permanent errors fail the workflow; transient ones are retried
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Self::Unavailable { .. })
    }
}

#[async_trait]
pub trait StepPipelineResolver: Send + Sync {
    async fn load_steps(
        &self,
        context: &ResolutionContext,
    ) -> Result<Vec<StepDefinition>, ResolutionError>;

    /// Drop cached pipelines; `None` drops everything
    fn invalidate(&self, _document_process: Option<&str>) {}
}

/// Constant stage list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedStepResolver {
    stages: Vec<ExecutionType>,
}

impl FixedStepResolver {
    pub fn new<I, T>(stages: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ExecutionType>,
    {
        Self {
            stages: stages.into_iter().map(Into::into).collect(),
        }
    }

    pub fn ingestion() -> Self {
        Self::new(["create", "classify", "process", "index"])
    }

    pub fn generation() -> Self {
        Self::new(["create", "outline", "content"])
    }

    /// Fresh step definitions, ordered from 1
    pub fn steps(&self) -> Vec<StepDefinition> {
        self.stages
            .iter()
            .enumerate()
            .map(|(i, stage)| StepDefinition::new(i as i32 + 1, stage.clone()))
            .collect()
    }
}

#[async_trait]
impl StepPipelineResolver for FixedStepResolver {
    async fn load_steps(
        &self,
        _context: &ResolutionContext,
    ) -> Result<Vec<StepDefinition>, ResolutionError> {
        Ok(self.steps())
    }
}

/// Validation pipelines read from the `[[pipelines.validation]]` config tables
#[derive(Debug, Clone, Default)]
pub struct StaticPipelineConfiguration {
    pipelines: HashMap<String, Vec<ConfiguredStep>>,
}

impl StaticPipelineConfiguration {
    pub fn from_config(config: &PipelinesConfig) -> Self {
        let pipelines = config
            .validation_by_process()
            .into_iter()
            .map(|(process, steps)| {
                let steps = steps
                    .into_iter()
                    .map(|s| ConfiguredStep {
                        execution_type: ExecutionType::new(s.execution_type),
                        order: s.order,
                    })
                    .collect();
                (process, steps)
            })
            .collect();
        Self { pipelines }
    }

    pub fn with_pipeline(
        mut self,
        document_process: impl Into<String>,
        steps: Vec<ConfiguredStep>,
    ) -> Self {
        self.pipelines.insert(document_process.into(), steps);
        self
    }
}

#[async_trait]
impl PipelineConfigurationSource for StaticPipelineConfiguration {
    async fn validation_steps(
        &self,
        document_process_name: &str,
    ) -> Result<Option<Vec<ConfiguredStep>>, CollaboratorError> {
        Ok(self.pipelines.get(document_process_name).cloned())
    }
}

/// Validation steps from a configuration source, cached per document process
pub struct ConfiguredStepResolver {
    source: Arc<dyn PipelineConfigurationSource>,
    registry: Option<Arc<StepExecutorRegistry>>,
    cache: DashMap<String, Vec<ConfiguredStep>>,
}

impl std::fmt::Debug for ConfiguredStepResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredStepResolver")
            .field("registry", &self.registry)
            .field("cached_processes", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl ConfiguredStepResolver {
    pub fn new(source: Arc<dyn PipelineConfigurationSource>) -> Self {
        Self {
            source,
            registry: None,
            cache: DashMap::new(),
        }
    }

    /// Reject execution types that have no executor in `registry`
    pub fn with_registry(mut self, registry: Arc<StepExecutorRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn cached_processes(&self) -> usize {
        self.cache.len()
    }

    async fn configured_steps(
        &self,
        document_process: &str,
    ) -> Result<Vec<ConfiguredStep>, ResolutionError> {
        let cached = self
            .cache
            .get(document_process)
            .map(|steps| steps.value().clone());
        if let Some(steps) = cached {
            return Ok(steps);
        }

        let steps = self
            .source
            .validation_steps(document_process)
            .await
            .map_err(|e| match e {
                CollaboratorError::Unavailable { message, .. } => {
                    ResolutionError::Unavailable { message }
                }
                CollaboratorError::Rejected { .. } => ResolutionError::NoPipelineConfigured {
                    document_process: document_process.to_string(),
                },
            })?
            .ok_or_else(|| ResolutionError::NoPipelineConfigured {
                document_process: document_process.to_string(),
            })?;

        self.cache
            .insert(document_process.to_string(), steps.clone());
        Ok(steps)
    }
}

#[async_trait]
impl StepPipelineResolver for ConfiguredStepResolver {
    async fn load_steps(
        &self,
        context: &ResolutionContext,
    ) -> Result<Vec<StepDefinition>, ResolutionError> {
        if context.target_id.is_none() {
            return Err(ResolutionError::MissingTarget {
                correlation_id: context.correlation_id,
            });
        }
        let document_process = context
            .document_process_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| ResolutionError::NoPipelineConfigured {
                document_process: "<unspecified>".to_string(),
            })?;

        let mut configured = self.configured_steps(document_process).await?;

        if let Some(registry) = &self.registry {
            if let Some(unknown) = configured
                .iter()
                .find(|s| !registry.contains(&s.execution_type))
            {
                return Err(ResolutionError::UnknownExecutionType {
                    execution_type: unknown.execution_type.to_string(),
                    document_process: document_process.to_string(),
                });
            }
        }

        configured.sort_by_key(|s| s.order);
        debug!(
            correlation_id = %context.correlation_id,
            document_process = %document_process,
            step_count = configured.len(),
            "Resolved validation steps"
        );
        Ok(configured
            .into_iter()
            .map(|s| StepDefinition::new(s.order, s.execution_type))
            .collect())
    }

    fn invalidate(&self, document_process: Option<&str>) {
        match document_process {
            Some(process) => {
                self.cache.remove(process);
            }
            None => self.cache.clear(),
        }
        info!(
            document_process = document_process.unwrap_or("*"),
            "♻️ Validation pipeline cache invalidated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{StepExecutor, StepOutcome, StepRequest};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context(process: Option<&str>) -> ResolutionContext {
        ResolutionContext {
            correlation_id: Uuid::new_v4(),
            target_id: Some(Uuid::new_v4()),
            document_process_name: process.map(String::from),
        }
    }

    fn step(execution_type: &str, order: i32) -> ConfiguredStep {
        ConfiguredStep {
            execution_type: ExecutionType::new(execution_type),
            order,
        }
    }

    struct CountingSource {
        inner: StaticPipelineConfiguration,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl PipelineConfigurationSource for CountingSource {
        async fn validation_steps(
            &self,
            document_process_name: &str,
        ) -> Result<Option<Vec<ConfiguredStep>>, CollaboratorError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.validation_steps(document_process_name).await
        }
    }

    struct NoopExecutor(&'static str);

    #[async_trait]
    impl StepExecutor for NoopExecutor {
        fn execution_type(&self) -> ExecutionType {
            ExecutionType::new(self.0)
        }

        async fn execute(&self, _request: &StepRequest) -> Result<StepOutcome, CollaboratorError> {
            Ok(StepOutcome::Completed)
        }
    }

    #[test]
    fn test_fixed_resolvers_order_stages() {
        let steps = FixedStepResolver::ingestion().steps();
        let names: Vec<&str> = steps.iter().map(|s| s.execution_type.as_str()).collect();
        assert_eq!(names, vec!["create", "classify", "process", "index"]);
        assert_eq!(steps[0].order, 1);
        assert_eq!(FixedStepResolver::generation().steps().len(), 3);
    }

    #[tokio::test]
    async fn test_configured_steps_sorted_with_fresh_ids() {
        let source = StaticPipelineConfiguration::default()
            .with_pipeline("contract", vec![step("spell_check", 2), step("schema_check", 1)]);
        let resolver = ConfiguredStepResolver::new(Arc::new(source));

        let first = resolver.load_steps(&context(Some("contract"))).await.unwrap();
        let second = resolver.load_steps(&context(Some("contract"))).await.unwrap();

        assert_eq!(first[0].execution_type.as_str(), "schema_check");
        assert_eq!(first[1].execution_type.as_str(), "spell_check");
        assert_ne!(first[0].step_id, second[0].step_id);
    }

    #[tokio::test]
    async fn test_resolution_errors_are_permanent() {
        let resolver = ConfiguredStepResolver::new(Arc::new(StaticPipelineConfiguration::default()));

        let missing_target = ResolutionContext {
            target_id: None,
            ..context(Some("contract"))
        };
        let err = resolver.load_steps(&missing_target).await.unwrap_err();
        assert!(matches!(err, ResolutionError::MissingTarget { .. }));
        assert!(err.is_permanent());

        let err = resolver.load_steps(&context(Some("unknown"))).await.unwrap_err();
        assert!(matches!(err, ResolutionError::NoPipelineConfigured { .. }));

        let err = resolver.load_steps(&context(None)).await.unwrap_err();
        assert!(matches!(err, ResolutionError::NoPipelineConfigured { .. }));

        assert!(!ResolutionError::Unavailable {
            message: "db down".to_string()
        }
        .is_permanent());
    }

    #[tokio::test]
    async fn test_registry_rejects_unknown_execution_type() {
        let source = StaticPipelineConfiguration::default()
            .with_pipeline("contract", vec![step("schema_check", 1), step("plagiarism", 2)]);
        let registry =
            StepExecutorRegistry::new().with_executor(Arc::new(NoopExecutor("schema_check")));
        let resolver =
            ConfiguredStepResolver::new(Arc::new(source)).with_registry(Arc::new(registry));

        let err = resolver.load_steps(&context(Some("contract"))).await.unwrap_err();
        assert_eq!(
            err,
            ResolutionError::UnknownExecutionType {
                execution_type: "plagiarism".to_string(),
                document_process: "contract".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_cache_and_invalidation() {
        let source = Arc::new(CountingSource {
            inner: StaticPipelineConfiguration::default()
                .with_pipeline("contract", vec![step("schema_check", 1)]),
            reads: AtomicUsize::new(0),
        });
        let resolver = ConfiguredStepResolver::new(source.clone());

        resolver.load_steps(&context(Some("contract"))).await.unwrap();
        resolver.load_steps(&context(Some("contract"))).await.unwrap();
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.cached_processes(), 1);

        resolver.invalidate(Some("contract"));
        assert_eq!(resolver.cached_processes(), 0);
        resolver.load_steps(&context(Some("contract"))).await.unwrap();
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);

        resolver.invalidate(None);
        assert_eq!(resolver.cached_processes(), 0);
    }
}
