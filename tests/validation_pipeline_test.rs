//! # Validation Pipeline Tests
//!
//! Drives the validation saga through the engine against the in-memory
//! store and transport, reading every published command back through a
//! probe queue the way a step executor would receive it.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use proptest::prelude::*;
use uuid::Uuid;

use common::{engine, Probe, RecordingStatusSink};
use docflow_core::collaborators::ConfiguredStep;
use docflow_core::constants::message_types;
use docflow_core::messaging::messages::{
    ExecuteValidationStep, StartValidationPipeline, ValidationPipelineCompleted,
    ValidationPipelineFailed, ValidationStepCompleted, ValidationStepFailed,
    ValidationStepsLoadFailed, ValidationStepsLoaded,
};
use docflow_core::messaging::MessagingProvider;
use docflow_core::pipeline::{
    ConfiguredStepResolver, ExecutionType, ResolutionContext, ResolutionError,
    StaticPipelineConfiguration, StepDefinition, StepPipelineResolver, StepStatus,
    ValidationEvent, ValidationSaga, ValidationState,
};
use docflow_core::saga::{DispatchOutcome, EngineError, EngineSettings, IgnoreReason, SagaEngine, TargetStatus};
use docflow_core::store::{InMemorySagaStore, SagaStore};

const PROCESS: &str = "ProjectReport";

fn configured(execution_type: &str, order: i32) -> ConfiguredStep {
    ConfiguredStep {
        execution_type: ExecutionType::new(execution_type),
        order,
    }
}

fn pipelines() -> StaticPipelineConfiguration {
    StaticPipelineConfiguration::default()
        .with_pipeline(
            PROCESS,
            vec![
                configured("ComplianceReview", 3),
                configured("SchemaCheck", 1),
                configured("SpellCheck", 2),
            ],
        )
        .with_pipeline("Memo", Vec::new())
}

struct Harness {
    engine: Arc<SagaEngine<ValidationSaga>>,
    store: Arc<InMemorySagaStore>,
    probe: Probe,
    sink: Arc<RecordingStatusSink>,
}

impl Harness {
    async fn with_resolver(resolver: Arc<dyn StepPipelineResolver>) -> Self {
        let provider = Arc::new(MessagingProvider::in_memory());
        let store = Arc::new(InMemorySagaStore::new());
        let sink = RecordingStatusSink::new();
        let probe = Probe::attach(
            provider.clone(),
            &[
                message_types::VALIDATION_STEPS_LOADED,
                message_types::VALIDATION_STEPS_LOAD_FAILED,
                message_types::EXECUTE_VALIDATION_STEP,
                message_types::VALIDATION_PIPELINE_COMPLETED,
                message_types::VALIDATION_PIPELINE_FAILED,
            ],
        )
        .await;
        let engine = engine(
            ValidationSaga::new(resolver),
            store.clone(),
            provider,
            sink.clone(),
            EngineSettings::default(),
        );
        Self {
            engine,
            store,
            probe,
            sink,
        }
    }

    async fn new() -> Self {
        Self::with_resolver(Arc::new(ConfiguredStepResolver::new(Arc::new(pipelines())))).await
    }

    async fn start(&self, correlation_id: Uuid, document_id: Option<Uuid>, process: &str) {
        let outcome = self
            .engine
            .dispatch(
                correlation_id,
                ValidationEvent::Start(StartValidationPipeline {
                    correlation_id,
                    generated_document_id: document_id,
                    document_process_name: Some(process.to_string()),
                }),
            )
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Applied {
                from: ValidationState::Initial,
                to: ValidationState::LoadingSteps,
                version: 1,
            }
        );
    }

    /// Start the run and feed the resolved steps back in
    async fn start_and_load(&self, correlation_id: Uuid, document_id: Uuid) -> Vec<StepDefinition> {
        self.start(correlation_id, Some(document_id), PROCESS).await;
        let loaded = self.probe.take_one::<ValidationStepsLoaded>().await;
        let steps = loaded.steps.clone();
        self.engine
            .dispatch(correlation_id, ValidationEvent::StepsLoaded(loaded))
            .await
            .unwrap();
        steps
    }

    async fn complete(&self, command: &ExecuteValidationStep) -> DispatchOutcome<ValidationState> {
        self.engine
            .dispatch(
                command.correlation_id,
                ValidationEvent::StepCompleted(ValidationStepCompleted {
                    correlation_id: command.correlation_id,
                    step_id: command.step.step_id,
                    step_index: command.step_index,
                }),
            )
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_steps_run_in_order_and_complete() {
    let harness = Harness::new().await;
    let (correlation_id, document_id) = (Uuid::new_v4(), Uuid::new_v4());

    let steps = harness.start_and_load(correlation_id, document_id).await;
    let names: Vec<&str> = steps.iter().map(|s| s.execution_type.as_str()).collect();
    assert_eq!(names, vec!["SchemaCheck", "SpellCheck", "ComplianceReview"]);

    for (index, expected) in names.iter().enumerate() {
        let command = harness.probe.take_one::<ExecuteValidationStep>().await;
        assert_eq!(command.step_index, index as i32);
        assert_eq!(command.step.execution_type.as_str(), *expected);
        assert_eq!(command.generated_document_id, document_id);
        assert_eq!(command.document_process_name.as_deref(), Some(PROCESS));

        let outcome = harness.complete(&command).await;
        assert!(outcome.is_applied());
    }

    let instance = harness.engine.load(correlation_id).await.unwrap().unwrap();
    assert_eq!(instance.state, ValidationState::Completed);
    assert_eq!(instance.current_step_index, 3);
    assert!(instance
        .ordered_steps
        .iter()
        .all(|s| s.status == StepStatus::Completed));

    let completed = harness.probe.take_one::<ValidationPipelineCompleted>().await;
    assert_eq!(completed.generated_document_id, Some(document_id));
    assert_eq!(completed.steps_executed, 3);
    assert!(harness.probe.take::<ValidationPipelineFailed>().await.is_empty());
    assert_eq!(harness.sink.statuses_for(document_id), vec![TargetStatus::Validated]);

    let record = harness
        .store
        .load("validation", correlation_id)
        .await
        .unwrap()
        .unwrap();
    assert!(!record.has_pending_effects());
}

#[tokio::test]
async fn test_first_failed_step_stops_the_run() {
    let harness = Harness::new().await;
    let (correlation_id, document_id) = (Uuid::new_v4(), Uuid::new_v4());
    harness.start_and_load(correlation_id, document_id).await;

    let first = harness.probe.take_one::<ExecuteValidationStep>().await;
    harness.complete(&first).await;
    let second = harness.probe.take_one::<ExecuteValidationStep>().await;

    let outcome = harness
        .engine
        .dispatch(
            correlation_id,
            ValidationEvent::StepFailed(ValidationStepFailed {
                correlation_id,
                step_id: second.step.step_id,
                step_index: second.step_index,
                reason: "3 misspelled words".to_string(),
            }),
        )
        .await
        .unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Applied {
            from: ValidationState::ExecutingStep,
            to: ValidationState::Failed,
            version: 4,
        }
    );

    assert!(harness.probe.take::<ExecuteValidationStep>().await.is_empty());
    let failed = harness.probe.take_one::<ValidationPipelineFailed>().await;
    assert!(failed.reason.contains("SpellCheck"));
    assert!(failed.reason.contains("3 misspelled words"));
    assert_eq!(failed.failed_stage, "executing_step");
    assert_eq!(
        harness.sink.statuses_for(document_id),
        vec![TargetStatus::ValidationFailed]
    );

    let instance = harness.engine.load(correlation_id).await.unwrap().unwrap();
    assert_eq!(instance.ordered_steps[0].status, StepStatus::Completed);
    assert_eq!(instance.ordered_steps[1].status, StepStatus::Failed);
    assert_eq!(instance.ordered_steps[2].status, StepStatus::Pending);

    // a late success for the failed step is absorbed
    let late = harness.complete(&second).await;
    assert_eq!(
        late,
        DispatchOutcome::Absorbed {
            state: ValidationState::Failed
        }
    );
}

#[tokio::test]
async fn test_unknown_process_fails_resolution() {
    let harness = Harness::new().await;
    let (correlation_id, document_id) = (Uuid::new_v4(), Uuid::new_v4());

    harness.start(correlation_id, Some(document_id), "Unknown").await;
    assert!(harness.probe.take::<ValidationStepsLoaded>().await.is_empty());
    let load_failed = harness.probe.take_one::<ValidationStepsLoadFailed>().await;
    assert!(load_failed.reason.contains("Unknown"));

    let outcome = harness
        .engine
        .dispatch(correlation_id, ValidationEvent::StepsLoadFailed(load_failed))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        DispatchOutcome::Applied {
            to: ValidationState::Failed,
            ..
        }
    ));

    let failed = harness.probe.take_one::<ValidationPipelineFailed>().await;
    assert_eq!(failed.failed_stage, "loading_steps");
    assert_eq!(
        harness.sink.statuses_for(document_id),
        vec![TargetStatus::ValidationFailed]
    );
}

#[tokio::test]
async fn test_missing_document_fails_without_status_update() {
    let harness = Harness::new().await;
    let correlation_id = Uuid::new_v4();

    harness.start(correlation_id, None, PROCESS).await;
    let load_failed = harness.probe.take_one::<ValidationStepsLoadFailed>().await;
    harness
        .engine
        .dispatch(correlation_id, ValidationEvent::StepsLoadFailed(load_failed))
        .await
        .unwrap();

    let failed = harness.probe.take_one::<ValidationPipelineFailed>().await;
    assert_eq!(failed.generated_document_id, None);
    assert!(harness.sink.updates().is_empty());
}

#[tokio::test]
async fn test_empty_pipeline_completes_immediately() {
    let harness = Harness::new().await;
    let (correlation_id, document_id) = (Uuid::new_v4(), Uuid::new_v4());

    harness.start(correlation_id, Some(document_id), "Memo").await;
    let loaded = harness.probe.take_one::<ValidationStepsLoaded>().await;
    assert!(loaded.steps.is_empty());

    let outcome = harness
        .engine
        .dispatch(correlation_id, ValidationEvent::StepsLoaded(loaded))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        DispatchOutcome::Applied {
            from: ValidationState::LoadingSteps,
            to: ValidationState::Completed,
            ..
        }
    ));
    assert!(harness.probe.take::<ExecuteValidationStep>().await.is_empty());
    let completed = harness.probe.take_one::<ValidationPipelineCompleted>().await;
    assert_eq!(completed.steps_executed, 0);
    assert_eq!(harness.sink.statuses_for(document_id), vec![TargetStatus::Validated]);
}

#[tokio::test]
async fn test_duplicate_step_result_is_ignored() {
    let harness = Harness::new().await;
    let (correlation_id, document_id) = (Uuid::new_v4(), Uuid::new_v4());
    harness.start_and_load(correlation_id, document_id).await;

    let first = harness.probe.take_one::<ExecuteValidationStep>().await;
    assert!(harness.complete(&first).await.is_applied());
    assert_eq!(harness.probe.take::<ExecuteValidationStep>().await.len(), 1);

    let duplicate = harness.complete(&first).await;
    assert_eq!(
        duplicate,
        DispatchOutcome::Ignored(IgnoreReason::GuardRejected {
            guard: "event_matches_current_step"
        })
    );
    assert!(harness.probe.take::<ExecuteValidationStep>().await.is_empty());

    let instance = harness.engine.load(correlation_id).await.unwrap().unwrap();
    assert_eq!(instance.state, ValidationState::ExecutingStep);
    assert_eq!(instance.current_step_index, 1);
}

#[tokio::test]
async fn test_repeated_start_and_orphan_events_are_ignored() {
    let harness = Harness::new().await;
    let (correlation_id, document_id) = (Uuid::new_v4(), Uuid::new_v4());
    harness.start(correlation_id, Some(document_id), PROCESS).await;

    let again = harness
        .engine
        .dispatch(
            correlation_id,
            ValidationEvent::Start(StartValidationPipeline {
                correlation_id,
                generated_document_id: Some(document_id),
                document_process_name: Some(PROCESS.to_string()),
            }),
        )
        .await
        .unwrap();
    assert_eq!(
        again,
        DispatchOutcome::Ignored(IgnoreReason::NoTransition {
            state: "loading_steps",
            event_type: message_types::START_VALIDATION_PIPELINE,
        })
    );

    let orphan_id = Uuid::new_v4();
    let orphan = harness
        .engine
        .dispatch(
            orphan_id,
            ValidationEvent::StepCompleted(ValidationStepCompleted {
                correlation_id: orphan_id,
                step_id: Uuid::new_v4(),
                step_index: 0,
            }),
        )
        .await
        .unwrap();
    assert_eq!(orphan, DispatchOutcome::Ignored(IgnoreReason::NoInstance));
    assert!(harness.engine.load(orphan_id).await.unwrap().is_none());
    assert_eq!(harness.store.record_count(), 1);
}

struct UnavailableResolver;

#[async_trait]
impl StepPipelineResolver for UnavailableResolver {
    async fn load_steps(
        &self,
        _context: &ResolutionContext,
    ) -> Result<Vec<StepDefinition>, ResolutionError> {
        Err(ResolutionError::Unavailable {
            message: "configuration database unreachable".to_string(),
        })
    }
}

#[tokio::test]
async fn test_unavailable_resolver_leaves_nothing_saved() {
    let harness = Harness::with_resolver(Arc::new(UnavailableResolver)).await;
    let correlation_id = Uuid::new_v4();

    let result = harness
        .engine
        .dispatch(
            correlation_id,
            ValidationEvent::Start(StartValidationPipeline {
                correlation_id,
                generated_document_id: Some(Uuid::new_v4()),
                document_process_name: Some(PROCESS.to_string()),
            }),
        )
        .await;

    let error = result.unwrap_err();
    assert!(matches!(error, EngineError::Activity(_)));
    assert!(error.is_transient());
    assert!(harness.engine.load(correlation_id).await.unwrap().is_none());
    assert!(harness.probe.take::<ValidationStepsLoadFailed>().await.is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Step results delivered in any order, duplicated or stale, never move
    /// the step index backwards and only the current step's result applies
    #[test]
    fn step_index_is_monotonic(step_count in 0usize..5, deliveries in prop::collection::vec(0usize..6, 0..16)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let execution_types: Vec<String> = (0..step_count).map(|i| format!("Step{i}")).collect();
            let source = StaticPipelineConfiguration::default().with_pipeline(
                "Generated",
                execution_types
                    .iter()
                    .enumerate()
                    .map(|(i, t)| configured(t, i as i32 + 1))
                    .collect(),
            );
            let harness =
                Harness::with_resolver(Arc::new(ConfiguredStepResolver::new(Arc::new(source)))).await;
            let correlation_id = Uuid::new_v4();

            harness.start(correlation_id, Some(Uuid::new_v4()), "Generated").await;
            let loaded = harness.probe.take_one::<ValidationStepsLoaded>().await;
            let steps = loaded.steps.clone();
            harness
                .engine
                .dispatch(correlation_id, ValidationEvent::StepsLoaded(loaded))
                .await
                .unwrap();

            let mut previous = harness.engine.load(correlation_id).await.unwrap().unwrap().current_step_index;
            for index in deliveries {
                let Some(step) = steps.get(index) else { continue };
                let outcome = harness
                    .engine
                    .dispatch(
                        correlation_id,
                        ValidationEvent::StepCompleted(ValidationStepCompleted {
                            correlation_id,
                            step_id: step.step_id,
                            step_index: index as i32,
                        }),
                    )
                    .await
                    .unwrap();

                let instance = harness.engine.load(correlation_id).await.unwrap().unwrap();
                assert!(instance.current_step_index >= previous);
                assert_eq!(outcome.is_applied(), index as i32 == previous);
                assert_eq!(
                    instance.state == ValidationState::Completed,
                    instance.current_step_index == step_count as i32
                );
                previous = instance.current_step_index;
            }
        });
    }
}
