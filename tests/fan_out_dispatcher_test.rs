//! # Dispatcher Tests
//!
//! Competing and fan-out subscriptions, redelivery and dead-lettering over
//! the in-memory transport, plus one full worker replica wired from
//! configuration.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use common::{eventually, publisher, RecordingStatusSink, ScriptedExecutor, NAMESPACE};
use docflow_core::collaborators::StepOutcome;
use docflow_core::config::{
    ConfigManager, ConfiguredStepConfig, DocflowConfig, ValidationPipelineConfig,
};
use docflow_core::constants::message_types;
use docflow_core::dispatcher::{
    FanOutDispatcher, HandlerError, LockSettings, MessageHandler, SubscriptionKind,
    SubscriptionSettings,
};
use docflow_core::messaging::messages::{RestartWorker, StartValidationPipeline};
use docflow_core::messaging::{MessageEnvelope, MessageRouterKind, MessagingProvider};
use docflow_core::pipeline::ValidationState;
use docflow_core::resilience::{DelayRange, RetryPolicy, RetryPolicySpec};
use docflow_core::saga::TargetStatus;
use docflow_core::worker::{DocflowWorker, WorkerDependencies};

const WAIT: Duration = Duration::from_secs(5);

fn fast_lock() -> LockSettings {
    LockSettings {
        lock_duration: Duration::from_secs(30),
        max_auto_renew: Duration::from_secs(60),
        poll_interval: Duration::from_millis(10),
    }
}

/// Two redeliveries a few milliseconds apart
fn fast_retries() -> Arc<RetryPolicy> {
    let range = DelayRange {
        min: Duration::from_millis(5),
        max: Duration::from_millis(15),
    };
    Arc::new(RetryPolicy::new(RetryPolicySpec::new(vec![range, range], None)))
}

fn dispatcher(provider: &Arc<MessagingProvider>, replica_id: &str) -> FanOutDispatcher {
    FanOutDispatcher::new(
        provider.clone(),
        MessageRouterKind::default(),
        NAMESPACE,
        replica_id,
        fast_retries(),
        fast_lock(),
    )
}

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    AlwaysTransient,
    Permanent,
    PanicOnce,
}

struct CountingHandler {
    behavior: Behavior,
    handled: AtomicUsize,
    attempts_seen: Mutex<Vec<u32>>,
    exhausted: Mutex<Vec<(u32, HandlerError)>>,
}

impl CountingHandler {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            handled: AtomicUsize::new(0),
            attempts_seen: Mutex::new(Vec::new()),
            exhausted: Mutex::new(Vec::new()),
        })
    }

    fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }

    fn exhausted(&self) -> Vec<(u32, HandlerError)> {
        self.exhausted.lock().clone()
    }
}

#[async_trait]
impl MessageHandler for CountingHandler {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn handle(&self, envelope: &MessageEnvelope) -> Result<(), HandlerError> {
        let seen = self.handled.fetch_add(1, Ordering::SeqCst);
        self.attempts_seen.lock().push(envelope.delivery_attempt);
        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::AlwaysTransient => Err(HandlerError::transient("store unavailable")),
            Behavior::Permanent => Err(HandlerError::permanent("malformed payload")),
            Behavior::PanicOnce => {
                if seen == 0 {
                    panic!("handler bug on first delivery");
                }
                Ok(())
            }
        }
    }

    async fn on_retries_exhausted(&self, envelope: &MessageEnvelope, error: &HandlerError) {
        self.exhausted
            .lock()
            .push((envelope.delivery_attempt, error.clone()));
    }
}

fn restart(reason: &str, target_replica: Option<&str>) -> RestartWorker {
    RestartWorker {
        correlation_id: Uuid::new_v4(),
        reason: reason.to_string(),
        target_replica: target_replica.map(String::from),
    }
}

#[tokio::test]
async fn test_competing_subscription_delivers_each_message_once() {
    let provider = Arc::new(MessagingProvider::in_memory());
    let replica_a = dispatcher(&provider, "replica-a");
    let replica_b = dispatcher(&provider, "replica-b");
    let handler_a = CountingHandler::new(Behavior::Succeed);
    let handler_b = CountingHandler::new(Behavior::Succeed);

    let info_a = replica_a
        .register_competing(message_types::RESTART_WORKER, handler_a.clone(), SubscriptionSettings::new(2, 2))
        .await
        .unwrap();
    let info_b = replica_b
        .register_competing(message_types::RESTART_WORKER, handler_b.clone(), SubscriptionSettings::new(2, 2))
        .await
        .unwrap();
    assert_eq!(info_a.queue_name, "docflow.RestartWorker.competing");
    assert_eq!(info_a.queue_name, info_b.queue_name);
    assert_eq!(info_a.kind, SubscriptionKind::Competing);

    let publisher = publisher(provider.clone());
    for i in 0..10 {
        let recipients = publisher
            .publish_message(&restart(&format!("rollout {i}"), None))
            .await
            .unwrap();
        assert_eq!(recipients, 1);
    }

    assert!(
        eventually(WAIT, || async { handler_a.handled() + handler_b.handled() >= 10 }).await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handler_a.handled() + handler_b.handled(), 10);

    replica_a.shutdown().await.unwrap();
    replica_b.shutdown().await.unwrap();

    // the shared queue outlives both replicas
    let in_memory = provider.as_in_memory().unwrap();
    assert!(in_memory
        .queue_names()
        .await
        .contains(&"docflow.RestartWorker.competing".to_string()));
    assert_eq!(in_memory.queue_length("docflow.RestartWorker.competing").await, 0);
}

#[tokio::test]
async fn test_fan_out_subscription_reaches_every_replica() {
    let provider = Arc::new(MessagingProvider::in_memory());
    let replica_a = dispatcher(&provider, "replica-a");
    let replica_b = dispatcher(&provider, "replica-b");
    let handler_a = CountingHandler::new(Behavior::Succeed);
    let handler_b = CountingHandler::new(Behavior::Succeed);

    replica_a
        .register_fan_out(message_types::RESTART_WORKER, handler_a.clone(), SubscriptionSettings::broadcast())
        .await
        .unwrap();
    replica_b
        .register_fan_out(message_types::RESTART_WORKER, handler_b.clone(), SubscriptionSettings::broadcast())
        .await
        .unwrap();

    let recipients = publisher(provider.clone())
        .publish_message(&restart("config rollout", None))
        .await
        .unwrap();
    assert_eq!(recipients, 2);

    assert!(eventually(WAIT, || async { handler_a.handled() == 1 && handler_b.handled() == 1 }).await);

    replica_a.shutdown().await.unwrap();
    let in_memory = provider.as_in_memory().unwrap();
    let queues = in_memory.queue_names().await;
    assert!(!queues.contains(&"docflow.RestartWorker.replica-a".to_string()));
    assert!(queues.contains(&"docflow.RestartWorker.replica-b".to_string()));

    replica_b.shutdown().await.unwrap();
    assert!(in_memory.bound_queues("docflow.RestartWorker").await.is_empty());
}

#[tokio::test]
async fn test_transient_failures_redeliver_then_dead_letter() {
    let provider = Arc::new(MessagingProvider::in_memory());
    let replica = dispatcher(&provider, "replica-a");
    let handler = CountingHandler::new(Behavior::AlwaysTransient);
    let info = replica
        .register_competing(message_types::RESTART_WORKER, handler.clone(), SubscriptionSettings::saga())
        .await
        .unwrap();

    publisher(provider.clone())
        .publish_message(&restart("flaky", None))
        .await
        .unwrap();

    assert!(eventually(WAIT, || async { !handler.exhausted().is_empty() }).await);
    assert_eq!(handler.handled(), 3);
    assert_eq!(*handler.attempts_seen.lock(), vec![1, 2, 3]);

    let exhausted = handler.exhausted();
    assert_eq!(exhausted.len(), 1);
    assert_eq!(exhausted[0].0, 3);
    assert!(exhausted[0].1.is_transient());

    let in_memory = provider.as_in_memory().unwrap();
    assert_eq!(in_memory.dead_letters(&info.queue_name).await.len(), 1);
    assert_eq!(in_memory.queue_length(&info.queue_name).await, 0);
    replica.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_permanent_failure_dead_letters_immediately() {
    let provider = Arc::new(MessagingProvider::in_memory());
    let replica = dispatcher(&provider, "replica-a");
    let handler = CountingHandler::new(Behavior::Permanent);
    let info = replica
        .register_competing(message_types::RESTART_WORKER, handler.clone(), SubscriptionSettings::saga())
        .await
        .unwrap();

    publisher(provider.clone())
        .publish_message(&restart("bad", None))
        .await
        .unwrap();

    assert!(eventually(WAIT, || async { !handler.exhausted().is_empty() }).await);
    assert_eq!(handler.handled(), 1);
    assert_eq!(
        handler.exhausted()[0].1,
        HandlerError::permanent("malformed payload")
    );
    let dead = provider
        .as_in_memory()
        .unwrap()
        .dead_letters(&info.queue_name)
        .await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0]["message_type"], "RestartWorker");
    replica.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_undecodable_payload_does_not_block_the_queue() {
    let provider = Arc::new(MessagingProvider::in_memory());
    let replica = dispatcher(&provider, "replica-a");
    let handler = CountingHandler::new(Behavior::Succeed);
    let info = replica
        .register_competing(message_types::RESTART_WORKER, handler.clone(), SubscriptionSettings::saga())
        .await
        .unwrap();

    provider
        .send_message(&info.queue_name, &serde_json::json!({ "garbage": true }))
        .await
        .unwrap();
    publisher(provider.clone())
        .publish_message(&restart("behind a bad payload", None))
        .await
        .unwrap();

    assert!(eventually(WAIT, || async { handler.handled() == 1 }).await);
    let in_memory = provider.as_in_memory().unwrap();
    assert!(eventually(WAIT, || async { in_memory.queue_length(&info.queue_name).await == 0 }).await);
    assert_eq!(
        in_memory.dead_letters(&info.queue_name).await,
        vec![serde_json::json!({ "garbage": true })]
    );
    assert!(handler.exhausted().is_empty());
    replica.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handler_panic_is_retried() {
    let provider = Arc::new(MessagingProvider::in_memory());
    let replica = dispatcher(&provider, "replica-a");
    let handler = CountingHandler::new(Behavior::PanicOnce);
    let info = replica
        .register_competing(message_types::RESTART_WORKER, handler.clone(), SubscriptionSettings::saga())
        .await
        .unwrap();

    publisher(provider.clone())
        .publish_message(&restart("panics", None))
        .await
        .unwrap();

    assert!(eventually(WAIT, || async { handler.handled() == 2 }).await);
    let in_memory = provider.as_in_memory().unwrap();
    assert!(eventually(WAIT, || async { in_memory.queue_length(&info.queue_name).await == 0 }).await);
    assert!(handler.exhausted().is_empty());
    assert!(in_memory.dead_letters(&info.queue_name).await.is_empty());
    replica.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_register_after_shutdown_fails() {
    let provider = Arc::new(MessagingProvider::in_memory());
    let replica = dispatcher(&provider, "replica-a");
    replica.shutdown().await.unwrap();

    let result = replica
        .register_fan_out(
            message_types::RESTART_WORKER,
            CountingHandler::new(Behavior::Succeed),
            SubscriptionSettings::broadcast(),
        )
        .await;
    assert!(result.is_err());
    assert!(replica.subscriptions().is_empty());
}

fn worker_config() -> Arc<ConfigManager> {
    let mut config = DocflowConfig::default();
    config.environment = "test".to_string();
    config.messaging.poll_interval_ms = 10;
    config.worker.replica_id = Some("replica-e2e".to_string());
    config.pipelines.validation = vec![ValidationPipelineConfig {
        document_process: "ProjectReport".to_string(),
        steps: vec![
            ConfiguredStepConfig {
                execution_type: "SpellCheck".to_string(),
                order: 2,
            },
            ConfiguredStepConfig {
                execution_type: "SchemaCheck".to_string(),
                order: 1,
            },
        ],
    }];
    ConfigManager::from_config(config).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_runs_validation_end_to_end() {
    let config = worker_config();
    let sink = RecordingStatusSink::new();
    let schema = ScriptedExecutor::passing("SchemaCheck");
    let spelling = ScriptedExecutor::scripted(
        "SpellCheck",
        vec![Ok(StepOutcome::Completed)],
    );
    let deps = WorkerDependencies::in_memory(&config)
        .with_status_sink(sink.clone())
        .with_executor(schema.clone())
        .with_executor(spelling.clone());

    let worker = DocflowWorker::bootstrap(config, deps).await.unwrap();
    let subscriptions = worker.start().await.unwrap();
    assert!(subscriptions
        .iter()
        .any(|s| s.message_type == message_types::EXECUTE_VALIDATION_STEP
            && s.kind == SubscriptionKind::Competing));
    assert!(subscriptions
        .iter()
        .any(|s| s.queue_name == "docflow.RestartWorker.replica-e2e"));

    // starting twice registers nothing new
    assert_eq!(worker.start().await.unwrap(), subscriptions);
    assert_eq!(worker.dispatcher().subscriptions().len(), subscriptions.len());

    let correlation_id = Uuid::new_v4();
    let document_id = Uuid::new_v4();
    worker
        .publisher()
        .publish_message(&StartValidationPipeline {
            correlation_id,
            generated_document_id: Some(document_id),
            document_process_name: Some("ProjectReport".to_string()),
        })
        .await
        .unwrap();

    let engine = worker.validation_engine().unwrap().clone();
    let completed = eventually(WAIT, || {
        let engine = engine.clone();
        async move {
            matches!(
                engine.load(correlation_id).await,
                Ok(Some(instance)) if instance.state == ValidationState::Completed
            )
        }
    })
    .await;
    assert!(completed);

    assert!(eventually(WAIT, || async { !sink.updates().is_empty() }).await);
    assert_eq!(sink.statuses_for(document_id), vec![TargetStatus::Validated]);

    let schema_calls = schema.calls();
    let spelling_calls = spelling.calls();
    assert_eq!(schema_calls.len(), 1);
    assert_eq!(spelling_calls.len(), 1);
    assert_eq!(schema_calls[0].step_index, 0);
    assert_eq!(spelling_calls[0].step_index, 1);
    assert_eq!(spelling_calls[0].target_id, document_id);

    let mut restart_signal = worker.restart_signal();
    worker
        .publisher()
        .publish_message(&restart("drain node", Some("replica-e2e")))
        .await
        .unwrap();
    tokio::time::timeout(WAIT, restart_signal.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        restart_signal.borrow().as_deref(),
        Some("drain node")
    );

    worker.shutdown().await.unwrap();
}
