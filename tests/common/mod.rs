//! Shared fixtures for the integration tests: in-memory engines, a probe
//! that captures published messages, and scriptable collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use docflow_core::collaborators::{
    CollaboratorError, StepExecutor, StepOutcome, StepRequest, TargetStatusSink,
};
use docflow_core::messaging::{
    MessageContract, MessageEnvelope, MessagePublisher, MessageRouterKind, MessagingProvider,
};
use docflow_core::pipeline::ExecutionType;
use docflow_core::saga::{
    DispatchContext, EffectExecutor, EngineSettings, SagaDefinition, SagaEngine, TargetStatus,
};
use docflow_core::store::SagaStore;

pub const NAMESPACE: &str = "docflow";
pub const REPLICA: &str = "replica-test";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub correlation_id: Uuid,
    pub target_id: Uuid,
    pub status: TargetStatus,
    pub detail: Option<String>,
}

/// Records every status update; can be told to fail the next N calls
#[derive(Debug, Default)]
pub struct RecordingStatusSink {
    updates: Mutex<Vec<StatusUpdate>>,
    failures_remaining: AtomicUsize,
}

impl RecordingStatusSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().clone()
    }

    pub fn statuses_for(&self, target_id: Uuid) -> Vec<TargetStatus> {
        self.updates
            .lock()
            .iter()
            .filter(|u| u.target_id == target_id)
            .map(|u| u.status)
            .collect()
    }
}

#[async_trait]
impl TargetStatusSink for RecordingStatusSink {
    async fn update_status(
        &self,
        correlation_id: Uuid,
        target_id: Uuid,
        status: TargetStatus,
        detail: Option<&str>,
    ) -> Result<(), CollaboratorError> {
        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(CollaboratorError::unavailable("entity-store", "connection reset"));
        }
        self.updates.lock().push(StatusUpdate {
            correlation_id,
            target_id,
            status,
            detail: detail.map(String::from),
        });
        Ok(())
    }
}

/// Captures messages published to a set of topics through side queues
pub struct Probe {
    provider: Arc<MessagingProvider>,
    queues: HashMap<&'static str, String>,
}

impl Probe {
    pub async fn attach(provider: Arc<MessagingProvider>, message_types: &[&'static str]) -> Self {
        let router = MessageRouterKind::default();
        let mut queues = HashMap::new();
        for &message_type in message_types {
            let queue_name = format!("{NAMESPACE}.{message_type}.probe");
            provider.ensure_queue(&queue_name).await.unwrap();
            provider
                .bind_queue(&queue_name, &router.topic(NAMESPACE, message_type))
                .await
                .unwrap();
            queues.insert(message_type, queue_name);
        }
        Self { provider, queues }
    }

    /// Every envelope captured for `message_type` since the last take
    pub async fn take_envelopes(&self, message_type: &str) -> Vec<MessageEnvelope> {
        let queue_name = self
            .queues
            .get(message_type)
            .unwrap_or_else(|| panic!("probe not attached to {message_type}"));
        let received = self
            .provider
            .receive_messages::<MessageEnvelope>(queue_name, 1000, Duration::from_secs(60))
            .await
            .unwrap();
        let mut envelopes = Vec::with_capacity(received.len());
        for queued in received {
            self.provider
                .ack_message(queue_name, &queued.receipt_handle)
                .await
                .unwrap();
            envelopes.push(queued.message);
        }
        envelopes
    }

    pub async fn take<M: MessageContract>(&self) -> Vec<M> {
        self.take_envelopes(M::MESSAGE_TYPE)
            .await
            .iter()
            .map(|envelope| envelope.decode::<M>().unwrap())
            .collect()
    }

    /// Exactly one message of type `M`
    pub async fn take_one<M: MessageContract>(&self) -> M {
        let mut messages = self.take::<M>().await;
        assert_eq!(
            messages.len(),
            1,
            "expected exactly one {} but got {}",
            M::MESSAGE_TYPE,
            messages.len()
        );
        messages.remove(0)
    }
}

pub fn publisher(provider: Arc<MessagingProvider>) -> MessagePublisher {
    MessagePublisher::new(provider, MessageRouterKind::default(), NAMESPACE)
}

pub fn engine<D: SagaDefinition>(
    definition: D,
    store: Arc<dyn SagaStore>,
    provider: Arc<MessagingProvider>,
    sink: Arc<dyn TargetStatusSink>,
    settings: EngineSettings,
) -> Arc<SagaEngine<D>> {
    Arc::new(SagaEngine::new(
        definition,
        store,
        EffectExecutor::new(publisher(provider), sink),
        DispatchContext::new(NAMESPACE, REPLICA),
        settings,
    ))
}

/// Step executor that answers from a script and records each request
pub struct ScriptedExecutor {
    execution_type: ExecutionType,
    results: Mutex<Vec<Result<StepOutcome, CollaboratorError>>>,
    calls: Mutex<Vec<StepRequest>>,
}

impl ScriptedExecutor {
    /// Always completes
    pub fn passing(execution_type: &str) -> Arc<Self> {
        Self::scripted(execution_type, Vec::new())
    }

    /// Answers with `results` in order, then completes
    pub fn scripted(
        execution_type: &str,
        results: Vec<Result<StepOutcome, CollaboratorError>>,
    ) -> Arc<Self> {
        let mut results = results;
        results.reverse();
        Arc::new(Self {
            execution_type: ExecutionType::new(execution_type),
            results: Mutex::new(results),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<StepRequest> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    fn execution_type(&self) -> ExecutionType {
        self.execution_type.clone()
    }

    async fn execute(&self, request: &StepRequest) -> Result<StepOutcome, CollaboratorError> {
        self.calls.lock().push(request.clone());
        self.results.lock().pop().unwrap_or(Ok(StepOutcome::Completed))
    }
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
