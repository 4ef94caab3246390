use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::consumer::{ConsumerLoop, LockSettings, SubscriptionSettings};
use super::handler::MessageHandler;
use crate::messaging::{MessageRouterKind, MessagingError, MessagingProvider};
use crate::resilience::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// One queue shared by every replica; each message handled once
    Competing,
    /// One queue per replica; every replica gets its own copy
    FanOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub message_type: String,
    pub queue_name: String,
    pub topic: String,
    pub kind: SubscriptionKind,
    pub handler: &'static str,
    pub settings: SubscriptionSettings,
}

/// Owns this replica's subscriptions and their consume loops
pub struct FanOutDispatcher {
    provider: Arc<MessagingProvider>,
    router: MessageRouterKind,
    namespace: String,
    replica_id: String,
    retry_policy: Arc<RetryPolicy>,
    lock: LockSettings,
    shutdown_tx: watch::Sender<bool>,
    subscriptions: Mutex<Vec<SubscriptionInfo>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for FanOutDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutDispatcher")
            .field("provider", &self.provider.provider_name())
            .field("namespace", &self.namespace)
            .field("replica_id", &self.replica_id)
            .field("subscriptions", &self.subscriptions.lock().len())
            .finish()
    }
}

impl FanOutDispatcher {
    pub fn new(
        provider: Arc<MessagingProvider>,
        router: MessageRouterKind,
        namespace: impl Into<String>,
        replica_id: impl Into<String>,
        retry_policy: Arc<RetryPolicy>,
        lock: LockSettings,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            provider,
            router,
            namespace: namespace.into(),
            replica_id: replica_id.into(),
            retry_policy,
            lock,
            shutdown_tx,
            subscriptions: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    pub fn retry_policy(&self) -> &Arc<RetryPolicy> {
        &self.retry_policy
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.subscriptions.lock().clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Subscribe to the queue shared by every replica: `{namespace}.{message_type}.competing`
    pub async fn register_competing(
        &self,
        message_type: &str,
        handler: Arc<dyn MessageHandler>,
        settings: SubscriptionSettings,
    ) -> Result<SubscriptionInfo, MessagingError> {
        let queue_name = self.router.competing_queue(&self.namespace, message_type);
        self.register(
            message_type,
            queue_name,
            SubscriptionKind::Competing,
            handler,
            settings,
        )
        .await
    }

    /// Subscribe this replica's own queue: `{namespace}.{message_type}.{replica_id}`
    pub async fn register_fan_out(
        &self,
        message_type: &str,
        handler: Arc<dyn MessageHandler>,
        settings: SubscriptionSettings,
    ) -> Result<SubscriptionInfo, MessagingError> {
        let queue_name = self
            .router
            .fan_out_queue(&self.namespace, message_type, &self.replica_id);
        self.register(
            message_type,
            queue_name,
            SubscriptionKind::FanOut,
            handler,
            settings,
        )
        .await
    }

    async fn register(
        &self,
        message_type: &str,
        queue_name: String,
        kind: SubscriptionKind,
        handler: Arc<dyn MessageHandler>,
        settings: SubscriptionSettings,
    ) -> Result<SubscriptionInfo, MessagingError> {
        if self.is_shutting_down() {
            return Err(MessagingError::internal(format!(
                "dispatcher for {} is shut down",
                self.replica_id
            )));
        }

        let topic = self.router.topic(&self.namespace, message_type);
        self.provider.ensure_queue(&queue_name).await?;
        self.provider.bind_queue(&queue_name, &topic).await?;

        let info = SubscriptionInfo {
            message_type: message_type.to_string(),
            queue_name: queue_name.clone(),
            topic,
            kind,
            handler: handler.name(),
            settings,
        };

        let consumer = ConsumerLoop {
            queue_name,
            handler,
            provider: self.provider.clone(),
            retry_policy: self.retry_policy.clone(),
            settings,
            lock: self.lock,
        };
        let task = tokio::spawn(consumer.run(self.shutdown_tx.subscribe()));

        info!(
            replica_id = %self.replica_id,
            message_type = %info.message_type,
            queue_name = %info.queue_name,
            kind = ?info.kind,
            handler = info.handler,
            "Subscription registered"
        );

        self.tasks.lock().push(task);
        self.subscriptions.lock().push(info.clone());
        Ok(info)
    }

    /// Stop every consume loop, wait for in-flight handlers, then remove
    /// this replica's fan-out queues
    pub async fn shutdown(&self) -> Result<(), MessagingError> {
        if self.shutdown_tx.send_replace(true) {
            return Ok(());
        }

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(replica_id = %self.replica_id, error = %e, "Consumer task ended abnormally");
            }
        }

        let fan_out_queues: Vec<String> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|s| s.kind == SubscriptionKind::FanOut)
            .map(|s| s.queue_name.clone())
            .collect();
        for queue_name in &fan_out_queues {
            self.provider.delete_queue(queue_name).await?;
        }

        info!(
            replica_id = %self.replica_id,
            removed_queues = fan_out_queues.len(),
            "Dispatcher shut down"
        );
        Ok(())
    }
}
