//! Consume loop for one subscription queue.
//!
//! ```text
//! receive(prefetch, lock) ──► [in-hand permits] ──► renew lock every lock/2
//!                                    │
//!                                    └──► [handler permits] ──► handle ──► ack | release(delay) | dead-letter
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::handler::{HandlerError, MessageHandler};
use crate::config::{MessagingConfig, SubscriptionConfig};
use crate::constants::defaults;
use crate::logging::{log_error, log_message_operation};
use crate::messaging::{MessageEnvelope, MessagingProvider, QueuedMessage, ReceiptHandle};
use crate::resilience::{RetryDecision, RetryPolicy};

/// Per-subscription concurrency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionSettings {
    /// Handlers running at once
    pub concurrency_limit: usize,
    /// Messages requested per receive
    pub prefetch_count: usize,
}

impl SubscriptionSettings {
    pub fn new(concurrency_limit: usize, prefetch_count: usize) -> Self {
        Self {
            concurrency_limit: concurrency_limit.max(1),
            prefetch_count: prefetch_count.max(1),
        }
    }

    /// One message at a time for subscriptions that mutate saga state
    pub fn saga() -> Self {
        Self::new(defaults::SAGA_CONCURRENCY_LIMIT, defaults::SAGA_PREFETCH_COUNT)
    }

    pub fn broadcast() -> Self {
        Self::new(
            defaults::BROADCAST_CONCURRENCY_LIMIT,
            defaults::BROADCAST_PREFETCH_COUNT,
        )
    }

    pub fn from_config(config: &SubscriptionConfig) -> Self {
        Self::new(config.concurrency_limit, config.prefetch_count)
    }

    /// Messages held by the loop at once, running or waiting for a handler permit
    fn in_hand_limit(&self) -> usize {
        self.concurrency_limit.max(self.prefetch_count)
    }
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self::saga()
    }
}

/// Visibility lock applied to received messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    pub lock_duration: Duration,
    /// Total time a single message's lock may be renewed for
    pub max_auto_renew: Duration,
    /// Idle wait between empty receives
    pub poll_interval: Duration,
}

impl LockSettings {
    pub fn from_config(config: &MessagingConfig) -> Self {
        Self {
            lock_duration: config.lock_duration(),
            max_auto_renew: config.max_auto_renew(),
            poll_interval: config.poll_interval(),
        }
    }

    fn renew_interval(&self) -> Duration {
        (self.lock_duration / 2).max(Duration::from_millis(10))
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lock_duration: Duration::from_secs(defaults::LOCK_DURATION_SECONDS),
            max_auto_renew: Duration::from_secs(defaults::MAX_AUTO_RENEW_SECONDS),
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
        }
    }
}

pub(crate) struct ConsumerLoop {
    pub(crate) queue_name: String,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) provider: Arc<MessagingProvider>,
    pub(crate) retry_policy: Arc<RetryPolicy>,
    pub(crate) settings: SubscriptionSettings,
    pub(crate) lock: LockSettings,
}

impl ConsumerLoop {
    /// Run until `shutdown` flips to true, then wait for in-flight handlers
    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let in_hand_limit = self.settings.in_hand_limit();
        let in_hand = Arc::new(Semaphore::new(in_hand_limit));
        let handler_permits = Arc::new(Semaphore::new(self.settings.concurrency_limit));
        let this = Arc::new(self);

        info!(
            queue_name = %this.queue_name,
            handler = this.handler.name(),
            concurrency_limit = this.settings.concurrency_limit,
            prefetch_count = this.settings.prefetch_count,
            "Subscription consumer started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let available = in_hand.available_permits();
            if available == 0 {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    permit = in_hand.clone().acquire_owned() => drop(permit),
                }
                continue;
            }

            let batch = available.min(this.settings.prefetch_count);
            let received = this
                .provider
                .receive_messages::<MessageEnvelope>(&this.queue_name, batch, this.lock.lock_duration)
                .await;

            match received {
                Ok(messages) if messages.is_empty() => {
                    if !wait_or_shutdown(&mut shutdown, this.lock.poll_interval).await {
                        break;
                    }
                }
                Ok(messages) => {
                    for queued in messages {
                        let Ok(slot) = in_hand.clone().try_acquire_owned() else {
                            // unreachable while this loop is the only acquirer
                            warn!(queue_name = %this.queue_name, "No in-hand permit for received message");
                            break;
                        };
                        let consumer = this.clone();
                        let permits = handler_permits.clone();
                        tokio::spawn(async move {
                            consumer.process(queued, permits, slot).await;
                        });
                    }
                }
                Err(e) => {
                    log_error("dispatcher", "receive_messages", &e.to_string(), None);
                    if !wait_or_shutdown(&mut shutdown, this.lock.poll_interval).await {
                        break;
                    }
                }
            }
        }

        // drain: every in-hand permit comes back once its message is settled
        if let Ok(permits) = u32::try_from(in_hand_limit) {
            let _ = in_hand.acquire_many(permits).await;
        }
        info!(queue_name = %this.queue_name, "Subscription consumer stopped");
    }

    async fn process(
        self: Arc<Self>,
        queued: QueuedMessage<MessageEnvelope>,
        handler_permits: Arc<Semaphore>,
        _slot: OwnedSemaphorePermit,
    ) {
        let QueuedMessage {
            receipt_handle,
            message: mut envelope,
            receive_count,
            ..
        } = queued;
        envelope.delivery_attempt = receive_count.max(1);

        let renewal = self.spawn_lock_renewal(receipt_handle.clone(), envelope.correlation_id);

        let Ok(_permit) = handler_permits.acquire_owned().await else {
            renewal.abort();
            return;
        };

        debug!(
            correlation_id = %envelope.correlation_id,
            queue_name = %self.queue_name,
            message_type = %envelope.message_type,
            delivery_attempt = envelope.delivery_attempt,
            handler = self.handler.name(),
            "Handling message"
        );

        let result = match AssertUnwindSafe(self.handler.handle(&envelope))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => Err(HandlerError::transient(format!(
                "handler {} panicked",
                self.handler.name()
            ))),
        };
        renewal.abort();

        self.settle(&envelope, &receipt_handle, result).await;
    }

    async fn settle(
        &self,
        envelope: &MessageEnvelope,
        receipt_handle: &ReceiptHandle,
        result: Result<(), HandlerError>,
    ) {
        let attempt = envelope.delivery_attempt;
        let outcome = match result {
            Ok(()) => {
                log_message_operation(
                    "ACK",
                    &self.queue_name,
                    &envelope.message_type,
                    envelope.correlation_id,
                    attempt,
                    None,
                );
                self.provider
                    .ack_message(&self.queue_name, receipt_handle)
                    .await
            }
            Err(error @ HandlerError::Transient { .. }) => {
                match self.retry_policy.decide(&envelope.message_type, attempt) {
                    RetryDecision::Redeliver(delay) => {
                        let details = format!("retry in {}ms: {}", delay.as_millis(), error);
                        log_message_operation(
                            "RELEASE",
                            &self.queue_name,
                            &envelope.message_type,
                            envelope.correlation_id,
                            attempt,
                            Some(&details),
                        );
                        self.provider
                            .release_message(&self.queue_name, receipt_handle, delay)
                            .await
                    }
                    RetryDecision::DeadLetter => {
                        self.dead_letter(envelope, receipt_handle, &error).await
                    }
                }
            }
            Err(error) => self.dead_letter(envelope, receipt_handle, &error).await,
        };

        if let Err(e) = outcome {
            // the lock expires and the transport redelivers
            log_error(
                "dispatcher",
                "settle_message",
                &e.to_string(),
                Some(envelope.correlation_id),
            );
        }
    }

    async fn dead_letter(
        &self,
        envelope: &MessageEnvelope,
        receipt_handle: &ReceiptHandle,
        error: &HandlerError,
    ) -> Result<(), crate::messaging::MessagingError> {
        log_message_operation(
            "DEAD_LETTER",
            &self.queue_name,
            &envelope.message_type,
            envelope.correlation_id,
            envelope.delivery_attempt,
            Some(&error.to_string()),
        );
        self.provider
            .nack_message(&self.queue_name, receipt_handle, false)
            .await?;
        self.handler.on_retries_exhausted(envelope, error).await;
        Ok(())
    }

    fn spawn_lock_renewal(&self, receipt_handle: ReceiptHandle, correlation_id: uuid::Uuid) -> JoinHandle<()> {
        let provider = self.provider.clone();
        let queue_name = self.queue_name.clone();
        let lock = self.lock;

        tokio::spawn(async move {
            let started = Instant::now();
            loop {
                tokio::time::sleep(lock.renew_interval()).await;
                if started.elapsed() >= lock.max_auto_renew {
                    warn!(
                        correlation_id = %correlation_id,
                        queue_name = %queue_name,
                        max_auto_renew_secs = lock.max_auto_renew.as_secs(),
                        "Lock renewal limit reached; message may be redelivered"
                    );
                    break;
                }
                if let Err(e) = provider
                    .extend_visibility(&queue_name, &receipt_handle, lock.lock_duration)
                    .await
                {
                    warn!(
                        correlation_id = %correlation_id,
                        queue_name = %queue_name,
                        error = %e,
                        "Lock renewal failed"
                    );
                    break;
                }
            }
        })
    }
}

/// Sleep for `interval`; false when shutdown was requested meanwhile
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, interval: Duration) -> bool {
    tokio::select! {
        changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
        _ = tokio::time::sleep(interval) => true,
    }
}
