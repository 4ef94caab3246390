//! # Messaging Provider Enum
//!
//! Enum dispatch over the transport providers. `MessagingService` has generic
//! methods and is not object safe, so callers hold an
//! `Arc<MessagingProvider>` instead of an `Arc<dyn MessagingService>`.

use std::time::Duration;

use super::providers::{InMemoryMessagingService, PostgresMessagingService};
use super::traits::{MessagingService, QueueMessage};
use super::types::{MessageId, QueueHealthReport, QueueStats, QueuedMessage, ReceiptHandle};
use crate::messaging::MessagingError;

#[derive(Debug)]
pub enum MessagingProvider {
    /// Table-backed queues in PostgreSQL
    Postgres(PostgresMessagingService),

    /// In-process queues for tests and local development
    InMemory(InMemoryMessagingService),
}

impl MessagingProvider {
    pub fn in_memory() -> Self {
        Self::InMemory(InMemoryMessagingService::new())
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Postgres(s) => s.provider_name(),
            Self::InMemory(s) => s.provider_name(),
        }
    }

    /// Inner in-memory service, for test inspection
    pub fn as_in_memory(&self) -> Option<&InMemoryMessagingService> {
        match self {
            Self::InMemory(s) => Some(s),
            Self::Postgres(_) => None,
        }
    }

    pub async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        match self {
            Self::Postgres(s) => s.ensure_queue(queue_name).await,
            Self::InMemory(s) => s.ensure_queue(queue_name).await,
        }
    }

    pub async fn delete_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        match self {
            Self::Postgres(s) => s.delete_queue(queue_name).await,
            Self::InMemory(s) => s.delete_queue(queue_name).await,
        }
    }

    pub async fn bind_queue(&self, queue_name: &str, topic: &str) -> Result<(), MessagingError> {
        match self {
            Self::Postgres(s) => s.bind_queue(queue_name, topic).await,
            Self::InMemory(s) => s.bind_queue(queue_name, topic).await,
        }
    }

    pub async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueHealthReport, MessagingError> {
        match self {
            Self::Postgres(s) => s.verify_queues(queue_names).await,
            Self::InMemory(s) => s.verify_queues(queue_names).await,
        }
    }

    pub async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        match self {
            Self::Postgres(s) => s.send_message(queue_name, message).await,
            Self::InMemory(s) => s.send_message(queue_name, message).await,
        }
    }

    pub async fn publish_message<T: QueueMessage>(
        &self,
        topic: &str,
        message: &T,
    ) -> Result<Vec<MessageId>, MessagingError> {
        match self {
            Self::Postgres(s) => s.publish_message(topic, message).await,
            Self::InMemory(s) => s.publish_message(topic, message).await,
        }
    }

    pub async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        match self {
            Self::Postgres(s) => {
                s.receive_messages(queue_name, max_messages, visibility_timeout)
                    .await
            }
            Self::InMemory(s) => {
                s.receive_messages(queue_name, max_messages, visibility_timeout)
                    .await
            }
        }
    }

    pub async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        match self {
            Self::Postgres(s) => s.ack_message(queue_name, receipt_handle).await,
            Self::InMemory(s) => s.ack_message(queue_name, receipt_handle).await,
        }
    }

    pub async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        match self {
            Self::Postgres(s) => s.nack_message(queue_name, receipt_handle, requeue).await,
            Self::InMemory(s) => s.nack_message(queue_name, receipt_handle, requeue).await,
        }
    }

    pub async fn release_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        delay: Duration,
    ) -> Result<(), MessagingError> {
        match self {
            Self::Postgres(s) => s.release_message(queue_name, receipt_handle, delay).await,
            Self::InMemory(s) => s.release_message(queue_name, receipt_handle, delay).await,
        }
    }

    pub async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        extension: Duration,
    ) -> Result<(), MessagingError> {
        match self {
            Self::Postgres(s) => {
                s.extend_visibility(queue_name, receipt_handle, extension)
                    .await
            }
            Self::InMemory(s) => {
                s.extend_visibility(queue_name, receipt_handle, extension)
                    .await
            }
        }
    }

    pub async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        match self {
            Self::Postgres(s) => s.queue_stats(queue_name).await,
            Self::InMemory(s) => s.queue_stats(queue_name).await,
        }
    }

    pub async fn health_check(&self) -> Result<bool, MessagingError> {
        match self {
            Self::Postgres(s) => s.health_check().await,
            Self::InMemory(s) => s.health_check().await,
        }
    }
}

impl From<InMemoryMessagingService> for MessagingProvider {
    fn from(service: InMemoryMessagingService) -> Self {
        Self::InMemory(service)
    }
}

impl From<PostgresMessagingService> for MessagingProvider {
    fn from(service: PostgresMessagingService) -> Self {
        Self::Postgres(service)
    }
}
