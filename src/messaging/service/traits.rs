//! # Messaging Service Traits
//!
//! Core trait definitions for provider-agnostic messaging.

use std::time::Duration;

use async_trait::async_trait;

use super::types::{MessageId, QueueHealthReport, QueueStats, QueuedMessage, ReceiptHandle};
use crate::messaging::MessagingError;

/// Provider-agnostic transport operations
///
/// Messages are published to a topic and copied into every queue bound to
/// it. A queue shared by all replicas gives competing-consumer delivery; one
/// queue per replica gives fan-out delivery.
///
/// Delivery is at-least-once: a received message stays invisible for the
/// visibility timeout and reappears if it is neither acked nor released.
#[async_trait]
pub trait MessagingService: Send + Sync + 'static {
    /// Create a queue if it doesn't exist (idempotent)
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError>;

    /// Remove a queue, its topic bindings and any messages it still holds
    async fn delete_queue(&self, queue_name: &str) -> Result<(), MessagingError>;

    /// Route copies of messages published to `topic` into `queue_name` (idempotent)
    async fn bind_queue(&self, queue_name: &str, topic: &str) -> Result<(), MessagingError>;

    /// Report which of the expected queues exist
    async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueHealthReport, MessagingError>;

    /// Send a message directly to one queue
    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError>;

    /// Publish to every queue bound to `topic`; returns one id per copy
    async fn publish_message<T: QueueMessage>(
        &self,
        topic: &str,
        message: &T,
    ) -> Result<Vec<MessageId>, MessagingError>;

    /// Receive up to `max_messages` visible messages, hiding them for `visibility_timeout`
    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError>;

    /// Acknowledge successful processing (delete message)
    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError>;

    /// Negative acknowledge
    ///
    /// `requeue = true` makes the message visible again immediately;
    /// `requeue = false` moves it to the queue's dead-letter store.
    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError>;

    /// Make a received message visible again after `delay` (scheduled redelivery)
    async fn release_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        delay: Duration,
    ) -> Result<(), MessagingError>;

    /// Renew the lock on a message being processed: it stays hidden for `extension` from now
    async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        extension: Duration,
    ) -> Result<(), MessagingError>;

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError>;

    async fn health_check(&self) -> Result<bool, MessagingError>;

    fn provider_name(&self) -> &'static str;
}

/// Message serialization contract
///
/// Types implementing this trait can be sent through the messaging system.
pub trait QueueMessage: Send + Sync + Clone + 'static {
    fn to_json(&self) -> Result<serde_json::Value, MessagingError>;

    fn from_json(value: serde_json::Value) -> Result<Self, MessagingError>
    where
        Self: Sized;
}

/// JSON serialization for any serde-compatible type
impl<T> QueueMessage for T
where
    T: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + Clone + 'static,
{
    fn to_json(&self) -> Result<serde_json::Value, MessagingError> {
        serde_json::to_value(self).map_err(|e| MessagingError::message_serialization(e.to_string()))
    }

    fn from_json(value: serde_json::Value) -> Result<Self, MessagingError> {
        serde_json::from_value(value)
            .map_err(|e| MessagingError::message_deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
    struct TestMessage {
        id: u64,
        data: String,
    }

    #[test]
    fn test_queue_message_invalid_json() {
        let result = TestMessage::from_json(serde_json::json!({"id": "not a number"}));
        assert!(matches!(
            result,
            Err(MessagingError::MessageDeserialization { .. })
        ));
    }
}
