//! # In-Memory Messaging Service
//!
//! Thread-safe in-memory transport for tests and single-process development.
//!
//! - **Visibility timeout**: received messages stay hidden until acked, released or expired
//! - **Topic bindings**: publishing copies the message into every bound queue
//! - **Dead letters**: messages nacked without requeue are kept per queue for inspection
//! - **Undecodable payloads**: dead-lettered on receive so they never block the queue

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::warn;

use crate::messaging::service::traits::{MessagingService, QueueMessage};
use crate::messaging::service::types::{
    MessageId, QueueHealthReport, QueueStats, QueuedMessage, ReceiptHandle,
};
use crate::messaging::MessagingError;

#[derive(Debug, Clone)]
struct InMemoryQueuedMessage {
    id: u64,
    payload: serde_json::Value,
    enqueued_at: DateTime<Utc>,
    /// None = visible now
    visible_at: Option<DateTime<Utc>>,
    receive_count: u32,
}

impl InMemoryQueuedMessage {
    fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.visible_at.map(|vt| vt <= now).unwrap_or(true)
    }
}

#[derive(Debug, Default)]
struct InMemoryQueue {
    messages: VecDeque<InMemoryQueuedMessage>,
    dead_letters: Vec<InMemoryQueuedMessage>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    queues: HashMap<String, InMemoryQueue>,
    /// topic -> bound queue names
    bindings: HashMap<String, BTreeSet<String>>,
    next_id: u64,
}

impl InMemoryState {
    fn enqueue(&mut self, queue_name: &str, payload: serde_json::Value) -> Result<MessageId, MessagingError> {
        self.next_id += 1;
        let id = self.next_id;
        let queue = self
            .queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        queue.messages.push_back(InMemoryQueuedMessage {
            id,
            payload,
            enqueued_at: Utc::now(),
            visible_at: None,
            receive_count: 0,
        });
        Ok(MessageId::from(id))
    }

    fn queue_mut(&mut self, queue_name: &str) -> Result<&mut InMemoryQueue, MessagingError> {
        self.queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))
    }
}

fn parse_handle(receipt_handle: &ReceiptHandle) -> Result<u64, MessagingError> {
    receipt_handle
        .as_u64()
        .ok_or_else(|| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))
}

fn to_chrono(duration: Duration) -> Result<chrono::Duration, MessagingError> {
    chrono::Duration::from_std(duration)
        .map_err(|e| MessagingError::internal(format!("duration out of range: {e}")))
}

/// In-memory messaging service
///
/// Every replica in a test shares one instance (behind an `Arc`) the same
/// way replicas share a broker.
#[derive(Debug, Default)]
pub struct InMemoryMessagingService {
    state: RwLock<InMemoryState>,
}

impl InMemoryMessagingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages (visible and in-flight) in a queue
    pub async fn queue_length(&self, queue_name: &str) -> usize {
        let state = self.state.read().await;
        state
            .queues
            .get(queue_name)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    /// Payloads of dead-lettered messages, oldest first
    pub async fn dead_letters(&self, queue_name: &str) -> Vec<serde_json::Value> {
        let state = self.state.read().await;
        state
            .queues
            .get(queue_name)
            .map(|q| q.dead_letters.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn queue_names(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state.queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Queues currently bound to a topic
    pub async fn bound_queues(&self, topic: &str) -> Vec<String> {
        let state = self.state.read().await;
        state
            .bindings
            .get(topic)
            .map(|queues| queues.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessagingService for InMemoryMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        let mut state = self.state.write().await;
        state.queues.entry(queue_name.to_string()).or_default();
        Ok(())
    }

    async fn delete_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        let mut state = self.state.write().await;
        state.queues.remove(queue_name);
        for queues in state.bindings.values_mut() {
            queues.remove(queue_name);
        }
        state.bindings.retain(|_, queues| !queues.is_empty());
        Ok(())
    }

    async fn bind_queue(&self, queue_name: &str, topic: &str) -> Result<(), MessagingError> {
        let mut state = self.state.write().await;
        if !state.queues.contains_key(queue_name) {
            return Err(MessagingError::queue_not_found(queue_name));
        }
        state
            .bindings
            .entry(topic.to_string())
            .or_default()
            .insert(queue_name.to_string());
        Ok(())
    }

    async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueHealthReport, MessagingError> {
        let state = self.state.read().await;
        let mut report = QueueHealthReport::new();
        for name in queue_names {
            if state.queues.contains_key(name) {
                report.add_healthy(name);
            } else {
                report.add_missing(name);
            }
        }
        Ok(report)
    }

    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        let payload = message.to_json()?;
        let mut state = self.state.write().await;
        state.enqueue(queue_name, payload)
    }

    async fn publish_message<T: QueueMessage>(
        &self,
        topic: &str,
        message: &T,
    ) -> Result<Vec<MessageId>, MessagingError> {
        let payload = message.to_json()?;
        let mut state = self.state.write().await;
        let targets: Vec<String> = state
            .bindings
            .get(topic)
            .map(|queues| queues.iter().cloned().collect())
            .unwrap_or_default();

        let mut ids = Vec::with_capacity(targets.len());
        for queue_name in targets {
            ids.push(state.enqueue(&queue_name, payload.clone())?);
        }
        Ok(ids)
    }

    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        let now = Utc::now();
        let visible_until = now + to_chrono(visibility_timeout)?;

        let mut state = self.state.write().await;
        let queue = state.queue_mut(queue_name)?;

        let mut received = Vec::new();
        let mut undecodable = Vec::new();
        for msg in queue.messages.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if !msg.is_visible(now) {
                continue;
            }

            msg.receive_count += 1;
            match T::from_json(msg.payload.clone()) {
                Ok(decoded) => {
                    msg.visible_at = Some(visible_until);
                    received.push(QueuedMessage::new(
                        ReceiptHandle::from(msg.id),
                        decoded,
                        msg.receive_count,
                        msg.enqueued_at,
                    ));
                }
                Err(e) => {
                    warn!(
                        queue_name = %queue_name,
                        message_id = msg.id,
                        error = %e,
                        "☠️ Dead-lettering undecodable message"
                    );
                    undecodable.push(msg.id);
                }
            }
        }

        if !undecodable.is_empty() {
            let (poisoned, kept): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut queue.messages)
                .into_iter()
                .partition(|m| undecodable.contains(&m.id));
            queue.messages = kept;
            queue.dead_letters.extend(poisoned);
        }

        Ok(received)
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let message_id = parse_handle(receipt_handle)?;
        let mut state = self.state.write().await;
        let queue = state.queue_mut(queue_name)?;

        match queue.messages.iter().position(|m| m.id == message_id) {
            Some(pos) => {
                queue.messages.remove(pos);
                Ok(())
            }
            None => Err(MessagingError::message_not_found(message_id.to_string())),
        }
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let message_id = parse_handle(receipt_handle)?;
        let mut state = self.state.write().await;
        let queue = state.queue_mut(queue_name)?;

        let pos = queue
            .messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| MessagingError::message_not_found(message_id.to_string()))?;

        if requeue {
            if let Some(msg) = queue.messages.get_mut(pos) {
                msg.visible_at = None;
            }
        } else if let Some(msg) = queue.messages.remove(pos) {
            queue.dead_letters.push(msg);
        }
        Ok(())
    }

    async fn release_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        delay: Duration,
    ) -> Result<(), MessagingError> {
        let message_id = parse_handle(receipt_handle)?;
        let visible_at = Utc::now() + to_chrono(delay)?;
        let mut state = self.state.write().await;
        let queue = state.queue_mut(queue_name)?;

        let msg = queue
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| MessagingError::message_not_found(message_id.to_string()))?;
        msg.visible_at = Some(visible_at);
        Ok(())
    }

    async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        extension: Duration,
    ) -> Result<(), MessagingError> {
        let message_id = parse_handle(receipt_handle)?;
        let visible_at = Utc::now() + to_chrono(extension)?;
        let mut state = self.state.write().await;
        let queue = state.queue_mut(queue_name)?;

        let msg = queue
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| MessagingError::message_not_found(message_id.to_string()))?;
        msg.visible_at = Some(visible_at);
        Ok(())
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let state = self.state.read().await;
        let queue = state
            .queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let now = Utc::now();
        let in_flight = queue.messages.iter().filter(|m| !m.is_visible(now)).count() as u64;

        let mut stats = QueueStats::new(queue_name, queue.messages.len() as u64)
            .with_in_flight_count(in_flight)
            .with_dead_letter_count(queue.dead_letters.len() as u64);

        if let Some(oldest) = queue.messages.front() {
            if let Ok(age) = (now - oldest.enqueued_at).to_std() {
                stats = stats.with_oldest_message_age(age);
            }
        }

        Ok(stats)
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
