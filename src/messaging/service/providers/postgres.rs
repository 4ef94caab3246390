//! # PostgreSQL Messaging Service
//!
//! Table-backed queues on the same database as the saga store. Receives use
//! `FOR UPDATE SKIP LOCKED` so competing replicas never claim the same row,
//! and the visibility timeout is a `visible_at` timestamp on each message.
//! Payloads that fail to decode are moved to `queue_dead_letters` on receive.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, warn};

use crate::messaging::service::traits::{MessagingService, QueueMessage};
use crate::messaging::service::types::{
    MessageId, QueueHealthReport, QueueStats, QueuedMessage, ReceiptHandle,
};
use crate::messaging::MessagingError;

#[derive(Debug, Clone)]
pub struct PostgresMessagingService {
    pool: PgPool,
}

impl PostgresMessagingService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn message_id(receipt_handle: &ReceiptHandle) -> Result<i64, MessagingError> {
        receipt_handle
            .as_i64()
            .ok_or_else(|| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))
    }

    async fn set_visible_in(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        delay: Duration,
        operation: &str,
    ) -> Result<(), MessagingError> {
        let id = Self::message_id(receipt_handle)?;
        let result = sqlx::query(
            "UPDATE queue_messages \
             SET visible_at = now() + make_interval(secs => $3) \
             WHERE id = $1 AND queue_name = $2",
        )
        .bind(id)
        .bind(queue_name)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| MessagingError::queue_operation(queue_name, operation, e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(MessagingError::message_not_found(id.to_string()));
        }
        Ok(())
    }

    async fn move_to_dead_letters(&self, queue_name: &str, id: i64) -> Result<(), MessagingError> {
        let result = sqlx::query(
            "WITH moved AS ( \
                 DELETE FROM queue_messages WHERE id = $1 AND queue_name = $2 \
                 RETURNING id, queue_name, payload, enqueued_at, receive_count \
             ) \
             INSERT INTO queue_dead_letters (id, queue_name, payload, enqueued_at, receive_count) \
             SELECT id, queue_name, payload, enqueued_at, receive_count FROM moved",
        )
        .bind(id)
        .bind(queue_name)
        .execute(&self.pool)
        .await
        .map_err(|e| MessagingError::queue_operation(queue_name, "dead_letter", e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(MessagingError::message_not_found(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingService for PostgresMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        sqlx::query("INSERT INTO queues (queue_name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "ensure_queue", e.to_string()))?;
        Ok(())
    }

    async fn delete_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        // bindings and pending messages cascade
        sqlx::query("DELETE FROM queues WHERE queue_name = $1")
            .bind(queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "delete_queue", e.to_string()))?;
        debug!(queue_name = %queue_name, "🗑️ Deleted queue");
        Ok(())
    }

    async fn bind_queue(&self, queue_name: &str, topic: &str) -> Result<(), MessagingError> {
        let result = sqlx::query(
            "INSERT INTO queue_bindings (topic, queue_name) \
             SELECT $1, queue_name FROM queues WHERE queue_name = $2 \
             ON CONFLICT DO NOTHING",
        )
        .bind(topic)
        .bind(queue_name)
        .execute(&self.pool)
        .await
        .map_err(|e| MessagingError::queue_operation(queue_name, "bind_queue", e.to_string()))?;

        if result.rows_affected() == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM queues WHERE queue_name = $1)")
                    .bind(queue_name)
                    .fetch_one(&self.pool)
                    .await?;
            if !exists {
                return Err(MessagingError::queue_not_found(queue_name));
            }
        }
        Ok(())
    }

    async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueHealthReport, MessagingError> {
        let existing: Vec<String> =
            sqlx::query_scalar("SELECT queue_name FROM queues WHERE queue_name = ANY($1)")
                .bind(queue_names.to_vec())
                .fetch_all(&self.pool)
                .await?;

        let mut report = QueueHealthReport::new();
        for name in queue_names {
            if existing.contains(name) {
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
        let id: Option<i64> = sqlx::query_scalar(
            "INSERT INTO queue_messages (queue_name, payload) \
             SELECT queue_name, $2 FROM queues WHERE queue_name = $1 \
             RETURNING id",
        )
        .bind(queue_name)
        .bind(payload)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MessagingError::queue_operation(queue_name, "send", e.to_string()))?;

        id.map(MessageId::from)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))
    }

    async fn publish_message<T: QueueMessage>(
        &self,
        topic: &str,
        message: &T,
    ) -> Result<Vec<MessageId>, MessagingError> {
        let payload = message.to_json()?;
        let ids: Vec<i64> = sqlx::query_scalar(
            "INSERT INTO queue_messages (queue_name, payload) \
             SELECT queue_name, $2 FROM queue_bindings WHERE topic = $1 \
             RETURNING id",
        )
        .bind(topic)
        .bind(payload)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MessagingError::queue_operation(topic, "publish", e.to_string()))?;

        Ok(ids.into_iter().map(MessageId::from).collect())
    }

    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        let rows = sqlx::query(
            "WITH next AS ( \
                 SELECT id FROM queue_messages \
                 WHERE queue_name = $1 AND visible_at <= now() \
                 ORDER BY id \
                 LIMIT $2 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE queue_messages m \
             SET visible_at = now() + make_interval(secs => $3), \
                 receive_count = m.receive_count + 1 \
             FROM next \
             WHERE m.id = next.id \
             RETURNING m.id, m.payload, m.receive_count, m.enqueued_at",
        )
        .bind(queue_name)
        .bind(max_messages as i64)
        .bind(visibility_timeout.as_secs_f64())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MessagingError::queue_operation(queue_name, "receive", e.to_string()))?;

        let mut received = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let payload: serde_json::Value = row.try_get("payload")?;
            let receive_count: i32 = row.try_get("receive_count")?;
            let enqueued_at: DateTime<Utc> = row.try_get("enqueued_at")?;

            match T::from_json(payload) {
                Ok(message) => received.push(QueuedMessage::new(
                    ReceiptHandle::from(id),
                    message,
                    receive_count.max(0) as u32,
                    enqueued_at,
                )),
                Err(e) => {
                    warn!(
                        queue_name = %queue_name,
                        message_id = id,
                        error = %e,
                        "☠️ Dead-lettering undecodable message"
                    );
                    // on failure the row reappears after the visibility timeout
                    if let Err(move_error) = self.move_to_dead_letters(queue_name, id).await {
                        warn!(
                            queue_name = %queue_name,
                            message_id = id,
                            error = %move_error,
                            "Failed to dead-letter undecodable message"
                        );
                    }
                }
            }
        }
        received.sort_by_key(|m| m.receipt_handle.as_i64());
        Ok(received)
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let id = Self::message_id(receipt_handle)?;
        let result = sqlx::query("DELETE FROM queue_messages WHERE id = $1 AND queue_name = $2")
            .bind(id)
            .bind(queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "ack", e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(MessagingError::message_not_found(id.to_string()));
        }
        Ok(())
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        if requeue {
            return self
                .set_visible_in(queue_name, receipt_handle, Duration::ZERO, "nack")
                .await;
        }

        let id = Self::message_id(receipt_handle)?;
        self.move_to_dead_letters(queue_name, id).await
    }

    async fn release_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        delay: Duration,
    ) -> Result<(), MessagingError> {
        self.set_visible_in(queue_name, receipt_handle, delay, "release")
            .await
    }

    async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        extension: Duration,
    ) -> Result<(), MessagingError> {
        self.set_visible_in(queue_name, receipt_handle, extension, "extend_visibility")
            .await
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM queues WHERE queue_name = $1)")
                .bind(queue_name)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Err(MessagingError::queue_not_found(queue_name));
        }

        let row = sqlx::query(
            "SELECT \
                 count(*) AS message_count, \
                 count(*) FILTER (WHERE visible_at > now()) AS in_flight_count, \
                 min(enqueued_at) AS oldest_enqueued_at, \
                 (SELECT count(*) FROM queue_dead_letters d WHERE d.queue_name = $1) AS dead_letter_count \
             FROM queue_messages WHERE queue_name = $1",
        )
        .bind(queue_name)
        .fetch_one(&self.pool)
        .await?;

        let message_count: i64 = row.try_get("message_count")?;
        let in_flight_count: i64 = row.try_get("in_flight_count")?;
        let dead_letter_count: i64 = row.try_get("dead_letter_count")?;
        let oldest: Option<DateTime<Utc>> = row.try_get("oldest_enqueued_at")?;

        let mut stats = QueueStats::new(queue_name, message_count.max(0) as u64)
            .with_in_flight_count(in_flight_count.max(0) as u64)
            .with_dead_letter_count(dead_letter_count.max(0) as u64);
        if let Some(age) = oldest.and_then(|at| (Utc::now() - at).to_std().ok()) {
            stats = stats.with_oldest_message_age(age);
        }
        Ok(stats)
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        let one: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::database_connection(e.to_string()))?;
        Ok(one == 1)
    }

    fn provider_name(&self) -> &'static str {
        "postgres"
    }
}
