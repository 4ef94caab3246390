//! Publishes envelopes to the namespaced topic of their message type.

use std::sync::Arc;

use tracing::{debug, warn};

use super::envelope::{MessageContract, MessageEnvelope};
use super::service::{MessageRouterKind, MessagingProvider};
use super::MessagingError;
use crate::constants::headers;

#[derive(Debug, Clone)]
pub struct MessagePublisher {
    provider: Arc<MessagingProvider>,
    router: MessageRouterKind,
    namespace: String,
}

impl MessagePublisher {
    pub fn new(
        provider: Arc<MessagingProvider>,
        router: MessageRouterKind,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            router,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn provider(&self) -> &Arc<MessagingProvider> {
        &self.provider
    }

    pub fn router(&self) -> &MessageRouterKind {
        &self.router
    }

    /// Publish an envelope; returns the number of queues that received a copy
    pub async fn publish(&self, envelope: &MessageEnvelope) -> Result<usize, MessagingError> {
        let topic = self.router.topic(&self.namespace, &envelope.message_type);

        let mut outgoing = envelope.clone();
        outgoing
            .headers
            .entry(headers::SERVER_NAMESPACE.to_string())
            .or_insert_with(|| self.namespace.clone());

        let ids = self.provider.publish_message(&topic, &outgoing).await?;
        if ids.is_empty() {
            warn!(
                topic = %topic,
                correlation_id = %envelope.correlation_id,
                "Published message has no subscribers"
            );
        } else {
            debug!(
                topic = %topic,
                correlation_id = %envelope.correlation_id,
                recipients = ids.len(),
                "Published message"
            );
        }
        Ok(ids.len())
    }

    /// Wrap and publish a typed contract
    pub async fn publish_message<M: MessageContract>(
        &self,
        message: &M,
    ) -> Result<usize, MessagingError> {
        let envelope = MessageEnvelope::wrap(message)?;
        self.publish(&envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::messages::RestartWorker;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_publish_stamps_namespace_header() {
        let provider = Arc::new(MessagingProvider::in_memory());
        let router = MessageRouterKind::default();
        provider.ensure_queue("tenant.RestartWorker.r1").await.unwrap();
        provider
            .bind_queue("tenant.RestartWorker.r1", "tenant.RestartWorker")
            .await
            .unwrap();

        let publisher = MessagePublisher::new(provider.clone(), router, "tenant");
        let recipients = publisher
            .publish_message(&RestartWorker {
                correlation_id: Uuid::new_v4(),
                reason: "config rollout".to_string(),
                target_replica: None,
            })
            .await
            .unwrap();
        assert_eq!(recipients, 1);

        let received = provider
            .receive_messages::<MessageEnvelope>(
                "tenant.RestartWorker.r1",
                1,
                std::time::Duration::from_secs(30),
            )
            .await
            .unwrap();
        assert_eq!(
            received[0].message.header(headers::SERVER_NAMESPACE),
            Some("tenant")
        );
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let publisher = MessagePublisher::new(
            Arc::new(MessagingProvider::in_memory()),
            MessageRouterKind::default(),
            "docflow",
        );
        let recipients = publisher
            .publish(&MessageEnvelope::from_parts(
                "Nobody",
                Uuid::new_v4(),
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(recipients, 0);
    }
}
