//! # Message Envelope
//!
//! Transport-level wrapper around every command, event and broadcast. The
//! payload stays an untyped JSON value until a handler decodes it into the
//! contract it expects.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::MessagingError;

/// A typed message that can travel inside a [`MessageEnvelope`]
pub trait MessageContract:
    Serialize + DeserializeOwned + Send + Sync + Clone + std::fmt::Debug + 'static
{
    /// Wire name, used for routing and decoding
    const MESSAGE_TYPE: &'static str;

    /// Workflow run this message belongs to
    fn correlation_id(&self) -> Uuid;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub message_id: Uuid,
    pub correlation_id: Uuid,
    pub message_type: String,
    pub payload: serde_json::Value,
    /// 1 on first delivery; set by the dispatcher from the transport's receive count
    #[serde(default)]
    pub delivery_attempt: u32,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl MessageEnvelope {
    /// Wrap a typed contract
    pub fn wrap<M: MessageContract>(message: &M) -> Result<Self, MessagingError> {
        let payload = serde_json::to_value(message)
            .map_err(|e| MessagingError::message_serialization(e.to_string()))?;
        Ok(Self::from_parts(
            M::MESSAGE_TYPE,
            message.correlation_id(),
            payload,
        ))
    }

    pub fn from_parts(
        message_type: impl Into<String>,
        correlation_id: Uuid,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            correlation_id,
            message_type: message_type.into(),
            payload,
            delivery_attempt: 0,
            sent_at: Utc::now(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn is<M: MessageContract>(&self) -> bool {
        self.message_type == M::MESSAGE_TYPE
    }

    /// Decode the payload into the contract named by `message_type`
    pub fn decode<M: MessageContract>(&self) -> Result<M, MessagingError> {
        if !self.is::<M>() {
            return Err(MessagingError::unexpected_message_type(
                M::MESSAGE_TYPE,
                &self.message_type,
            ));
        }
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            MessagingError::message_deserialization(format!("{}: {}", M::MESSAGE_TYPE, e))
        })
    }
}

/// Implement [`MessageContract`] for a struct with a `correlation_id: Uuid` field
#[macro_export]
macro_rules! message_contract {
    ($ty:ty, $name:expr) => {
        impl $crate::messaging::MessageContract for $ty {
            const MESSAGE_TYPE: &'static str = $name;

            fn correlation_id(&self) -> ::uuid::Uuid {
                self.correlation_id
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Ping {
        correlation_id: Uuid,
        note: String,
    }

    crate::message_contract!(Ping, "Ping");

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Pong {
        correlation_id: Uuid,
    }

    crate::message_contract!(Pong, "Pong");

    #[test]
    fn test_wrap_and_decode() {
        let ping = Ping {
            correlation_id: Uuid::new_v4(),
            note: "doc-42".to_string(),
        };
        let envelope = MessageEnvelope::wrap(&ping).unwrap();

        assert_eq!(envelope.message_type, "Ping");
        assert_eq!(envelope.correlation_id, ping.correlation_id);
        assert_eq!(envelope.delivery_attempt, 0);
        assert_eq!(envelope.decode::<Ping>().unwrap(), ping);
    }

    #[test]
    fn test_decode_rejects_other_message_type() {
        let envelope = MessageEnvelope::wrap(&Pong {
            correlation_id: Uuid::new_v4(),
        })
        .unwrap();

        assert!(matches!(
            envelope.decode::<Ping>(),
            Err(MessagingError::UnexpectedMessageType { .. })
        ));
    }

    #[test]
    fn test_headers() {
        let envelope = MessageEnvelope::from_parts("Ping", Uuid::new_v4(), serde_json::json!({}))
            .with_header("docflow-server-namespace", "tenant-a");
        assert_eq!(envelope.header("docflow-server-namespace"), Some("tenant-a"));
        assert_eq!(envelope.header("missing"), None);
    }
}
