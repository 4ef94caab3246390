//! # Message Router
//!
//! Topic and queue naming. Everything is prefixed with the server namespace
//! so several deployments can share one broker.

/// Namespace-based routing trait
pub trait MessageRouter: Send + Sync {
    /// Topic a message type is published to
    ///
    /// Default pattern: `{namespace}.{message_type}`
    fn topic(&self, namespace: &str, message_type: &str) -> String;

    /// Queue shared by all replicas (competing consumers)
    ///
    /// Default pattern: `{namespace}.{message_type}.competing`
    fn competing_queue(&self, namespace: &str, message_type: &str) -> String;

    /// Queue owned by one replica (fan-out)
    ///
    /// Default pattern: `{namespace}.{message_type}.{replica_id}`
    fn fan_out_queue(&self, namespace: &str, message_type: &str, replica_id: &str) -> String;

    /// Recover the message type from a queue this router named
    fn extract_message_type(&self, namespace: &str, queue_name: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct DefaultMessageRouter {
    separator: String,
    competing_suffix: String,
}

impl DefaultMessageRouter {
    pub fn new(separator: impl Into<String>, competing_suffix: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
            competing_suffix: competing_suffix.into(),
        }
    }
}

impl Default for DefaultMessageRouter {
    fn default() -> Self {
        Self::new(".", "competing")
    }
}

impl MessageRouter for DefaultMessageRouter {
    fn topic(&self, namespace: &str, message_type: &str) -> String {
        format!("{}{}{}", namespace, self.separator, message_type)
    }

    fn competing_queue(&self, namespace: &str, message_type: &str) -> String {
        format!(
            "{}{}{}",
            self.topic(namespace, message_type),
            self.separator,
            self.competing_suffix
        )
    }

    fn fan_out_queue(&self, namespace: &str, message_type: &str, replica_id: &str) -> String {
        format!(
            "{}{}{}",
            self.topic(namespace, message_type),
            self.separator,
            replica_id
        )
    }

    fn extract_message_type(&self, namespace: &str, queue_name: &str) -> Option<String> {
        queue_name
            .strip_prefix(&format!("{}{}", namespace, self.separator))
            .and_then(|rest| rest.split(self.separator.as_str()).next())
            .filter(|s| !s.is_empty())
            .map(String::from)
    }
}

/// Enum dispatch for MessageRouter, matching `MessagingProvider`
#[derive(Debug, Clone)]
pub enum MessageRouterKind {
    Default(DefaultMessageRouter),
}

impl MessageRouterKind {
    pub fn topic(&self, namespace: &str, message_type: &str) -> String {
        match self {
            Self::Default(r) => r.topic(namespace, message_type),
        }
    }

    pub fn competing_queue(&self, namespace: &str, message_type: &str) -> String {
        match self {
            Self::Default(r) => r.competing_queue(namespace, message_type),
        }
    }

    pub fn fan_out_queue(&self, namespace: &str, message_type: &str, replica_id: &str) -> String {
        match self {
            Self::Default(r) => r.fan_out_queue(namespace, message_type, replica_id),
        }
    }

    pub fn extract_message_type(&self, namespace: &str, queue_name: &str) -> Option<String> {
        match self {
            Self::Default(r) => r.extract_message_type(namespace, queue_name),
        }
    }
}

impl Default for MessageRouterKind {
    fn default() -> Self {
        Self::Default(DefaultMessageRouter::default())
    }
}

impl From<DefaultMessageRouter> for MessageRouterKind {
    fn from(router: DefaultMessageRouter) -> Self {
        Self::Default(router)
    }
}
