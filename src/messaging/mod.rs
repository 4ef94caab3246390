//! # Messaging
//!
//! Message contracts, the envelope they travel in, and the transport
//! abstraction that moves envelopes between replicas.

pub mod envelope;
pub mod errors;
pub mod messages;
pub mod publisher;
pub mod service;

pub use envelope::{MessageContract, MessageEnvelope};
pub use errors::MessagingError;
pub use publisher::MessagePublisher;
pub use service::{
    DefaultMessageRouter, InMemoryMessagingService, MessageRouterKind, MessagingProvider,
    MessagingService, PostgresMessagingService, QueuedMessage, ReceiptHandle,
};
