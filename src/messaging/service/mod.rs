//! # Messaging Service
//!
//! Provider-agnostic transport: topic publish, queue receive with visibility
//! timeout, ack/release/dead-letter, and lock renewal.
//!
//! ```text
//! publisher ──► topic ──┬──► {ns}.{type}.competing  (one queue, all replicas compete)
//!                       ├──► {ns}.{type}.replica-a  (fan-out copy)
//!                       └──► {ns}.{type}.replica-b  (fan-out copy)
//! ```

pub mod provider;
pub mod providers;
pub mod router;
pub mod traits;
pub mod types;

pub use provider::MessagingProvider;
pub use providers::{InMemoryMessagingService, PostgresMessagingService};
pub use router::{DefaultMessageRouter, MessageRouter, MessageRouterKind};
pub use traits::{MessagingService, QueueMessage};
pub use types::{MessageId, QueueHealthReport, QueueStats, QueuedMessage, ReceiptHandle};
