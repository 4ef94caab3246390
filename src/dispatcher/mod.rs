//! # Dispatcher
//!
//! Subscriptions that feed envelopes from the transport into handlers.
//!
//! - competing: one shared queue per message type, each message handled by
//!   exactly one replica
//! - fan-out: one queue per replica bound to the message type's topic, every
//!   replica handles its own copy
//!
//! Handler failures are classified by [`HandlerError`]: transient failures
//! are redelivered on the [`RetryPolicy`](crate::resilience::RetryPolicy)
//! schedule and dead-lettered once it is exhausted, permanent failures are
//! dead-lettered right away.

mod consumer;
pub mod fan_out;
pub mod handler;

pub use consumer::{LockSettings, SubscriptionSettings};
pub use fan_out::{FanOutDispatcher, SubscriptionInfo, SubscriptionKind};
pub use handler::{HandlerError, MessageHandler};
