//! # Message Contracts
//!
//! Commands and events exchanged between the saga engine, step executors and
//! external collaborators, plus the broadcast control messages. Every
//! contract carries the `correlation_id` of the workflow run it belongs to.

pub mod broadcast;
pub mod generation;
pub mod ingestion;
pub mod validation;

pub use broadcast::{ConfigurationUpdated, PluginAction, PluginUpdate, RestartWorker};
pub use generation::*;
pub use ingestion::*;
pub use validation::*;
