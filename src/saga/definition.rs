//! Traits a pipeline implements to be driven by the [`SagaEngine`](super::SagaEngine).

use std::fmt::Debug;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::transitions::TransitionTable;
use crate::messaging::{MessageEnvelope, MessagingError};

/// Pipeline state enum
pub trait SagaState: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// State of an instance that has not been persisted yet
    fn initial() -> Self;

    /// Terminal states absorb every further event
    fn is_terminal(&self) -> bool;

    /// Persisted name
    fn as_str(&self) -> &'static str;

    fn from_name(name: &str) -> Option<Self>;
}

/// Pipeline event enum, one variant per consumed message contract
pub trait SagaEvent: Clone + Debug + Send + Sync + 'static {
    /// Message type the event was decoded from; the transition table key
    fn event_type(&self) -> &'static str;

    fn correlation_id(&self) -> Uuid;

    /// `Ok(None)` when the envelope is not one of this pipeline's events
    fn from_envelope(envelope: &MessageEnvelope) -> Result<Option<Self>, MessagingError>;
}

pub trait SagaDefinition: Sized + Send + Sync + 'static {
    type State: SagaState;
    type Event: SagaEvent;
    type Payload: Serialize + DeserializeOwned + Default + Clone + Debug + Send + Sync + 'static;

    /// Discriminator stored with every instance of this pipeline
    const SAGA_TYPE: &'static str;

    /// Build the transition table; called once when the engine is constructed
    fn transitions(&self) -> TransitionTable<Self>;
}
