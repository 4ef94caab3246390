use uuid::Uuid;

use super::definition::{SagaDefinition, SagaState};
use super::effects::{SagaEffect, TargetStatus};
use super::errors::ActivityError;
use super::instance::SagaInstance;
use crate::constants::headers;
use crate::messaging::{MessageContract, MessageEnvelope};

pub type InstanceOf<D> =
    SagaInstance<<D as SagaDefinition>::State, <D as SagaDefinition>::Payload>;

/// Identity of the replica running the engine
///
/// Threaded explicitly into every activity instead of read from globals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    pub server_namespace: String,
    pub replica_id: String,
}

impl DispatchContext {
    pub fn new(server_namespace: impl Into<String>, replica_id: impl Into<String>) -> Self {
        Self {
            server_namespace: server_namespace.into(),
            replica_id: replica_id.into(),
        }
    }
}

/// What an activity sees while a transition is applied
pub struct ActivityContext<'a, D: SagaDefinition> {
    pub instance: &'a mut InstanceOf<D>,
    pub event: &'a D::Event,
    pub dispatch: &'a DispatchContext,
    effects: &'a mut Vec<SagaEffect>,
}

impl<'a, D: SagaDefinition> ActivityContext<'a, D> {
    pub fn new(
        instance: &'a mut InstanceOf<D>,
        event: &'a D::Event,
        dispatch: &'a DispatchContext,
        effects: &'a mut Vec<SagaEffect>,
    ) -> Self {
        Self {
            instance,
            event,
            dispatch,
            effects,
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        self.instance.correlation_id
    }

    pub fn effects(&self) -> &[SagaEffect] {
        self.effects.as_slice()
    }

    /// Record a message to publish after commit
    pub fn publish<M: MessageContract>(&mut self, message: &M) -> Result<(), ActivityError> {
        let envelope = MessageEnvelope::wrap(message)?
            .with_header(headers::SERVER_NAMESPACE, self.dispatch.server_namespace.as_str())
            .with_header(headers::ORIGIN_REPLICA, self.dispatch.replica_id.as_str());
        self.effects.push(SagaEffect::Publish { envelope });
        Ok(())
    }

    pub fn update_target_status(
        &mut self,
        target_id: Uuid,
        status: TargetStatus,
        detail: Option<String>,
    ) {
        self.effects.push(SagaEffect::UpdateTargetStatus {
            target_id,
            status,
            detail,
        });
    }

    /// Record why the workflow failed, tagged with the current state
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.instance.record_failure(reason);
    }

    pub fn state_name(&self) -> &'static str {
        self.instance.state.as_str()
    }
}
