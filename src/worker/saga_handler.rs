use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::dispatcher::{HandlerError, MessageHandler};
use crate::messaging::MessageEnvelope;
use crate::saga::{DispatchOutcome, SagaDefinition, SagaEngine, SagaEvent, SagaState};

/// Feeds a saga's events from its competing subscriptions into the engine
pub struct SagaEventHandler<D: SagaDefinition> {
    engine: Arc<SagaEngine<D>>,
}

impl<D: SagaDefinition> SagaEventHandler<D> {
    pub fn new(engine: Arc<SagaEngine<D>>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<SagaEngine<D>> {
        &self.engine
    }
}

#[async_trait]
impl<D: SagaDefinition> MessageHandler for SagaEventHandler<D> {
    fn name(&self) -> &'static str {
        D::SAGA_TYPE
    }

    async fn handle(&self, envelope: &MessageEnvelope) -> Result<(), HandlerError> {
        let Some(event) = D::Event::from_envelope(envelope)? else {
            debug!(
                correlation_id = %envelope.correlation_id,
                saga_type = D::SAGA_TYPE,
                message_type = %envelope.message_type,
                "Message is not an event of this saga"
            );
            return Ok(());
        };

        let correlation_id = event.correlation_id();
        let outcome = self.engine.dispatch(correlation_id, event).await?;
        if let DispatchOutcome::Applied { from, to, version } = &outcome {
            debug!(
                correlation_id = %correlation_id,
                saga_type = D::SAGA_TYPE,
                from_state = from.as_str(),
                to_state = to.as_str(),
                version = version,
                "Saga event applied"
            );
        }
        Ok(())
    }
}
