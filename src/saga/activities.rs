use std::sync::Arc;

use async_trait::async_trait;

use super::context::ActivityContext;
use super::definition::SagaDefinition;
use super::errors::ActivityError;

/// One unit of transition work
///
/// Activities mutate the instance and record effects through the context.
/// They must not touch the transport or external systems directly: the
/// transition may still lose a concurrency race and be retried.
#[async_trait]
pub trait Activity<D: SagaDefinition>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &mut ActivityContext<'_, D>) -> Result<(), ActivityError>;
}

pub type ActivityFn<D> = fn(&mut ActivityContext<'_, D>) -> Result<(), ActivityError>;

/// Synchronous activity backed by a plain function
pub struct FnActivity<D: SagaDefinition> {
    name: &'static str,
    run: ActivityFn<D>,
}

impl<D: SagaDefinition> FnActivity<D> {
    pub fn new(name: &'static str, run: ActivityFn<D>) -> Self {
        Self { name, run }
    }
}

#[async_trait]
impl<D: SagaDefinition> Activity<D> for FnActivity<D> {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn execute(&self, ctx: &mut ActivityContext<'_, D>) -> Result<(), ActivityError> {
        (self.run)(ctx)
    }
}

/// Shorthand for building table entries
pub fn activity<D: SagaDefinition>(name: &'static str, run: ActivityFn<D>) -> Arc<dyn Activity<D>> {
    Arc::new(FnActivity::new(name, run))
}
