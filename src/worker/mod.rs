//! # Worker
//!
//! Message handlers and the bootstrap that turns configuration plus
//! collaborators into a running replica.

pub mod bootstrap;
pub mod broadcast;
pub mod saga_handler;
pub mod step_execution;

pub use bootstrap::{DocflowWorker, WorkerDependencies};
pub use broadcast::{
    ConfigurationUpdatedHandler, PluginRegistry, PluginState, PluginUpdateHandler,
    RestartWorkerHandler,
};
pub use saga_handler::SagaEventHandler;
pub use step_execution::StepExecutionHandler;
