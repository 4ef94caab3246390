#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Docflow Core
//!
//! Saga-based orchestration core for long-running document pipelines
//! (ingestion, generation and validation) running across a pool of
//! horizontally scaled worker replicas.
//!
//! ## Architecture
//!
//! Every workflow run is a correlation-keyed saga instance persisted in a
//! durable store. Incoming events are dispatched through an explicit
//! transition table; activities mutate the instance and record effects that
//! are only executed after the instance has been saved with its previously
//! observed version.
//!
//! ```text
//! start command ─► resolver ─► StepsLoaded ─► execute step 0 ─► StepCompleted ─► ... ─► Completed
//!                                                   │
//!                                                   └─► StepFailed ─► Failed
//! ```
//!
//! ## Module Organization
//!
//! - [`saga`] - Generic state machine engine, transition tables and activities
//! - [`store`] - Durable saga store with optimistic concurrency
//! - [`pipeline`] - Step pipeline resolution and the three pipeline definitions
//! - [`messaging`] - Message envelope, contracts, routing and transport providers
//! - [`dispatcher`] - Competing and fan-out subscriptions with retry/dead-letter handling
//! - [`resilience`] - Per message-type retry/backoff policy
//! - [`worker`] - Handlers and bootstrap wiring for a worker replica
//! - [`config`] - Layered TOML + environment configuration
//! - [`logging`] - Structured logging initialization
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docflow_core::config::ConfigManager;
//! use docflow_core::worker::{DocflowWorker, WorkerDependencies};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! docflow_core::logging::init_structured_logging();
//! let config = ConfigManager::load()?;
//! let deps = WorkerDependencies::in_memory(&config);
//! let worker = DocflowWorker::bootstrap(config, deps).await?;
//! worker.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod config;
pub mod constants;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod pipeline;
pub mod resilience;
pub mod saga;
pub mod store;
pub mod worker;

pub use config::{ConfigManager, DocflowConfig};
pub use error::{DocflowError, DocflowResult};
pub use messaging::{MessageContract, MessageEnvelope};
pub use saga::{DispatchContext, DispatchOutcome, SagaEngine, SagaInstance};
pub use store::{InMemorySagaStore, SagaStore};
