//! # Saga State Machine
//!
//! Generic engine for correlation-keyed, persisted state machines. A
//! pipeline supplies a [`SagaDefinition`]: its state and event enums, a
//! typed payload, and a [`TransitionTable`] of guarded, activity-carrying
//! transitions. The [`SagaEngine`] does the rest: load, guard, apply, save
//! with optimistic concurrency, then execute the recorded effects.

pub mod activities;
pub mod context;
pub mod definition;
pub mod effects;
pub mod engine;
pub mod errors;
pub mod instance;
pub mod transitions;

pub use activities::{activity, Activity, ActivityFn, FnActivity};
pub use context::{ActivityContext, DispatchContext, InstanceOf};
pub use definition::{SagaDefinition, SagaEvent, SagaState};
pub use effects::{EffectExecutor, SagaEffect, TargetStatus};
pub use engine::{DispatchOutcome, EngineSettings, IgnoreReason, SagaEngine};
pub use errors::{ActivityError, EngineError, EngineResult};
pub use instance::SagaInstance;
pub use transitions::{Branch, Guard, Outcome, Transition, TransitionTable};
