//! # Durable Saga Store
//!
//! Versioned persistence for saga instances. Every write names the version
//! it read; a mismatch surfaces as [`StoreError::ConcurrencyConflict`] and the
//! engine retries the whole dispatch.

pub mod errors;
pub mod in_memory;
pub mod postgres;
pub mod record;
pub mod traits;

pub use errors::{StoreError, StoreResult};
pub use in_memory::InMemorySagaStore;
pub use postgres::PostgresSagaStore;
pub use record::{OutboxEntry, SagaFailure, SagaRecord};
pub use traits::{ReadLock, SagaStore, SagaUnitOfWork};
