//! Transport provider implementations.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryMessagingService;
pub use postgres::PostgresMessagingService;
