//! # Database
//!
//! PostgreSQL pool setup and embedded schema migrations, shared by
//! [`PostgresSagaStore`](crate::store::PostgresSagaStore) and
//! [`PostgresMessagingService`](crate::messaging::PostgresMessagingService).

pub mod connection;
pub mod migrations;

pub use connection::DatabaseConnection;
pub use migrations::{run_migrations, MigrationResult, MIGRATOR};
