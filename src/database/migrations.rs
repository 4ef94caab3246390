//! Schema for the saga store (`saga_instances`) and the table-backed
//! transport (`queues`, `queue_bindings`, `queue_messages`,
//! `queue_dead_letters`).

use sqlx::PgPool;
use tracing::info;

/// Embedded migrations from `migrations/`
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub type MigrationResult<T> = Result<T, sqlx::migrate::MigrateError>;

pub async fn run_migrations(pool: &PgPool) -> MigrationResult<()> {
    info!("Running database migrations");
    MIGRATOR.run(pool).await?;
    info!("✅ Database migrations complete");
    Ok(())
}
