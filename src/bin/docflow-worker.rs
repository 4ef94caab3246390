//! # Docflow Worker
//!
//! Standalone worker replica. Runs until Ctrl+C, SIGTERM or a targeted
//! `RestartWorker` broadcast; in the last case the process exits non-zero so
//! the supervisor starts a fresh replica.
//!
//! ## Usage
//!
//! ```bash
//! # in-memory store and transport
//! cargo run --bin docflow-worker
//!
//! # postgres backends from config/docflow.production.toml
//! DOCFLOW_ENV=production DOCFLOW__DATABASE__URL=postgresql://... cargo run --bin docflow-worker
//! ```

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use docflow_core::config::{BackendKind, ConfigManager};
use docflow_core::database::{run_migrations, DatabaseConnection};
use docflow_core::logging;
use docflow_core::worker::{DocflowWorker, WorkerDependencies};

enum Exit {
    Signal,
    Restart(String),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_structured_logging();

    info!("🚀 Starting Docflow Worker...");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ConfigManager::load().context("failed to load configuration")?;
    info!("   Environment: {}", config.environment());

    let settings = config.config();
    let needs_database = settings.engine.store == BackendKind::Postgres
        || settings.messaging.provider == BackendKind::Postgres;

    let (deps, database) = if needs_database {
        let database = DatabaseConnection::connect(&settings.database)
            .await
            .context("failed to connect to PostgreSQL")?;
        if settings.database.run_migrations {
            run_migrations(database.pool())
                .await
                .context("failed to run migrations")?;
        }
        (
            WorkerDependencies::postgres(&config, database.pool().clone()),
            Some(database),
        )
    } else {
        (WorkerDependencies::in_memory(&config), None)
    };

    let worker = DocflowWorker::bootstrap(config.clone(), deps)
        .await
        .context("failed to bootstrap worker")?;
    let subscriptions = worker.start().await.context("failed to start worker")?;

    info!("🎉 Docflow Worker started");
    info!("   Replica: {}", worker.replica_id());
    info!("   Subscriptions: {}", subscriptions.len());
    info!("   Press Ctrl+C to shutdown gracefully");

    let mut restart = worker.restart_signal();
    let exit = tokio::select! {
        () = shutdown_signal() => Exit::Signal,
        reason = wait_for_restart(&mut restart) => Exit::Restart(reason),
    };

    info!("🛑 Shutdown requested, draining in-flight messages...");
    if let Err(e) = worker.shutdown().await {
        error!("Failed to stop worker cleanly: {}", e);
    } else {
        info!("✅ Worker stopped");
    }
    if let Some(database) = database {
        database.close().await;
    }

    match exit {
        Exit::Signal => {
            info!("👋 Docflow Worker shutdown complete");
            Ok(())
        }
        Exit::Restart(reason) => {
            warn!("🔁 Exiting for restart: {}", reason);
            std::process::exit(75)
        }
    }
}

async fn wait_for_restart(restart: &mut tokio::sync::watch::Receiver<Option<String>>) -> String {
    loop {
        if let Some(reason) = restart.borrow_and_update().clone() {
            return reason;
        }
        if restart.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
