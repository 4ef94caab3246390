//! # Configuration
//!
//! Layered configuration for a docflow worker replica:
//!
//! 1. `config/docflow.toml` (base)
//! 2. `config/docflow.{environment}.toml` (environment overlay)
//! 3. `DOCFLOW__SECTION__KEY` environment variables
//!
//! Every section carries serde defaults so an empty configuration is a valid
//! in-memory development setup.

pub mod error;
pub mod loader;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::defaults;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DocflowConfig {
    pub environment: String,
    pub database: DatabaseConfig,
    pub messaging: MessagingConfig,
    pub engine: EngineConfig,
    pub retry: RetryConfig,
    pub subscriptions: SubscriptionsConfig,
    pub pipelines: PipelinesConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL; required when either backend is `postgres`
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 5,
            run_migrations: true,
        }
    }
}

/// Backend selection shared by the transport and the saga store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub provider: BackendKind,
    /// Prefix for every topic and queue owned by this deployment
    pub server_namespace: String,
    pub lock_duration_seconds: u64,
    pub max_auto_renew_seconds: u64,
    pub poll_interval_ms: u64,
}

impl MessagingConfig {
    pub fn lock_duration(&self) -> Duration {
        Duration::from_secs(self.lock_duration_seconds)
    }

    pub fn max_auto_renew(&self) -> Duration {
        Duration::from_secs(self.max_auto_renew_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            provider: BackendKind::InMemory,
            server_namespace: defaults::SERVER_NAMESPACE.to_string(),
            lock_duration_seconds: defaults::LOCK_DURATION_SECONDS,
            max_auto_renew_seconds: defaults::MAX_AUTO_RENEW_SECONDS,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store: BackendKind,
    pub max_concurrency_retries: u32,
    /// Take a row lock for the read-modify-write section of a dispatch
    pub pessimistic_lock: bool,
    /// Age at which pending outbox entries are re-sent by a later dispatch
    pub outbox_resend_after_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store: BackendKind::InMemory,
            max_concurrency_retries: defaults::MAX_CONCURRENCY_RETRIES,
            pessimistic_lock: true,
            outbox_resend_after_seconds: defaults::OUTBOX_RESEND_AFTER_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRangeConfig {
    pub min_seconds: u64,
    pub max_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryOverrideConfig {
    pub message_type: String,
    pub ranges: Vec<DelayRangeConfig>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub default_ranges: Vec<DelayRangeConfig>,
    pub overrides: Vec<RetryOverrideConfig>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_ranges: defaults::RETRY_RANGES_SECONDS
                .iter()
                .map(|&(min_seconds, max_seconds)| DelayRangeConfig {
                    min_seconds,
                    max_seconds,
                })
                .collect(),
            overrides: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub concurrency_limit: usize,
    pub prefetch_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionsConfig {
    /// Saga event subscriptions (competing)
    pub saga: SubscriptionConfig,
    /// Validation step execution commands (competing)
    pub step_execution: SubscriptionConfig,
    /// Broadcast control messages (fan-out)
    pub broadcast: SubscriptionConfig,
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self {
            saga: SubscriptionConfig {
                concurrency_limit: defaults::SAGA_CONCURRENCY_LIMIT,
                prefetch_count: defaults::SAGA_PREFETCH_COUNT,
            },
            step_execution: SubscriptionConfig {
                concurrency_limit: defaults::STEP_EXECUTION_CONCURRENCY_LIMIT,
                prefetch_count: defaults::STEP_EXECUTION_PREFETCH_COUNT,
            },
            broadcast: SubscriptionConfig {
                concurrency_limit: defaults::BROADCAST_CONCURRENCY_LIMIT,
                prefetch_count: defaults::BROADCAST_PREFETCH_COUNT,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguredStepConfig {
    pub execution_type: String,
    pub order: i32,
}

/// Ordered validation steps for one document process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationPipelineConfig {
    pub document_process: String,
    pub steps: Vec<ConfiguredStepConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelinesConfig {
    pub validation: Vec<ValidationPipelineConfig>,
}

impl PipelinesConfig {
    /// Validation pipelines keyed by document process name
    pub fn validation_by_process(&self) -> HashMap<String, Vec<ConfiguredStepConfig>> {
        self.validation
            .iter()
            .map(|p| (p.document_process.clone(), p.steps.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Stable replica identifier; derived from host and process when absent
    pub replica_id: Option<String>,
    pub enable_validation: bool,
    pub enable_ingestion: bool,
    pub enable_generation: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            replica_id: None,
            enable_validation: true,
            enable_ingestion: true,
            enable_generation: true,
        }
    }
}

impl WorkerConfig {
    pub fn resolve_replica_id(&self) -> String {
        match &self.replica_id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => {
                let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "docflow".to_string());
                format!("{}-{}", host, std::process::id())
            }
        }
    }
}

impl DocflowConfig {
    /// Validate cross-field constraints after loading
    pub fn validate(&self) -> ConfigResult<()> {
        let needs_database = self.messaging.provider == BackendKind::Postgres
            || self.engine.store == BackendKind::Postgres;
        if needs_database && self.database.url.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigurationError::missing_required_field(
                "database.url",
                "postgres backend selected",
            ));
        }

        if self.messaging.server_namespace.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "messaging.server_namespace",
                "",
                "namespace must not be empty",
            ));
        }

        if self.messaging.lock_duration_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "messaging.lock_duration_seconds",
                0,
                "lock duration must be positive",
            ));
        }

        if self.messaging.max_auto_renew_seconds < self.messaging.lock_duration_seconds {
            return Err(ConfigurationError::invalid_value(
                "messaging.max_auto_renew_seconds",
                self.messaging.max_auto_renew_seconds,
                "renewal window must cover at least one lock duration",
            ));
        }

        if self.engine.max_concurrency_retries == 0 {
            return Err(ConfigurationError::invalid_value(
                "engine.max_concurrency_retries",
                0,
                "at least one dispatch attempt is required",
            ));
        }

        for (name, sub) in [
            ("saga", &self.subscriptions.saga),
            ("step_execution", &self.subscriptions.step_execution),
            ("broadcast", &self.subscriptions.broadcast),
        ] {
            if sub.concurrency_limit == 0 || sub.prefetch_count == 0 {
                return Err(ConfigurationError::invalid_value(
                    format!("subscriptions.{name}"),
                    format!("{}/{}", sub.concurrency_limit, sub.prefetch_count),
                    "concurrency limit and prefetch count must be positive",
                ));
            }
        }

        let all_ranges = std::iter::once(("default", &self.retry.default_ranges, None)).chain(
            self.retry
                .overrides
                .iter()
                .map(|o| (o.message_type.as_str(), &o.ranges, o.max_attempts)),
        );
        for (owner, ranges, max_attempts) in all_ranges {
            if ranges.is_empty() && max_attempts.is_some_and(|attempts| attempts > 0) {
                return Err(ConfigurationError::invalid_value(
                    format!("retry.{owner}"),
                    "[]",
                    "redelivery attempts need at least one delay range",
                ));
            }
            if let Some(bad) = ranges.iter().find(|r| r.min_seconds > r.max_seconds) {
                return Err(ConfigurationError::invalid_value(
                    format!("retry.{owner}"),
                    format!("[{}, {}]", bad.min_seconds, bad.max_seconds),
                    "range minimum exceeds maximum",
                ));
            }
        }

        for pipeline in &self.pipelines.validation {
            if pipeline.document_process.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "document_process",
                    "pipelines.validation",
                ));
            }
        }

        Ok(())
    }
}
