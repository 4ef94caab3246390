//! # Logging Module
//!
//! Environment-aware console logging using the tracing ecosystem.
//! Logs go to stdout; containers and process supervisors collect them.
//!
//! This module provides:
//! - Environment-based log level configuration (`DOCFLOW_ENV`, `LOG_LEVEL`, `RUST_LOG`)
//! - Optional JSON output (`DOCFLOW_LOG_FORMAT=json`)
//! - TTY-aware ANSI color output
//! - Domain helpers that keep `correlation_id` as the first structured field
//!
//! Every saga message carries a `correlation_id`, so filtering logs by that
//! field reconstructs a workflow run across replicas.

use std::io::IsTerminal;
use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};
use uuid::Uuid;

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured console logging
///
/// Safe to call more than once; only the first call installs a subscriber and
/// a subscriber installed elsewhere (e.g. by a test harness) is left in place.
pub fn init_structured_logging() {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment);
        let json_output = use_json_output();
        let use_ansi = IsTerminal::is_terminal(&std::io::stdout());

        let console_layer: Box<dyn Layer<Registry> + Send + Sync> = if json_output {
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(false)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(use_ansi)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry()
            .with(console_layer)
            .with(EnvFilter::new(&log_level));

        if subscriber.try_init().is_err() {
            tracing::debug!(
                "Global tracing subscriber already initialized - continuing with existing subscriber"
            );
        } else {
            tracing::info!(
                environment = %environment,
                log_level = %log_level,
                json_output = json_output,
                ansi_colors = use_ansi,
                "📝 Structured logging initialized"
            );
        }
    });
}

/// Get current environment from environment variables
pub fn get_environment() -> String {
    std::env::var("DOCFLOW_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment variables or environment defaults
fn get_log_level(environment: &str) -> String {
    if let Ok(level) = std::env::var("LOG_LEVEL") {
        return level.to_lowercase();
    }

    if let Ok(level) = std::env::var("RUST_LOG") {
        return level.to_lowercase();
    }

    match environment {
        "test" => "debug".to_string(),
        "development" => "debug".to_string(),
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn use_json_output() -> bool {
    std::env::var("DOCFLOW_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Log an applied saga transition
pub fn log_saga_transition(
    correlation_id: Uuid,
    saga_type: &str,
    from_state: &str,
    to_state: &str,
    event_type: &str,
    version: i64,
) {
    tracing::info!(
        correlation_id = %correlation_id,
        saga_type = %saga_type,
        from_state = %from_state,
        to_state = %to_state,
        event_type = %event_type,
        version = version,
        timestamp = %Utc::now().to_rfc3339(),
        "🔄 SAGA_TRANSITION {}: {} -> {} on {}", saga_type, from_state, to_state, event_type
    );
}

/// Log a dispatch that did not change the instance (absorbed or ignored)
pub fn log_dispatch_skipped(correlation_id: Uuid, saga_type: &str, event_type: &str, reason: &str) {
    tracing::debug!(
        correlation_id = %correlation_id,
        saga_type = %saga_type,
        event_type = %event_type,
        reason = %reason,
        "⏭️ SAGA_DISPATCH_SKIPPED {} on {}: {}", saga_type, event_type, reason
    );
}

/// Log a transport-level message operation
pub fn log_message_operation(
    operation: &str,
    queue_name: &str,
    message_type: &str,
    correlation_id: Uuid,
    delivery_attempt: u32,
    details: Option<&str>,
) {
    tracing::info!(
        correlation_id = %correlation_id,
        operation = %operation,
        queue_name = %queue_name,
        message_type = %message_type,
        delivery_attempt = delivery_attempt,
        details = details,
        "📨 QUEUE_{} {} on {}", operation, message_type, queue_name
    );
}

/// Generic error logging with unified format
pub fn log_error(component: &str, operation: &str, error: &str, correlation_id: Option<Uuid>) {
    tracing::error!(
        correlation_id = ?correlation_id,
        component = %component,
        operation = %operation,
        error = %error,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR: {} failed in {}: {}", operation, component, error
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_defaults_by_environment() {
        if std::env::var("LOG_LEVEL").is_ok() || std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("staging"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        log_dispatch_skipped(Uuid::new_v4(), "validation", "ValidationStepCompleted", "terminal");
    }
}
