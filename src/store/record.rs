//! Persisted shape of a saga instance: one row per `(saga_type, correlation_id)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::StepDefinition;
use crate::saga::SagaEffect;

/// Where and why a workflow stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaFailure {
    /// State the instance was in when the failure was recorded
    pub stage: String,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// An effect waiting in the outbox, tagged with the version that committed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub version: i64,
    pub recorded_at: DateTime<Utc>,
    pub effect: SagaEffect,
}

impl OutboxEntry {
    pub fn new(version: i64, effect: SagaEffect) -> Self {
        Self {
            version,
            recorded_at: Utc::now(),
            effect,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaRecord {
    pub saga_type: String,
    pub correlation_id: Uuid,
    pub current_state: String,
    /// 0 until first saved; the store assigns every later value
    pub version: i64,
    pub current_step_index: i32,
    pub ordered_steps: Vec<StepDefinition>,
    pub payload: serde_json::Value,
    pub failure: Option<SagaFailure>,
    /// Effects committed but not yet confirmed as executed
    #[serde(default)]
    pub outbox: Vec<OutboxEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaRecord {
    pub fn has_pending_effects(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Versions with entries still in the outbox, ascending
    pub fn pending_versions(&self) -> Vec<i64> {
        let mut versions: Vec<i64> = self.outbox.iter().map(|entry| entry.version).collect();
        versions.sort_unstable();
        versions.dedup();
        versions
    }
}
