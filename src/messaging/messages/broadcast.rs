//! Control messages delivered to every replica through fan-out subscriptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::message_types;
use crate::message_contract;

/// Pipeline configuration changed; `None` means every document process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationUpdated {
    pub correlation_id: Uuid,
    pub document_process_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Ask replicas to restart; `None` targets every replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartWorker {
    pub correlation_id: Uuid,
    pub reason: String,
    pub target_replica: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginAction {
    Enable,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginUpdate {
    pub correlation_id: Uuid,
    pub plugin_name: String,
    pub version: String,
    pub action: PluginAction,
}

message_contract!(ConfigurationUpdated, message_types::CONFIGURATION_UPDATED);
message_contract!(RestartWorker, message_types::RESTART_WORKER);
message_contract!(PluginUpdate, message_types::PLUGIN_UPDATE);
