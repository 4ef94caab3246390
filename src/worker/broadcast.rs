//! Handlers for the fan-out control messages every replica receives.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::info;

use crate::dispatcher::{HandlerError, MessageHandler};
use crate::messaging::messages::{ConfigurationUpdated, PluginAction, PluginUpdate, RestartWorker};
use crate::messaging::MessageEnvelope;
use crate::pipeline::StepPipelineResolver;

/// Drops cached validation pipelines when their configuration changes
pub struct ConfigurationUpdatedHandler {
    resolver: Arc<dyn StepPipelineResolver>,
}

impl ConfigurationUpdatedHandler {
    pub fn new(resolver: Arc<dyn StepPipelineResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl MessageHandler for ConfigurationUpdatedHandler {
    fn name(&self) -> &'static str {
        "configuration_updated"
    }

    async fn handle(&self, envelope: &MessageEnvelope) -> Result<(), HandlerError> {
        let update: ConfigurationUpdated = envelope.decode()?;
        self.resolver
            .invalidate(update.document_process_name.as_deref());
        info!(
            correlation_id = %update.correlation_id,
            document_process = ?update.document_process_name,
            updated_at = %update.updated_at,
            "🔧 Pipeline configuration invalidated"
        );
        Ok(())
    }
}

/// Signals the process owner to restart this replica
pub struct RestartWorkerHandler {
    replica_id: String,
    restart_tx: watch::Sender<Option<String>>,
}

impl RestartWorkerHandler {
    pub fn new(replica_id: impl Into<String>, restart_tx: watch::Sender<Option<String>>) -> Self {
        Self {
            replica_id: replica_id.into(),
            restart_tx,
        }
    }
}

#[async_trait]
impl MessageHandler for RestartWorkerHandler {
    fn name(&self) -> &'static str {
        "restart_worker"
    }

    async fn handle(&self, envelope: &MessageEnvelope) -> Result<(), HandlerError> {
        let restart: RestartWorker = envelope.decode()?;
        let targeted = restart
            .target_replica
            .as_deref()
            .map_or(true, |target| target == self.replica_id);
        if !targeted {
            return Ok(());
        }

        info!(
            correlation_id = %restart.correlation_id,
            replica_id = %self.replica_id,
            reason = %restart.reason,
            "🔁 Restart requested"
        );
        self.restart_tx.send_replace(Some(restart.reason));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginState {
    pub version: String,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

/// Plugins known to this replica and whether they may run
///
/// Plugin names match step execution types. A plugin this replica has never
/// heard of is allowed; one that was stopped keeps its steps off this replica.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: DashMap<String, PluginState>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, update: &PluginUpdate) {
        let enabled = matches!(update.action, PluginAction::Enable);
        self.plugins.insert(
            update.plugin_name.clone(),
            PluginState {
                version: update.version.clone(),
                enabled,
                updated_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, plugin_name: &str) -> Option<PluginState> {
        self.plugins.get(plugin_name).map(|p| p.value().clone())
    }

    pub fn is_enabled(&self, plugin_name: &str) -> bool {
        self.plugins
            .get(plugin_name)
            .is_some_and(|p| p.enabled)
    }

    pub fn is_stopped(&self, plugin_name: &str) -> bool {
        self.plugins
            .get(plugin_name)
            .is_some_and(|p| !p.enabled)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

pub struct PluginUpdateHandler {
    plugins: Arc<PluginRegistry>,
}

impl PluginUpdateHandler {
    pub fn new(plugins: Arc<PluginRegistry>) -> Self {
        Self { plugins }
    }
}

#[async_trait]
impl MessageHandler for PluginUpdateHandler {
    fn name(&self) -> &'static str {
        "plugin_update"
    }

    async fn handle(&self, envelope: &MessageEnvelope) -> Result<(), HandlerError> {
        let update: PluginUpdate = envelope.decode()?;
        self.plugins.apply(&update);
        info!(
            correlation_id = %update.correlation_id,
            plugin = %update.plugin_name,
            version = %update.version,
            action = ?update.action,
            "🧩 Plugin updated"
        );
        Ok(())
    }
}
