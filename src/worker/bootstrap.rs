//! # Worker Bootstrap
//!
//! Wires one replica together from configuration and its collaborators:
//! saga store, transport, status sink, pipeline configuration source and
//! the step executors it hosts.
//!
//! ## Subscriptions
//!
//! - every event type of every enabled saga: competing, saga settings
//! - `ExecuteValidationStep`: competing, only when executors are hosted here
//! - `ConfigurationUpdated`, `RestartWorker`, `PluginUpdate`: fan-out

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{info, warn};

use super::broadcast::{
    ConfigurationUpdatedHandler, PluginRegistry, PluginUpdateHandler, RestartWorkerHandler,
};
use super::saga_handler::SagaEventHandler;
use super::step_execution::StepExecutionHandler;
use crate::collaborators::{
    LoggingStatusSink, PipelineConfigurationSource, StepExecutor, TargetStatusSink,
};
use crate::config::{BackendKind, ConfigManager};
use crate::constants::message_types;
use crate::dispatcher::{
    FanOutDispatcher, LockSettings, MessageHandler, SubscriptionInfo, SubscriptionSettings,
};
use crate::error::{DocflowError, DocflowResult};
use crate::messaging::{
    MessagePublisher, MessageRouterKind, MessagingError, MessagingProvider,
    PostgresMessagingService,
};
use crate::pipeline::{
    ConfiguredStepResolver, GenerationSaga, IngestionSaga, StaticPipelineConfiguration,
    StepExecutorRegistry, StepPipelineResolver, ValidationSaga,
};
use crate::resilience::RetryPolicy;
use crate::saga::{DispatchContext, EffectExecutor, EngineSettings, SagaDefinition, SagaEngine};
use crate::store::{InMemorySagaStore, PostgresSagaStore, SagaStore};

/// Collaborators a replica runs against
pub struct WorkerDependencies {
    pub store: Arc<dyn SagaStore>,
    pub messaging: Arc<MessagingProvider>,
    pub status_sink: Arc<dyn TargetStatusSink>,
    pub pipeline_source: Arc<dyn PipelineConfigurationSource>,
    pub executors: StepExecutorRegistry,
}

impl std::fmt::Debug for WorkerDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDependencies")
            .field("store", &self.store.backend_name())
            .field("messaging", &self.messaging.provider_name())
            .field("executors", &self.executors)
            .finish_non_exhaustive()
    }
}

impl WorkerDependencies {
    /// Process-local store and transport; pipelines from the `[pipelines]` config
    pub fn in_memory(config: &Arc<ConfigManager>) -> Self {
        Self {
            store: Arc::new(InMemorySagaStore::new()),
            messaging: Arc::new(MessagingProvider::in_memory()),
            status_sink: Arc::new(LoggingStatusSink),
            pipeline_source: Arc::new(StaticPipelineConfiguration::from_config(
                &config.config().pipelines,
            )),
            executors: StepExecutorRegistry::new(),
        }
    }

    /// Backends chosen by `engine.store` and `messaging.provider`; postgres ones share `pool`
    pub fn postgres(config: &Arc<ConfigManager>, pool: PgPool) -> Self {
        let settings = config.config();
        let store: Arc<dyn SagaStore> = match settings.engine.store {
            BackendKind::Postgres => Arc::new(PostgresSagaStore::new(pool.clone())),
            BackendKind::InMemory => Arc::new(InMemorySagaStore::new()),
        };
        let messaging = match settings.messaging.provider {
            BackendKind::Postgres => MessagingProvider::from(PostgresMessagingService::new(pool)),
            BackendKind::InMemory => MessagingProvider::in_memory(),
        };

        Self {
            store,
            messaging: Arc::new(messaging),
            ..Self::in_memory(config)
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SagaStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_messaging(mut self, messaging: Arc<MessagingProvider>) -> Self {
        self.messaging = messaging;
        self
    }

    pub fn with_status_sink(mut self, status_sink: Arc<dyn TargetStatusSink>) -> Self {
        self.status_sink = status_sink;
        self
    }

    pub fn with_pipeline_source(mut self, source: Arc<dyn PipelineConfigurationSource>) -> Self {
        self.pipeline_source = source;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn StepExecutor>) -> Self {
        self.executors = self.executors.with_executor(executor);
        self
    }
}

/// A bootstrapped worker replica
pub struct DocflowWorker {
    config: Arc<ConfigManager>,
    replica_id: String,
    publisher: MessagePublisher,
    dispatcher: FanOutDispatcher,
    validation: Option<Arc<SagaEngine<ValidationSaga>>>,
    ingestion: Option<Arc<SagaEngine<IngestionSaga>>>,
    generation: Option<Arc<SagaEngine<GenerationSaga>>>,
    executors: Arc<StepExecutorRegistry>,
    resolver: Arc<dyn StepPipelineResolver>,
    plugins: Arc<PluginRegistry>,
    restart_tx: watch::Sender<Option<String>>,
    started: AtomicBool,
}

impl std::fmt::Debug for DocflowWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocflowWorker")
            .field("environment", &self.config.environment())
            .field("replica_id", &self.replica_id)
            .field("dispatcher", &self.dispatcher)
            .field("validation", &self.validation.is_some())
            .field("ingestion", &self.ingestion.is_some())
            .field("generation", &self.generation.is_some())
            .field("executors", &self.executors)
            .finish_non_exhaustive()
    }
}

impl DocflowWorker {
    /// Build engines, resolver and dispatcher; nothing is consumed until [`start`](Self::start)
    pub async fn bootstrap(
        config: Arc<ConfigManager>,
        deps: WorkerDependencies,
    ) -> DocflowResult<Self> {
        let settings = config.config();
        let replica_id = settings.worker.resolve_replica_id();
        let namespace = settings.messaging.server_namespace.clone();

        info!(
            environment = %config.environment(),
            replica_id = %replica_id,
            namespace = %namespace,
            store = deps.store.backend_name(),
            messaging = deps.messaging.provider_name(),
            "🚀 BOOTSTRAP: Starting docflow worker"
        );

        if !deps.messaging.health_check().await? {
            return Err(DocflowError::bootstrap(format!(
                "{} transport failed its health check",
                deps.messaging.provider_name()
            )));
        }

        let router = MessageRouterKind::default();
        let publisher = MessagePublisher::new(deps.messaging.clone(), router.clone(), &namespace);
        let retry_policy = Arc::new(RetryPolicy::from_config(&settings.retry)?);
        let dispatcher = FanOutDispatcher::new(
            deps.messaging.clone(),
            router,
            &namespace,
            &replica_id,
            retry_policy,
            LockSettings::from_config(&settings.messaging),
        );

        let executors = Arc::new(deps.executors);
        let mut configured = ConfiguredStepResolver::new(deps.pipeline_source);
        if !executors.is_empty() {
            configured = configured.with_registry(executors.clone());
        }
        let resolver: Arc<dyn StepPipelineResolver> = Arc::new(configured);

        let effects = EffectExecutor::new(publisher.clone(), deps.status_sink);
        let dispatch_context = DispatchContext::new(&namespace, &replica_id);
        let engine_settings = EngineSettings::from_config(&settings.engine);

        let validation = settings.worker.enable_validation.then(|| {
            Arc::new(SagaEngine::new(
                ValidationSaga::new(resolver.clone()),
                deps.store.clone(),
                effects.clone(),
                dispatch_context.clone(),
                engine_settings,
            ))
        });
        let ingestion = settings.worker.enable_ingestion.then(|| {
            Arc::new(SagaEngine::new(
                IngestionSaga::new(),
                deps.store.clone(),
                effects.clone(),
                dispatch_context.clone(),
                engine_settings,
            ))
        });
        let generation = settings.worker.enable_generation.then(|| {
            Arc::new(SagaEngine::new(
                GenerationSaga::new(),
                deps.store.clone(),
                effects.clone(),
                dispatch_context.clone(),
                engine_settings,
            ))
        });

        let (restart_tx, _) = watch::channel(None);

        info!(
            replica_id = %replica_id,
            validation = validation.is_some(),
            ingestion = ingestion.is_some(),
            generation = generation.is_some(),
            executors = executors.len(),
            "✅ BOOTSTRAP: Worker assembled"
        );

        Ok(Self {
            config,
            replica_id,
            publisher,
            dispatcher,
            validation,
            ingestion,
            generation,
            executors,
            resolver,
            plugins: Arc::new(PluginRegistry::new()),
            restart_tx,
            started: AtomicBool::new(false),
        })
    }

    /// Register every subscription and start consuming
    pub async fn start(&self) -> DocflowResult<Vec<SubscriptionInfo>> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!(replica_id = %self.replica_id, "Worker already started");
            return Ok(self.dispatcher.subscriptions());
        }

        let subscriptions = &self.config.config().subscriptions;
        let saga_settings = SubscriptionSettings::from_config(&subscriptions.saga);

        if let Some(engine) = &self.validation {
            self.register_saga(engine, saga_settings).await?;
        }
        if let Some(engine) = &self.ingestion {
            self.register_saga(engine, saga_settings).await?;
        }
        if let Some(engine) = &self.generation {
            self.register_saga(engine, saga_settings).await?;
        }

        if !self.executors.is_empty() {
            let handler = Arc::new(StepExecutionHandler::new(
                self.executors.clone(),
                self.plugins.clone(),
                self.publisher.clone(),
            ));
            self.dispatcher
                .register_competing(
                    message_types::EXECUTE_VALIDATION_STEP,
                    handler,
                    SubscriptionSettings::from_config(&subscriptions.step_execution),
                )
                .await?;
        }

        let broadcast_settings = SubscriptionSettings::from_config(&subscriptions.broadcast);
        let broadcasts: [(&str, Arc<dyn MessageHandler>); 3] = [
            (
                message_types::CONFIGURATION_UPDATED,
                Arc::new(ConfigurationUpdatedHandler::new(self.resolver.clone())),
            ),
            (
                message_types::RESTART_WORKER,
                Arc::new(RestartWorkerHandler::new(
                    self.replica_id.clone(),
                    self.restart_tx.clone(),
                )),
            ),
            (
                message_types::PLUGIN_UPDATE,
                Arc::new(PluginUpdateHandler::new(self.plugins.clone())),
            ),
        ];
        for (message_type, handler) in broadcasts {
            self.dispatcher
                .register_fan_out(message_type, handler, broadcast_settings)
                .await?;
        }

        let registered = self.dispatcher.subscriptions();
        info!(
            replica_id = %self.replica_id,
            subscriptions = registered.len(),
            "✅ BOOTSTRAP: Worker consuming"
        );
        Ok(registered)
    }

    async fn register_saga<D: SagaDefinition>(
        &self,
        engine: &Arc<SagaEngine<D>>,
        settings: SubscriptionSettings,
    ) -> Result<(), MessagingError> {
        let handler: Arc<dyn MessageHandler> = Arc::new(SagaEventHandler::new(engine.clone()));
        for event_type in engine.table().event_types() {
            self.dispatcher
                .register_competing(event_type, handler.clone(), settings)
                .await?;
        }
        Ok(())
    }

    /// Stop consuming and wait for in-flight handlers
    pub async fn shutdown(&self) -> DocflowResult<()> {
        info!(replica_id = %self.replica_id, "🛑 Worker shutdown requested");
        self.dispatcher.shutdown().await?;
        Ok(())
    }

    /// Receives the reason when a `RestartWorker` broadcast targets this replica
    pub fn restart_signal(&self) -> watch::Receiver<Option<String>> {
        self.restart_tx.subscribe()
    }

    pub fn config(&self) -> &Arc<ConfigManager> {
        &self.config
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    pub fn publisher(&self) -> &MessagePublisher {
        &self.publisher
    }

    pub fn dispatcher(&self) -> &FanOutDispatcher {
        &self.dispatcher
    }

    pub fn validation_engine(&self) -> Option<&Arc<SagaEngine<ValidationSaga>>> {
        self.validation.as_ref()
    }

    pub fn ingestion_engine(&self) -> Option<&Arc<SagaEngine<IngestionSaga>>> {
        self.ingestion.as_ref()
    }

    pub fn generation_engine(&self) -> Option<&Arc<SagaEngine<GenerationSaga>>> {
        self.generation.as_ref()
    }

    pub fn resolver(&self) -> &Arc<dyn StepPipelineResolver> {
        &self.resolver
    }

    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }
}
