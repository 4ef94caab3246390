//! # Saga Engine
//!
//! Applies events to correlation-keyed saga instances through a transition
//! table. One dispatch is one unit of work:
//!
//! 1. load the instance (or create it when the event starts a workflow)
//! 2. skip terminal instances, unknown pairs and failed guards
//! 3. run activities, pick the target state
//! 4. save with the version that was read, effects included in the outbox
//! 5. after commit, execute the effects and clear their outbox entries
//!
//! A version conflict at step 4 discards everything and retries from step 1.
//!
//! Outbox entries carry the version that committed them. An applied dispatch
//! executes its own entries plus any older than `outbox_resend_after`;
//! entries from a dispatch that may still be flushing are left to it. A
//! dispatch that changes nothing (redelivery, late event) executes every
//! pending entry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, warn};
use uuid::Uuid;

use super::context::{ActivityContext, DispatchContext, InstanceOf};
use super::definition::{SagaDefinition, SagaEvent, SagaState};
use super::effects::{EffectExecutor, SagaEffect};
use super::errors::{EngineError, EngineResult};
use super::transitions::TransitionTable;
use crate::config::EngineConfig;
use crate::constants::defaults;
use crate::logging::{log_dispatch_skipped, log_saga_transition};
use crate::store::{OutboxEntry, ReadLock, SagaStore, SagaUnitOfWork, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No instance exists and the event does not start one
    NoInstance,
    NoTransition {
        state: &'static str,
        event_type: &'static str,
    },
    GuardRejected {
        guard: &'static str,
    },
}

impl IgnoreReason {
    fn describe(&self) -> String {
        match self {
            Self::NoInstance => "no instance and not a starting event".to_string(),
            Self::NoTransition { state, event_type } => {
                format!("no transition from {state} on {event_type}")
            }
            Self::GuardRejected { guard } => format!("guard {guard} rejected the event"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome<S> {
    Applied { from: S, to: S, version: i64 },
    /// Instance is terminal; the event changed nothing
    Absorbed { state: S },
    Ignored(IgnoreReason),
}

impl<S> DispatchOutcome<S> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub max_concurrency_retries: u32,
    pub read_lock: ReadLock,
    /// Age after which another dispatch re-sends an earlier version's outbox entries
    pub outbox_resend_after: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_concurrency_retries: config.max_concurrency_retries.max(1),
            read_lock: if config.pessimistic_lock {
                ReadLock::ForUpdate
            } else {
                ReadLock::None
            },
            outbox_resend_after: Duration::from_secs(config.outbox_resend_after_seconds),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrency_retries: defaults::MAX_CONCURRENCY_RETRIES,
            read_lock: ReadLock::ForUpdate,
            outbox_resend_after: Duration::from_secs(defaults::OUTBOX_RESEND_AFTER_SECONDS),
        }
    }
}

pub struct SagaEngine<D: SagaDefinition> {
    definition: Arc<D>,
    table: TransitionTable<D>,
    store: Arc<dyn SagaStore>,
    effects: EffectExecutor,
    dispatch_context: DispatchContext,
    settings: EngineSettings,
}

impl<D: SagaDefinition> std::fmt::Debug for SagaEngine<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaEngine")
            .field("saga_type", &D::SAGA_TYPE)
            .field("store", &self.store.backend_name())
            .field("dispatch_context", &self.dispatch_context)
            .field("settings", &self.settings)
            .finish()
    }
}

impl<D: SagaDefinition> SagaEngine<D> {
    pub fn new(
        definition: D,
        store: Arc<dyn SagaStore>,
        effects: EffectExecutor,
        dispatch_context: DispatchContext,
        settings: EngineSettings,
    ) -> Self {
        let table = definition.transitions();
        Self {
            definition: Arc::new(definition),
            table,
            store,
            effects,
            dispatch_context,
            settings,
        }
    }

    pub fn definition(&self) -> &D {
        &self.definition
    }

    pub fn table(&self) -> &TransitionTable<D> {
        &self.table
    }

    pub fn dispatch_context(&self) -> &DispatchContext {
        &self.dispatch_context
    }

    /// Apply `event` to the instance keyed by `correlation_id`
    pub async fn dispatch(
        &self,
        correlation_id: Uuid,
        event: D::Event,
    ) -> EngineResult<DispatchOutcome<D::State>> {
        let max_attempts = self.settings.max_concurrency_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.dispatch_once(correlation_id, &event).await {
                Err(EngineError::Store(StoreError::ConcurrencyConflict {
                    expected, actual, ..
                })) => {
                    if attempt >= max_attempts {
                        error!(
                            correlation_id = %correlation_id,
                            saga_type = D::SAGA_TYPE,
                            event_type = event.event_type(),
                            attempts = attempt,
                            "Concurrency retries exhausted"
                        );
                        return Err(EngineError::ConcurrencyRetriesExhausted {
                            saga_type: D::SAGA_TYPE.to_string(),
                            correlation_id,
                            attempts: attempt,
                        });
                    }
                    warn!(
                        correlation_id = %correlation_id,
                        saga_type = D::SAGA_TYPE,
                        event_type = event.event_type(),
                        attempt = attempt,
                        expected_version = ?expected,
                        actual_version = ?actual,
                        "Concurrency conflict, retrying dispatch"
                    );
                }
                other => return other,
            }
        }
    }

    /// Unlocked read of the current instance
    pub async fn load(&self, correlation_id: Uuid) -> EngineResult<Option<InstanceOf<D>>> {
        self.store
            .load(D::SAGA_TYPE, correlation_id)
            .await?
            .map(|record| {
                InstanceOf::<D>::from_record(&record)
                    .map_err(|e| EngineError::corrupt_record(D::SAGA_TYPE, correlation_id, e))
            })
            .transpose()
    }

    /// Instances currently in `state`, oldest first
    pub async fn list_in_state(&self, state: D::State) -> EngineResult<Vec<InstanceOf<D>>> {
        self.store
            .list_by_state(D::SAGA_TYPE, state.as_str())
            .await?
            .iter()
            .map(|record| {
                InstanceOf::<D>::from_record(record).map_err(|e| {
                    EngineError::corrupt_record(D::SAGA_TYPE, record.correlation_id, e)
                })
            })
            .collect()
    }

    async fn dispatch_once(
        &self,
        correlation_id: Uuid,
        event: &D::Event,
    ) -> EngineResult<DispatchOutcome<D::State>> {
        let event_type = event.event_type();
        let mut uow = self
            .store
            .begin(D::SAGA_TYPE, correlation_id, self.settings.read_lock)
            .await?;

        let (mut instance, expected_version, pending) = match uow.try_load().await? {
            Some(record) => {
                let instance = InstanceOf::<D>::from_record(&record)
                    .map_err(|e| EngineError::corrupt_record(D::SAGA_TYPE, correlation_id, e))?;
                (instance, Some(record.version), record.outbox)
            }
            None => {
                if !self.table.contains(D::State::initial(), event_type) {
                    uow.commit().await?;
                    log_dispatch_skipped(
                        correlation_id,
                        D::SAGA_TYPE,
                        event_type,
                        &IgnoreReason::NoInstance.describe(),
                    );
                    return Ok(DispatchOutcome::Ignored(IgnoreReason::NoInstance));
                }
                (InstanceOf::<D>::new(correlation_id), None, Vec::new())
            }
        };

        let from = instance.state;
        if from.is_terminal() {
            return self
                .skip(uow, &instance, event_type, pending, DispatchOutcome::Absorbed { state: from })
                .await;
        }

        let Some(transition) = self.table.get(from, event_type) else {
            let reason = IgnoreReason::NoTransition {
                state: from.as_str(),
                event_type,
            };
            return self
                .skip(uow, &instance, event_type, pending, DispatchOutcome::Ignored(reason))
                .await;
        };

        if let Some(guard) = transition.guard() {
            if !guard.allows(&instance, event) {
                let reason = IgnoreReason::GuardRejected { guard: guard.name };
                return self
                    .skip(uow, &instance, event_type, pending, DispatchOutcome::Ignored(reason))
                    .await;
            }
        }

        let mut effects: Vec<SagaEffect> = Vec::new();
        let to = {
            let mut ctx =
                ActivityContext::new(&mut instance, event, &self.dispatch_context, &mut effects);
            for activity in transition.activities() {
                activity.execute(&mut ctx).await?;
            }

            let (branch_activities, target) =
                transition
                    .select(&*ctx.instance)
                    .ok_or(EngineError::NoBranchMatched {
                        state: from.as_str(),
                        event_type,
                    })?;
            for activity in branch_activities {
                activity.execute(&mut ctx).await?;
            }
            target
        };

        instance.state = to;
        instance.updated_at = Utc::now();

        let next_version = expected_version.map_or(1, |v| v + 1);
        let mut outbox = pending;
        outbox.extend(
            effects
                .into_iter()
                .map(|effect| OutboxEntry::new(next_version, effect)),
        );
        let record = instance
            .to_record(D::SAGA_TYPE, outbox)
            .map_err(StoreError::from)?;

        let version = uow.save(&record, expected_version).await?;
        uow.commit().await?;

        log_saga_transition(
            correlation_id,
            D::SAGA_TYPE,
            from.as_str(),
            to.as_str(),
            event_type,
            version,
        );

        let resend_before = Utc::now()
            - chrono::Duration::from_std(self.settings.outbox_resend_after)
                .unwrap_or_else(|_| chrono::Duration::zero());
        let due: Vec<OutboxEntry> = record
            .outbox
            .into_iter()
            .filter(|entry| entry.version == next_version || entry.recorded_at <= resend_before)
            .collect();
        self.flush(correlation_id, &due).await?;

        Ok(DispatchOutcome::Applied { from, to, version })
    }

    /// Finish a dispatch that changes nothing, flushing any pending outbox
    async fn skip(
        &self,
        uow: Box<dyn SagaUnitOfWork>,
        instance: &InstanceOf<D>,
        event_type: &'static str,
        pending: Vec<OutboxEntry>,
        outcome: DispatchOutcome<D::State>,
    ) -> EngineResult<DispatchOutcome<D::State>> {
        uow.commit().await?;

        let reason = match &outcome {
            DispatchOutcome::Ignored(reason) => reason.describe(),
            _ => format!("instance is terminal ({})", instance.state.as_str()),
        };
        log_dispatch_skipped(instance.correlation_id, D::SAGA_TYPE, event_type, &reason);

        self.flush(instance.correlation_id, &pending).await?;
        Ok(outcome)
    }

    async fn flush(&self, correlation_id: Uuid, entries: &[OutboxEntry]) -> EngineResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let effects: Vec<SagaEffect> = entries.iter().map(|entry| entry.effect.clone()).collect();
        self.effects.execute_all(correlation_id, &effects).await?;

        let mut versions: Vec<i64> = entries.iter().map(|entry| entry.version).collect();
        versions.sort_unstable();
        versions.dedup();

        // effects already went out; entries left behind are only re-sent
        if let Err(e) = self
            .store
            .clear_outbox(D::SAGA_TYPE, correlation_id, &versions)
            .await
        {
            warn!(
                correlation_id = %correlation_id,
                saga_type = D::SAGA_TYPE,
                versions = ?versions,
                error = %e,
                "Failed to clear saga outbox"
            );
        }
        Ok(())
    }
}
