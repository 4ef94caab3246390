//! # In-Memory Saga Store
//!
//! Process-local store for tests and single-replica development. Records
//! live in a `DashMap`; `ReadLock::ForUpdate` takes a per-instance async
//! mutex that is held until the unit of work commits or is dropped. The lock
//! table only keeps weak handles and forgets a key once nobody holds or
//! awaits its mutex.
//!
//! Saves are applied immediately under the map's shard lock, so the version
//! check and the write are one atomic step.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use super::errors::{StoreError, StoreResult};
use super::record::SagaRecord;
use super::traits::{ReadLock, SagaStore, SagaUnitOfWork};

type SagaKey = (String, Uuid);

#[derive(Debug, Default)]
struct Inner {
    records: DashMap<SagaKey, SagaRecord>,
    locks: Mutex<HashMap<SagaKey, Weak<tokio::sync::Mutex<()>>>>,
}

impl Inner {
    fn lock_for(&self, key: &SagaKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        if let Some(existing) = locks.get(key).and_then(Weak::upgrade) {
            return existing;
        }
        let lock = Arc::new(tokio::sync::Mutex::new(()));
        locks.insert(key.clone(), Arc::downgrade(&lock));
        lock
    }

    fn forget_unused_lock(&self, key: &SagaKey) {
        let mut locks = self.locks.lock();
        if locks.get(key).is_some_and(|lock| lock.strong_count() == 0) {
            locks.remove(key);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySagaStore {
    inner: Arc<Inner>,
}

impl InMemorySagaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.inner.records.len()
    }
}

struct InMemoryUnitOfWork {
    inner: Arc<Inner>,
    key: SagaKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InMemoryUnitOfWork {
    fn drop(&mut self) {
        if self.guard.take().is_some() {
            self.inner.forget_unused_lock(&self.key);
        }
    }
}

#[async_trait]
impl SagaUnitOfWork for InMemoryUnitOfWork {
    async fn try_load(&mut self) -> StoreResult<Option<SagaRecord>> {
        Ok(self.inner.records.get(&self.key).map(|r| r.value().clone()))
    }

    async fn save(
        &mut self,
        record: &SagaRecord,
        expected_version: Option<i64>,
    ) -> StoreResult<i64> {
        let (saga_type, correlation_id) = (&self.key.0, self.key.1);
        let mut stored = record.clone();
        stored.saga_type = saga_type.clone();
        stored.correlation_id = correlation_id;
        stored.updated_at = Utc::now();

        match (self.inner.records.entry(self.key.clone()), expected_version) {
            (Entry::Vacant(slot), None) => {
                stored.version = 1;
                slot.insert(stored);
                Ok(1)
            }
            (Entry::Occupied(existing), None) => Err(StoreError::conflict(
                saga_type.as_str(),
                correlation_id,
                None,
                Some(existing.get().version),
            )),
            (Entry::Vacant(_), Some(expected)) => Err(StoreError::conflict(
                saga_type.as_str(),
                correlation_id,
                Some(expected),
                None,
            )),
            (Entry::Occupied(mut existing), Some(expected)) => {
                let actual = existing.get().version;
                if actual != expected {
                    return Err(StoreError::conflict(
                        saga_type.as_str(),
                        correlation_id,
                        Some(expected),
                        Some(actual),
                    ));
                }
                stored.version = expected + 1;
                stored.created_at = existing.get().created_at;
                let version = stored.version;
                existing.insert(stored);
                Ok(version)
            }
        }
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn begin(
        &self,
        saga_type: &str,
        correlation_id: Uuid,
        lock: ReadLock,
    ) -> StoreResult<Box<dyn SagaUnitOfWork>> {
        let key = (saga_type.to_string(), correlation_id);
        let guard = match lock {
            ReadLock::ForUpdate => Some(self.inner.lock_for(&key).lock_owned().await),
            ReadLock::None => None,
        };
        Ok(Box::new(InMemoryUnitOfWork {
            inner: self.inner.clone(),
            key,
            guard,
        }))
    }

    async fn load(
        &self,
        saga_type: &str,
        correlation_id: Uuid,
    ) -> StoreResult<Option<SagaRecord>> {
        Ok(self
            .inner
            .records
            .get(&(saga_type.to_string(), correlation_id))
            .map(|r| r.value().clone()))
    }

    async fn list_by_state(&self, saga_type: &str, state: &str) -> StoreResult<Vec<SagaRecord>> {
        let mut records: Vec<SagaRecord> = self
            .inner
            .records
            .iter()
            .filter(|r| r.saga_type == saga_type && r.current_state == state)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn clear_outbox(
        &self,
        saga_type: &str,
        correlation_id: Uuid,
        versions: &[i64],
    ) -> StoreResult<()> {
        if let Some(mut record) = self
            .inner
            .records
            .get_mut(&(saga_type.to_string(), correlation_id))
        {
            record
                .outbox
                .retain(|entry| !versions.contains(&entry.version));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "in_memory"
    }
}
