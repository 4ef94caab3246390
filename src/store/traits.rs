use async_trait::async_trait;
use uuid::Uuid;

use super::errors::StoreResult;
use super::record::SagaRecord;

/// Lock hint for the read that opens a unit of work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadLock {
    /// Optimistic only: conflicting writers are caught by the version check
    #[default]
    None,
    /// Hold an exclusive lock on the instance until commit
    ForUpdate,
}

/// One read-modify-write cycle against a single saga instance
#[async_trait]
pub trait SagaUnitOfWork: Send {
    async fn try_load(&mut self) -> StoreResult<Option<SagaRecord>>;

    /// Insert (`expected_version = None`) or update the record
    ///
    /// Returns the version now stored. Fails with `ConcurrencyConflict` when
    /// the stored version is not `expected_version`, or when an insert finds
    /// an existing row.
    async fn save(&mut self, record: &SagaRecord, expected_version: Option<i64>)
        -> StoreResult<i64>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait]
pub trait SagaStore: Send + Sync + 'static {
    async fn begin(
        &self,
        saga_type: &str,
        correlation_id: Uuid,
        lock: ReadLock,
    ) -> StoreResult<Box<dyn SagaUnitOfWork>>;

    /// Unlocked read for status queries
    async fn load(&self, saga_type: &str, correlation_id: Uuid)
        -> StoreResult<Option<SagaRecord>>;

    async fn list_by_state(&self, saga_type: &str, state: &str) -> StoreResult<Vec<SagaRecord>>;

    /// Drop executed outbox entries committed by any of `versions`
    ///
    /// Entries from other versions stay, and the instance version is not bumped.
    async fn clear_outbox(
        &self,
        saga_type: &str,
        correlation_id: Uuid,
        versions: &[i64],
    ) -> StoreResult<()>;

    fn backend_name(&self) -> &'static str;
}
