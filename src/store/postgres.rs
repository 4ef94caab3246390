//! # PostgreSQL Saga Store
//!
//! One row per saga instance in `saga_instances`. Each unit of work is a
//! transaction; `ReadLock::ForUpdate` reads with `SELECT ... FOR UPDATE` so a
//! second replica blocks until the first commits. Writes are guarded by the
//! `version` column whether or not the row was locked.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::errors::{StoreError, StoreResult};
use super::record::SagaRecord;
use super::traits::{ReadLock, SagaStore, SagaUnitOfWork};

const SELECT_COLUMNS: &str = "saga_type, correlation_id, current_state, version, \
     current_step_index, ordered_steps, payload, failure, outbox, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn record_from_row(row: &PgRow) -> StoreResult<SagaRecord> {
    let decode = |e: sqlx::Error| StoreError::database("decode saga row", e);

    let ordered_steps: Value = row.try_get("ordered_steps").map_err(decode)?;
    let failure: Option<Value> = row.try_get("failure").map_err(decode)?;
    let outbox: Value = row.try_get("outbox").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(decode)?;

    Ok(SagaRecord {
        saga_type: row.try_get("saga_type").map_err(decode)?,
        correlation_id: row.try_get("correlation_id").map_err(decode)?,
        current_state: row.try_get("current_state").map_err(decode)?,
        version: row.try_get("version").map_err(decode)?,
        current_step_index: row.try_get("current_step_index").map_err(decode)?,
        ordered_steps: serde_json::from_value(ordered_steps)?,
        payload: row.try_get("payload").map_err(decode)?,
        failure: failure.map(serde_json::from_value).transpose()?,
        outbox: serde_json::from_value(outbox)?,
        created_at,
        updated_at,
    })
}

struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
    saga_type: String,
    correlation_id: Uuid,
    lock: ReadLock,
}

impl PostgresUnitOfWork {
    async fn current_version(&mut self) -> StoreResult<Option<i64>> {
        sqlx::query_scalar(
            "SELECT version FROM saga_instances WHERE saga_type = $1 AND correlation_id = $2",
        )
        .bind(&self.saga_type)
        .bind(self.correlation_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| StoreError::database("read version", e))
    }
}

#[async_trait]
impl SagaUnitOfWork for PostgresUnitOfWork {
    async fn try_load(&mut self) -> StoreResult<Option<SagaRecord>> {
        let lock_clause = match self.lock {
            ReadLock::ForUpdate => " FOR UPDATE",
            ReadLock::None => "",
        };
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM saga_instances \
             WHERE saga_type = $1 AND correlation_id = $2{lock_clause}"
        );

        let row = sqlx::query(&sql)
            .bind(&self.saga_type)
            .bind(self.correlation_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| StoreError::database("load saga", e))?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn save(
        &mut self,
        record: &SagaRecord,
        expected_version: Option<i64>,
    ) -> StoreResult<i64> {
        let ordered_steps = serde_json::to_value(&record.ordered_steps)?;
        let failure = record
            .failure
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let outbox = serde_json::to_value(&record.outbox)?;

        let stored: Option<i64> = match expected_version {
            None => sqlx::query_scalar(
                "INSERT INTO saga_instances \
                 (saga_type, correlation_id, current_state, version, current_step_index, \
                  ordered_steps, payload, failure, outbox, created_at, updated_at) \
                 VALUES ($1, $2, $3, 1, $4, $5, $6, $7, $8, $9, now()) \
                 ON CONFLICT (saga_type, correlation_id) DO NOTHING \
                 RETURNING version",
            )
            .bind(&self.saga_type)
            .bind(self.correlation_id)
            .bind(&record.current_state)
            .bind(record.current_step_index)
            .bind(ordered_steps)
            .bind(&record.payload)
            .bind(failure)
            .bind(outbox)
            .bind(record.created_at)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| StoreError::database("insert saga", e))?,
            Some(expected) => sqlx::query_scalar(
                "UPDATE saga_instances SET \
                 current_state = $3, version = version + 1, current_step_index = $4, \
                 ordered_steps = $5, payload = $6, failure = $7, outbox = $8, updated_at = now() \
                 WHERE saga_type = $1 AND correlation_id = $2 AND version = $9 \
                 RETURNING version",
            )
            .bind(&self.saga_type)
            .bind(self.correlation_id)
            .bind(&record.current_state)
            .bind(record.current_step_index)
            .bind(ordered_steps)
            .bind(&record.payload)
            .bind(failure)
            .bind(outbox)
            .bind(expected)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| StoreError::database("update saga", e))?,
        };

        match stored {
            Some(version) => Ok(version),
            None => {
                let actual = self.current_version().await?;
                Err(StoreError::conflict(
                    self.saga_type.as_str(),
                    self.correlation_id,
                    expected_version,
                    actual,
                ))
            }
        }
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::database("commit", e))
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn begin(
        &self,
        saga_type: &str,
        correlation_id: Uuid,
        lock: ReadLock,
    ) -> StoreResult<Box<dyn SagaUnitOfWork>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::database("begin", e))?;
        Ok(Box::new(PostgresUnitOfWork {
            tx,
            saga_type: saga_type.to_string(),
            correlation_id,
            lock,
        }))
    }

    async fn load(
        &self,
        saga_type: &str,
        correlation_id: Uuid,
    ) -> StoreResult<Option<SagaRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM saga_instances WHERE saga_type = $1 AND correlation_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(saga_type)
            .bind(correlation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::database("load saga", e))?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn list_by_state(&self, saga_type: &str, state: &str) -> StoreResult<Vec<SagaRecord>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM saga_instances \
             WHERE saga_type = $1 AND current_state = $2 ORDER BY created_at"
        );
        let rows = sqlx::query(&sql)
            .bind(saga_type)
            .bind(state)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::database("list sagas", e))?;
        rows.iter().map(record_from_row).collect()
    }

    async fn clear_outbox(
        &self,
        saga_type: &str,
        correlation_id: Uuid,
        versions: &[i64],
    ) -> StoreResult<()> {
        if versions.is_empty() {
            return Ok(());
        }
        let result = sqlx::query(
            "UPDATE saga_instances SET outbox = COALESCE( \
                 (SELECT jsonb_agg(e.entry ORDER BY e.position) \
                  FROM jsonb_array_elements(outbox) WITH ORDINALITY AS e(entry, position) \
                  WHERE NOT ((e.entry->>'version')::bigint = ANY($3))), \
                 '[]'::jsonb) \
             WHERE saga_type = $1 AND correlation_id = $2 AND outbox <> '[]'::jsonb",
        )
        .bind(saga_type)
        .bind(correlation_id)
        .bind(versions.to_vec())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::database("clear outbox", e))?;

        if result.rows_affected() == 0 {
            debug!(
                correlation_id = %correlation_id,
                saga_type = %saga_type,
                versions = ?versions,
                "Outbox already empty"
            );
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
