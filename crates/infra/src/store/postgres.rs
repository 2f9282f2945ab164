//! Postgres-backed store implementation.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | Result |
//! |------------|----------------------|--------|
//! | Database (unique violation) | `23505` | `Ok(InsertOutcome::AlreadyRecorded)` |
//! | Database (other) | Any other | `StoreError::Database` |
//! | PoolTimedOut / PoolClosed / Io / Tls | N/A | `StoreError::Unavailable` |
//! | ColumnDecode / Decode | N/A | `StoreError::Decode` |
//!
//! ## Thread Safety
//!
//! `PostgresStore` is `Send + Sync` and cheap to clone; all operations go
//! through the SQLx connection pool. No connection is held beyond a single
//! operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{Span, debug, instrument};
use uuid::Uuid;

use payrelay_core::{FailedStatusUpdate, FailedStatusUpdateRow, PayoutRecord, TransactionId};

use super::r#trait::{InsertOutcome, PayoutStore, StoreError, StoreOp, hold_until};
use crate::config::DatabaseConfig;
use crate::retry::ReconcileBackoff;

const SCHEMA: &str = include_str!("../../schema.sql");

/// Postgres-backed payout store.
///
/// Every mutation runs in its own transaction: begin, execute, commit, or
/// roll back on error. A unique violation on the natural key rolls back and
/// reports [`InsertOutcome::AlreadyRecorded`].
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool from configuration and connect.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = config
            .connect_options()
            .map_err(|e| map_sqlx_error("parse_database_url", e))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        tracing::info!(
            host = %config.host,
            database = %config.database,
            max_connections = config.max_connections,
            "connection pool created"
        );
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'_, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

#[async_trait]
impl PayoutStore for PostgresStore {
    #[instrument(
        skip(self, op),
        fields(
            operation = op.name(),
            key = %op.key(),
            outcome = tracing::field::Empty
        ),
        err
    )]
    async fn execute(&self, op: StoreOp) -> Result<InsertOutcome, StoreError> {
        let mut tx = self.begin().await?;

        let result = match &op {
            StoreOp::PayoutInsert(payout) => insert_payout(&mut tx, payout).await,
            StoreOp::FailedUpdateInsert(update) => upsert_failed_update(&mut tx, update).await,
        };

        match result {
            Ok(outcome) => {
                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit_transaction", e))?;
                Span::current().record("outcome", tracing::field::debug(&outcome));
                Ok(outcome)
            }
            Err(e) if is_unique_violation(&e) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                debug!(key = %op.key(), "already recorded");
                Ok(InsertOutcome::AlreadyRecorded)
            }
            Err(e) => {
                // The original error is the one worth reporting.
                let _ = tx.rollback().await;
                Err(map_sqlx_error(op.name(), e))
            }
        }
    }

    async fn count_payouts(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM holvi_received_payout")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_payouts", e))?;
        Ok(count.max(0) as u64)
    }

    async fn get_payout(&self, id: TransactionId) -> Result<Option<PayoutRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT expenzy_uuid, create_time, amount, recipient_account_identifier
            FROM holvi_received_payout
            WHERE expenzy_uuid = $1
            "#,
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_payout", e))?;

        row.as_ref().map(payout_from_row).transpose()
    }

    async fn list_failed_updates(&self) -> Result<Vec<FailedStatusUpdateRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT transaction_id, last_attempted_at, reconcile_count, next_attempt_at
            FROM failed_transaction_update
            ORDER BY last_attempted_at ASC, transaction_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_failed_updates", e))?;

        rows.iter().map(failed_update_from_row).collect()
    }

    #[instrument(skip(self, backoff), fields(claimed = tracing::field::Empty), err)]
    async fn claim_due_failed_updates(
        &self,
        now: DateTime<Utc>,
        backoff: ReconcileBackoff,
    ) -> Result<Vec<FailedStatusUpdateRow>, StoreError> {
        let mut tx = self.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT transaction_id, last_attempted_at, reconcile_count, next_attempt_at
            FROM failed_transaction_update
            WHERE next_attempt_at <= $1
            ORDER BY last_attempted_at ASC, transaction_id ASC
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("select_due_failed_updates", e))?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut update = failed_update_from_row(row)?;
            update.reconcile_count = update.reconcile_count.saturating_add(1);
            update.next_attempt_at = hold_until(now, backoff, update.reconcile_count);

            sqlx::query(
                r#"
                UPDATE failed_transaction_update
                SET reconcile_count = $2, next_attempt_at = $3
                WHERE transaction_id = $1
                "#,
            )
            .bind(*update.transaction_id.as_uuid())
            .bind(i32::try_from(update.reconcile_count).unwrap_or(i32::MAX))
            .bind(update.next_attempt_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("claim_failed_update", e))?;

            claimed.push(update);
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("claimed", claimed.len());
        Ok(claimed)
    }

    async fn resolve_failed_update(&self, id: TransactionId) -> Result<bool, StoreError> {
        let mut tx = self.begin().await?;

        let result = sqlx::query("DELETE FROM failed_transaction_update WHERE transaction_id = $1")
            .bind(*id.as_uuid())
            .execute(&mut *tx)
            .await;

        match result {
            Ok(done) => {
                tx.commit()
                    .await
                    .map_err(|e| map_sqlx_error("commit_transaction", e))?;
                Ok(done.rows_affected() > 0)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(map_sqlx_error("resolve_failed_update", e))
            }
        }
    }
}

async fn insert_payout(
    tx: &mut Transaction<'_, Postgres>,
    payout: &PayoutRecord,
) -> Result<InsertOutcome, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO holvi_received_payout (
            create_time,
            expenzy_uuid,
            amount,
            recipient_account_identifier
        )
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(payout.create_time)
    .bind(*payout.external_id.as_uuid())
    .bind(payout.amount)
    .bind(&payout.recipient_account_identifier)
    .execute(&mut **tx)
    .await?;

    Ok(InsertOutcome::Inserted)
}

async fn upsert_failed_update(
    tx: &mut Transaction<'_, Postgres>,
    update: &FailedStatusUpdate,
) -> Result<InsertOutcome, sqlx::Error> {
    // `xmax = 0` only for a freshly inserted tuple.
    let inserted: bool = sqlx::query_scalar(
        r#"
        INSERT INTO failed_transaction_update (
            transaction_id,
            last_attempted_at,
            reconcile_count,
            next_attempt_at
        )
        VALUES ($1, $2, 0, $2)
        ON CONFLICT (transaction_id)
        DO UPDATE SET last_attempted_at = EXCLUDED.last_attempted_at
        RETURNING (xmax = 0)
        "#,
    )
    .bind(*update.transaction_id.as_uuid())
    .bind(update.last_attempted_at)
    .fetch_one(&mut **tx)
    .await?;

    Ok(if inserted {
        InsertOutcome::Inserted
    } else {
        InsertOutcome::AlreadyRecorded
    })
}

fn payout_from_row(row: &PgRow) -> Result<PayoutRecord, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Decode(format!("holvi_received_payout: {e}"));

    Ok(PayoutRecord {
        external_id: TransactionId::from_uuid(row.try_get::<Uuid, _>("expenzy_uuid").map_err(decode)?),
        create_time: row.try_get("create_time").map_err(decode)?,
        amount: row.try_get::<Decimal, _>("amount").map_err(decode)?,
        recipient_account_identifier: row
            .try_get("recipient_account_identifier")
            .map_err(decode)?,
    })
}

fn failed_update_from_row(row: &PgRow) -> Result<FailedStatusUpdateRow, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Decode(format!("failed_transaction_update: {e}"));
    let reconcile_count: i32 = row.try_get("reconcile_count").map_err(decode)?;

    Ok(FailedStatusUpdateRow {
        transaction_id: TransactionId::from_uuid(
            row.try_get::<Uuid, _>("transaction_id").map_err(decode)?,
        ),
        last_attempted_at: row.try_get("last_attempted_at").map_err(decode)?,
        reconcile_count: u32::try_from(reconcile_count).unwrap_or(0),
        next_attempt_at: row.try_get("next_attempt_at").map_err(decode)?,
    })
}

fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => StoreError::Database {
            operation,
            message: match db_err.code() {
                Some(code) => format!("{} (code {})", db_err.message(), code),
                None => db_err.message().to_string(),
            },
        },
        sqlx::Error::PoolTimedOut => StoreError::Unavailable {
            operation,
            message: "timed out waiting for a pooled connection".to_string(),
        },
        sqlx::Error::PoolClosed => StoreError::Unavailable {
            operation,
            message: "connection pool closed".to_string(),
        },
        sqlx::Error::Io(e) => StoreError::Unavailable {
            operation,
            message: e.to_string(),
        },
        sqlx::Error::Tls(e) => StoreError::Unavailable {
            operation,
            message: e.to_string(),
        },
        e @ (sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_)) => {
            StoreError::Decode(format!("{operation}: {e}"))
        }
        other => StoreError::Database {
            operation,
            message: other.to_string(),
        },
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
