use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use payrelay_core::{FailedStatusUpdate, FailedStatusUpdateRow, PayoutRecord, TransactionId};

use crate::retry::ReconcileBackoff;

/// A mutating store operation.
///
/// Each variant runs in its own transaction. Both are idempotent on their
/// natural key, which is what makes at-least-once replays safe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// Record a payout, keyed by `external_id`.
    PayoutInsert(PayoutRecord),
    /// Record (or refresh) a dead-lettered status update, keyed by `transaction_id`.
    FailedUpdateInsert(FailedStatusUpdate),
}

impl StoreOp {
    pub fn name(&self) -> &'static str {
        match self {
            StoreOp::PayoutInsert(_) => "payout_insert",
            StoreOp::FailedUpdateInsert(_) => "failed_update_insert",
        }
    }

    pub fn key(&self) -> TransactionId {
        match self {
            StoreOp::PayoutInsert(p) => p.external_id,
            StoreOp::FailedUpdateInsert(u) => u.transaction_id,
        }
    }
}

/// Result of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written.
    Inserted,
    /// The key already existed; nothing new was recorded (a failed update
    /// has its `last_attempted_at` refreshed).
    AlreadyRecorded,
}

/// Store operation error.
///
/// Unique-key conflicts never surface here: they are reported as
/// [`InsertOutcome::AlreadyRecorded`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not obtain or keep a connection (pool exhausted/closed, network).
    #[error("store unavailable during {operation}: {message}")]
    Unavailable {
        operation: &'static str,
        message: String,
    },

    /// The database rejected the statement.
    #[error("database error during {operation}: {message}")]
    Database {
        operation: &'static str,
        message: String,
    },

    /// A row could not be turned back into a domain value.
    #[error("failed to decode row: {0}")]
    Decode(String),
}

/// Durable storage for payouts and dead-lettered status updates.
#[async_trait]
pub trait PayoutStore: Send + Sync {
    /// Run one mutating operation in its own transaction.
    async fn execute(&self, op: StoreOp) -> Result<InsertOutcome, StoreError>;

    /// Number of recorded payouts.
    async fn count_payouts(&self) -> Result<u64, StoreError>;

    async fn get_payout(&self, id: TransactionId) -> Result<Option<PayoutRecord>, StoreError>;

    /// All dead-letter rows, oldest failure first.
    async fn list_failed_updates(&self) -> Result<Vec<FailedStatusUpdateRow>, StoreError>;

    /// Claim the dead-letter rows due at `now`.
    ///
    /// Claimed rows get `reconcile_count += 1` and are held back until
    /// `now + backoff.delay_for(reconcile_count)`. The updated rows are
    /// returned.
    async fn claim_due_failed_updates(
        &self,
        now: DateTime<Utc>,
        backoff: ReconcileBackoff,
    ) -> Result<Vec<FailedStatusUpdateRow>, StoreError>;

    /// Delete the dead-letter row for `id`; returns whether one existed.
    async fn resolve_failed_update(&self, id: TransactionId) -> Result<bool, StoreError>;

    async fn insert_payout(&self, payout: PayoutRecord) -> Result<InsertOutcome, StoreError> {
        self.execute(StoreOp::PayoutInsert(payout)).await
    }

    async fn record_failed_update(
        &self,
        update: FailedStatusUpdate,
    ) -> Result<InsertOutcome, StoreError> {
        self.execute(StoreOp::FailedUpdateInsert(update)).await
    }
}

#[async_trait]
impl<S> PayoutStore for std::sync::Arc<S>
where
    S: PayoutStore + ?Sized,
{
    async fn execute(&self, op: StoreOp) -> Result<InsertOutcome, StoreError> {
        (**self).execute(op).await
    }

    async fn count_payouts(&self) -> Result<u64, StoreError> {
        (**self).count_payouts().await
    }

    async fn get_payout(&self, id: TransactionId) -> Result<Option<PayoutRecord>, StoreError> {
        (**self).get_payout(id).await
    }

    async fn list_failed_updates(&self) -> Result<Vec<FailedStatusUpdateRow>, StoreError> {
        (**self).list_failed_updates().await
    }

    async fn claim_due_failed_updates(
        &self,
        now: DateTime<Utc>,
        backoff: ReconcileBackoff,
    ) -> Result<Vec<FailedStatusUpdateRow>, StoreError> {
        (**self).claim_due_failed_updates(now, backoff).await
    }

    async fn resolve_failed_update(&self, id: TransactionId) -> Result<bool, StoreError> {
        (**self).resolve_failed_update(id).await
    }
}

/// `now + delay`, saturating at the largest representable instant.
pub(crate) fn hold_until(
    now: DateTime<Utc>,
    backoff: ReconcileBackoff,
    reconcile_count: u32,
) -> DateTime<Utc> {
    now.checked_add_signed(backoff.chrono_delay_for(reconcile_count))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
