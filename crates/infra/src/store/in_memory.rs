use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use payrelay_core::{FailedStatusUpdateRow, PayoutRecord, TransactionId};

use super::r#trait::{InsertOutcome, PayoutStore, StoreError, StoreOp, hold_until};
use crate::retry::ReconcileBackoff;

/// In-memory store for tests and database-less dev runs.
///
/// Same idempotency and dead-letter semantics as the Postgres store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    payouts: RwLock<HashMap<TransactionId, PayoutRecord>>,
    failed_updates: RwLock<HashMap<TransactionId, FailedStatusUpdateRow>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::new())
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Unavailable {
        operation: "lock",
        message: "in-memory store lock poisoned".to_string(),
    }
}

#[async_trait]
impl PayoutStore for InMemoryStore {
    async fn execute(&self, op: StoreOp) -> Result<InsertOutcome, StoreError> {
        match op {
            StoreOp::PayoutInsert(payout) => {
                let mut payouts = self.payouts.write().map_err(poisoned)?;
                if payouts.contains_key(&payout.external_id) {
                    return Ok(InsertOutcome::AlreadyRecorded);
                }
                payouts.insert(payout.external_id, payout);
                Ok(InsertOutcome::Inserted)
            }
            StoreOp::FailedUpdateInsert(update) => {
                let mut rows = self.failed_updates.write().map_err(poisoned)?;
                match rows.get_mut(&update.transaction_id) {
                    Some(row) => {
                        row.last_attempted_at = update.last_attempted_at;
                        Ok(InsertOutcome::AlreadyRecorded)
                    }
                    None => {
                        rows.insert(update.transaction_id, FailedStatusUpdateRow::fresh(&update));
                        Ok(InsertOutcome::Inserted)
                    }
                }
            }
        }
    }

    async fn count_payouts(&self) -> Result<u64, StoreError> {
        Ok(self.payouts.read().map_err(poisoned)?.len() as u64)
    }

    async fn get_payout(&self, id: TransactionId) -> Result<Option<PayoutRecord>, StoreError> {
        Ok(self.payouts.read().map_err(poisoned)?.get(&id).cloned())
    }

    async fn list_failed_updates(&self) -> Result<Vec<FailedStatusUpdateRow>, StoreError> {
        let rows = self.failed_updates.read().map_err(poisoned)?;
        let mut result: Vec<_> = rows.values().cloned().collect();
        result.sort_by_key(|r| (r.last_attempted_at, r.transaction_id));
        Ok(result)
    }

    async fn claim_due_failed_updates(
        &self,
        now: DateTime<Utc>,
        backoff: ReconcileBackoff,
    ) -> Result<Vec<FailedStatusUpdateRow>, StoreError> {
        let mut rows = self.failed_updates.write().map_err(poisoned)?;
        let mut claimed: Vec<_> = rows
            .values_mut()
            .filter(|r| r.is_due(now))
            .map(|r| {
                r.reconcile_count = r.reconcile_count.saturating_add(1);
                r.next_attempt_at = hold_until(now, backoff, r.reconcile_count);
                r.clone()
            })
            .collect();

        claimed.sort_by_key(|r| (r.last_attempted_at, r.transaction_id));
        Ok(claimed)
    }

    async fn resolve_failed_update(&self, id: TransactionId) -> Result<bool, StoreError> {
        Ok(self
            .failed_updates
            .write()
            .map_err(poisoned)?
            .remove(&id)
            .is_some())
    }
}
