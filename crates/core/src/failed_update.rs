//! Dead-lettered status updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::TransactionId;

/// A status update whose retry chain was exhausted.
///
/// Stored keyed by `transaction_id`; a repeat failure for the same
/// transaction refreshes `last_attempted_at` instead of adding a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedStatusUpdate {
    pub transaction_id: TransactionId,
    pub last_attempted_at: DateTime<Utc>,
}

impl FailedStatusUpdate {
    pub fn new(transaction_id: TransactionId, last_attempted_at: DateTime<Utc>) -> Self {
        Self {
            transaction_id,
            last_attempted_at,
        }
    }
}

/// A stored dead-letter row, including its reconciliation bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedStatusUpdateRow {
    pub transaction_id: TransactionId,
    pub last_attempted_at: DateTime<Utc>,
    /// How many times reconciliation has re-enqueued this row.
    pub reconcile_count: u32,
    /// The row is not re-enqueued before this instant.
    pub next_attempt_at: DateTime<Utc>,
}

impl FailedStatusUpdateRow {
    /// A freshly dead-lettered row, due for reconciliation immediately.
    pub fn fresh(update: &FailedStatusUpdate) -> Self {
        Self {
            transaction_id: update.transaction_id,
            last_attempted_at: update.last_attempted_at,
            reconcile_count: 0,
            next_attempt_at: update.last_attempted_at,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at <= now
    }
}
