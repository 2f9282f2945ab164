//! Periodically re-drives dead-lettered status updates.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use payrelay_core::TransactionId;

use super::WorkerHandle;
use crate::queue::{Task, WorkQueue};
use crate::retry::ReconcileBackoff;
use crate::store::{PayoutStore, StoreError};

/// Claims due dead-letter rows and queues a fresh status task for each.
///
/// Rows are left in place; a successful push is what removes them.
pub struct Reconciler {
    store: Arc<dyn PayoutStore>,
    status_updates: Arc<WorkQueue<TransactionId>>,
    interval: Duration,
    backoff: ReconcileBackoff,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn PayoutStore>,
        status_updates: Arc<WorkQueue<TransactionId>>,
        interval: Duration,
        backoff: ReconcileBackoff,
    ) -> Self {
        Self {
            store,
            status_updates,
            interval,
            backoff,
        }
    }

    pub fn spawn(self) -> WorkerHandle {
        WorkerHandle::spawn("reconciliation", move |shutdown| async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(err) = self.reconcile_once(Utc::now()).await {
                    warn!(error = %err, "reconciliation pass failed");
                }
            }
            debug!("reconciliation loop exited");
        })
    }

    /// One pass: claim the rows due at `now` and enqueue one task per row.
    /// Returns how many tasks were enqueued.
    pub async fn reconcile_once(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let rows = self
            .store
            .claim_due_failed_updates(now, self.backoff)
            .await?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut enqueued = 0;
        for row in &rows {
            match self
                .status_updates
                .put_blocking(Task::new(row.transaction_id))
                .await
            {
                Ok(()) => enqueued += 1,
                Err(err) => {
                    // The claim already pushed the row back; it comes round
                    // again after its backoff.
                    warn!(transaction_id = %row.transaction_id, error = %err, "failed to requeue dead-lettered update");
                }
            }
        }

        info!(claimed = rows.len(), enqueued, "requeued dead-lettered status updates");
        Ok(enqueued)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use payrelay_core::FailedStatusUpdate;

    use super::*;
    use crate::store::InMemoryStore;

    fn reconciler(store: &Arc<InMemoryStore>) -> (Reconciler, Arc<WorkQueue<TransactionId>>) {
        let queue = Arc::new(WorkQueue::with_defaults("status_updates"));
        let reconciler = Reconciler::new(
            store.clone(),
            queue.clone(),
            Duration::from_secs(5),
            ReconcileBackoff::default(),
        );
        (reconciler, queue)
    }

    #[tokio::test]
    async fn one_task_per_due_row() {
        let store = InMemoryStore::arc();
        let now = Utc::now();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = TransactionId::new();
            store
                .record_failed_update(FailedStatusUpdate::new(id, now))
                .await
                .unwrap();
            ids.push(id);
        }
        let (reconciler, queue) = reconciler(&store);

        let enqueued = reconciler.reconcile_once(now).await.unwrap();

        assert_eq!(enqueued, 3);
        let mut queued = Vec::new();
        while !queue.is_empty() {
            let task = queue.get().await.unwrap();
            assert_eq!(task.attempt, 1);
            queued.push(task.payload);
        }
        queued.sort();
        ids.sort();
        assert_eq!(queued, ids);
        // Rows survive the requeue.
        assert_eq!(store.list_failed_updates().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn claimed_rows_wait_out_their_backoff() {
        let store = InMemoryStore::arc();
        let now = Utc::now();
        store
            .record_failed_update(FailedStatusUpdate::new(TransactionId::new(), now))
            .await
            .unwrap();
        let (reconciler, queue) = reconciler(&store);

        assert_eq!(reconciler.reconcile_once(now).await.unwrap(), 1);
        assert_eq!(
            reconciler
                .reconcile_once(now + ChronoDuration::seconds(5))
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            reconciler
                .reconcile_once(now + ChronoDuration::seconds(120))
                .await
                .unwrap(),
            1
        );
        assert_eq!(queue.len(), 2);

        let row = &store.list_failed_updates().await.unwrap()[0];
        assert_eq!(row.reconcile_count, 2);
        assert_eq!(row.next_attempt_at, now + ChronoDuration::seconds(120 + 240));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_runs_until_shutdown() {
        let store = InMemoryStore::arc();
        store
            .record_failed_update(FailedStatusUpdate::new(TransactionId::new(), Utc::now()))
            .await
            .unwrap();
        let (reconciler, queue) = reconciler(&store);

        let handle = reconciler.spawn();
        let task = queue.get().await.unwrap();
        assert_eq!(task.attempt, 1);

        handle.shutdown().await;
    }
}
