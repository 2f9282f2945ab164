//! Pushes the `processing` status upstream for recorded payouts.

use std::sync::Arc;

use tracing::{error, info, warn};

use payrelay_core::TransactionId;

use super::{WorkerHandle, consume};
use crate::queue::{Task, WorkQueue};
use crate::retry::{RetryOutcome, RetryScheduler};
use crate::store::PayoutStore;
use crate::upstream::Upstream;

/// What happened to one status-update task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdateOutcome {
    /// Upstream accepted the update; `resolved` tells whether a dead-letter
    /// row was cleared.
    Updated { resolved: bool },
    Retry(RetryOutcome),
    Dropped,
}

/// Consumes the status-update queue.
pub struct StatusUpdateWorker {
    upstream: Arc<dyn Upstream>,
    store: Arc<dyn PayoutStore>,
    status_updates: Arc<WorkQueue<TransactionId>>,
    retry: RetryScheduler,
}

impl StatusUpdateWorker {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        store: Arc<dyn PayoutStore>,
        status_updates: Arc<WorkQueue<TransactionId>>,
        retry: RetryScheduler,
    ) -> Self {
        Self {
            upstream,
            store,
            status_updates,
            retry,
        }
    }

    pub fn spawn(self) -> WorkerHandle {
        WorkerHandle::spawn("status_update", move |shutdown| async move {
            let queue = Arc::clone(&self.status_updates);
            let worker = &self;
            consume("status_update", &queue, shutdown, move |task| async move {
                worker.process(task).await;
            })
            .await;
        })
    }

    pub async fn process(&self, task: Task<TransactionId>) -> StatusUpdateOutcome {
        let id = task.payload;
        let attempt = task.attempt;

        match self.upstream.mark_processing(id).await {
            Ok(()) => {
                info!(transaction_id = %id, attempt, "status pushed");
                let resolved = match self.store.resolve_failed_update(id).await {
                    Ok(resolved) => resolved,
                    Err(err) => {
                        // The row stays and is re-driven once more; pushing
                        // the same status twice is harmless.
                        warn!(transaction_id = %id, error = %err, "failed to clear dead-letter row");
                        false
                    }
                };
                if resolved {
                    info!(transaction_id = %id, "dead-lettered status update resolved");
                }
                StatusUpdateOutcome::Updated { resolved }
            }
            Err(err) if err.is_transient() => {
                warn!(transaction_id = %id, attempt, error = %err, "status push failed; retrying");
                match self.retry.schedule(&self.status_updates, task, true).await {
                    Ok(outcome) => StatusUpdateOutcome::Retry(outcome),
                    Err(err) => {
                        error!(transaction_id = %id, error = %err, "failed to dead-letter status update");
                        StatusUpdateOutcome::Dropped
                    }
                }
            }
            Err(err) => {
                error!(transaction_id = %id, attempt, error = %err, "status push rejected; dropping");
                StatusUpdateOutcome::Dropped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use tokio::time::Instant;

    use payrelay_core::FailedStatusUpdate;

    use super::*;
    use crate::retry::RetryPolicy;
    use crate::store::InMemoryStore;
    use crate::testing::{FakeUpstream, unavailable};
    use crate::upstream::UpstreamError;

    fn worker(
        upstream: &Arc<FakeUpstream>,
        store: &Arc<InMemoryStore>,
    ) -> (StatusUpdateWorker, Arc<WorkQueue<TransactionId>>) {
        let queue = Arc::new(WorkQueue::with_defaults("status_updates"));
        let retry = RetryScheduler::new(RetryPolicy::default(), store.clone());
        let worker = StatusUpdateWorker::new(upstream.clone(), store.clone(), queue.clone(), retry);
        (worker, queue)
    }

    #[tokio::test]
    async fn success_pushes_once() {
        let upstream = Arc::new(FakeUpstream::default());
        let store = InMemoryStore::arc();
        let (worker, _) = worker(&upstream, &store);
        let id = TransactionId::new();

        let outcome = worker.process(Task::new(id)).await;

        assert_eq!(outcome, StatusUpdateOutcome::Updated { resolved: false });
        assert_eq!(upstream.pushed(), vec![id]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_below_the_limit_eventually_succeed() {
        let upstream = Arc::new(FakeUpstream::default());
        upstream.fail_push(unavailable("mark_processing"), 2);
        let store = InMemoryStore::arc();
        let (worker, queue) = worker(&upstream, &store);
        let id = TransactionId::new();

        let started = Instant::now();
        let mut outcome = worker.process(Task::new(id)).await;
        let mut waits = Vec::new();
        while let StatusUpdateOutcome::Retry(RetryOutcome::Scheduled { .. }) = outcome {
            let before = Instant::now();
            let task = queue.get().await.unwrap();
            waits.push(before.elapsed());
            outcome = worker.process(task).await;
        }

        assert_eq!(outcome, StatusUpdateOutcome::Updated { resolved: false });
        assert_eq!(waits, vec![Duration::from_secs(10), Duration::from_secs(20)]);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        assert_eq!(upstream.pushed(), vec![id]);
        assert!(store.list_failed_updates().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_leave_one_dead_letter_row() {
        let upstream = Arc::new(FakeUpstream::default());
        upstream.fail_push(unavailable("mark_processing"), 4);
        let store = InMemoryStore::arc();
        let (worker, queue) = worker(&upstream, &store);
        let id = TransactionId::new();

        let mut outcome = worker.process(Task::new(id)).await;
        while let StatusUpdateOutcome::Retry(RetryOutcome::Scheduled { .. }) = outcome {
            let task = queue.get().await.unwrap();
            outcome = worker.process(task).await;
        }

        assert_eq!(outcome, StatusUpdateOutcome::Retry(RetryOutcome::DeadLettered));
        let rows = store.list_failed_updates().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].transaction_id, id);

        // Nothing else is pending.
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(queue.is_empty());
        assert!(upstream.pushed().is_empty());
    }

    #[tokio::test]
    async fn success_clears_the_dead_letter_row() {
        let upstream = Arc::new(FakeUpstream::default());
        let store = InMemoryStore::arc();
        let id = TransactionId::new();
        store
            .record_failed_update(FailedStatusUpdate::new(id, Utc::now()))
            .await
            .unwrap();
        let (worker, _) = worker(&upstream, &store);

        let outcome = worker.process(Task::new(id)).await;

        assert_eq!(outcome, StatusUpdateOutcome::Updated { resolved: true });
        assert!(store.list_failed_updates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_push_is_dropped_without_dead_letter() {
        let upstream = Arc::new(FakeUpstream::default());
        upstream.fail_push(
            UpstreamError::Client {
                operation: "mark_processing",
                status: 404,
            },
            1,
        );
        let store = InMemoryStore::arc();
        let (worker, queue) = worker(&upstream, &store);

        let outcome = worker.process(Task::new(TransactionId::new())).await;

        assert_eq!(outcome, StatusUpdateOutcome::Dropped);
        assert!(queue.is_empty());
        assert!(store.list_failed_updates().await.unwrap().is_empty());
    }
}
