//! Wiring of queues, workers and the retry scheduler.
//!
//! Everything shared is built once in [`Pipeline::new`] and handed to the
//! workers explicitly; nothing lives in globals.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use payrelay_core::{FailedStatusUpdate, TransactionId};

use crate::config::Config;
use crate::queue::{Notification, QueueError, Task, WorkQueue};
use crate::retry::{RetryScheduler, ShutdownMode};
use crate::store::PayoutStore;
use crate::upstream::Upstream;
use crate::workers::{IngestionWorker, Reconciler, StatusUpdateWorker, WorkerHandle};

/// The relay, built but not yet running.
pub struct Pipeline {
    config: Config,
    store: Arc<dyn PayoutStore>,
    upstream: Arc<dyn Upstream>,
    notifications: Arc<WorkQueue<Notification>>,
    status_updates: Arc<WorkQueue<TransactionId>>,
    retry: RetryScheduler,
}

impl Pipeline {
    pub fn new(config: Config, store: Arc<dyn PayoutStore>, upstream: Arc<dyn Upstream>) -> Self {
        let notifications = Arc::new(WorkQueue::new(
            "notifications",
            config.queue.capacity,
            config.queue.overflow,
        ));
        let status_updates = Arc::new(WorkQueue::new(
            "status_updates",
            config.queue.capacity,
            config.queue.overflow,
        ));
        let retry = RetryScheduler::new(config.retry, Arc::clone(&store));

        Self {
            config,
            store,
            upstream,
            notifications,
            status_updates,
            retry,
        }
    }

    /// Start the ingestion, status-update and reconciliation loops.
    pub fn spawn(self) -> PipelineHandle {
        let ingestion = IngestionWorker::new(
            Arc::clone(&self.upstream),
            Arc::clone(&self.store),
            Arc::clone(&self.notifications),
            Arc::clone(&self.status_updates),
            self.retry.clone(),
        )
        .spawn();

        let status_update = StatusUpdateWorker::new(
            Arc::clone(&self.upstream),
            Arc::clone(&self.store),
            Arc::clone(&self.status_updates),
            self.retry.clone(),
        )
        .spawn();

        let reconciliation = Reconciler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.status_updates),
            self.config.reconcile.interval,
            self.config.reconcile.backoff,
        )
        .spawn();

        info!(
            queue_capacity = self.config.queue.capacity,
            overflow = ?self.config.queue.overflow,
            max_retries = self.config.retry.max_retries,
            "pipeline started"
        );

        PipelineHandle {
            store: self.store,
            notifications: self.notifications,
            status_updates: self.status_updates,
            retry: self.retry,
            workers: Workers {
                ingestion,
                status_update,
                reconciliation,
            },
        }
    }
}

struct Workers {
    ingestion: WorkerHandle,
    status_update: WorkerHandle,
    reconciliation: WorkerHandle,
}

/// A running pipeline.
pub struct PipelineHandle {
    store: Arc<dyn PayoutStore>,
    notifications: Arc<WorkQueue<Notification>>,
    status_updates: Arc<WorkQueue<TransactionId>>,
    retry: RetryScheduler,
    workers: Workers,
}

impl PipelineHandle {
    pub fn store(&self) -> &Arc<dyn PayoutStore> {
        &self.store
    }

    pub fn notifications(&self) -> &Arc<WorkQueue<Notification>> {
        &self.notifications
    }

    pub fn status_updates(&self) -> &Arc<WorkQueue<TransactionId>> {
        &self.status_updates
    }

    pub fn retry(&self) -> &RetryScheduler {
        &self.retry
    }

    /// Enqueue a notification under the configured overflow policy.
    pub async fn notify(&self) -> Result<(), QueueError> {
        self.notifications.put(Task::new(Notification::now())).await
    }

    /// Wait until both queues are empty and no retry timer is pending.
    pub async fn quiesce(&self) {
        quiesce(&self.notifications, &self.status_updates, &self.retry).await;
    }

    /// Stop the pipeline.
    ///
    /// `Drain` stops reconciliation, then finishes every queued task and
    /// pending retry before stopping the workers. `Cancel` aborts pending
    /// retries and stops the workers after the task each is handling; status
    /// tasks it leaves behind are dead-lettered for the next run.
    pub async fn shutdown(self, mode: ShutdownMode) {
        self.stop(mode, None).await;
    }

    /// Drain, but give up after `deadline` and fall back to `Cancel`.
    pub async fn shutdown_within(self, deadline: Duration) {
        self.stop(ShutdownMode::Drain, Some(deadline)).await;
    }

    async fn stop(self, mode: ShutdownMode, deadline: Option<Duration>) {
        let PipelineHandle {
            store,
            notifications,
            status_updates,
            retry,
            workers,
        } = self;
        info!(
            ?mode,
            notifications = notifications.unfinished(),
            status_updates = status_updates.unfinished(),
            pending_retries = retry.pending(),
            "pipeline shutting down"
        );

        workers.reconciliation.shutdown().await;

        let mode = match (mode, deadline) {
            (ShutdownMode::Drain, None) => {
                quiesce(&notifications, &status_updates, &retry).await;
                ShutdownMode::Drain
            }
            (ShutdownMode::Drain, Some(deadline)) => {
                let drain = quiesce(&notifications, &status_updates, &retry);
                if tokio::time::timeout(deadline, drain).await.is_ok() {
                    ShutdownMode::Drain
                } else {
                    warn!(
                        deadline_ms = deadline.as_millis() as u64,
                        pending_retries = retry.pending(),
                        "pipeline did not drain in time; cancelling"
                    );
                    retry.shutdown(ShutdownMode::Cancel).await;
                    ShutdownMode::Cancel
                }
            }
            (ShutdownMode::Cancel, _) => {
                retry.shutdown(ShutdownMode::Cancel).await;
                ShutdownMode::Cancel
            }
        };

        notifications.close();
        status_updates.close();
        workers.ingestion.shutdown().await;
        workers.status_update.shutdown().await;
        retry.shutdown(mode).await;
        dead_letter_queued(&status_updates, store.as_ref()).await;

        info!(?mode, "pipeline stopped");
    }
}

/// Persist status tasks still sitting in a closed queue so that
/// reconciliation re-drives them after a restart.
async fn dead_letter_queued(status_updates: &WorkQueue<TransactionId>, store: &dyn PayoutStore) {
    let mut kept = 0usize;
    while let Some(task) = status_updates.get().await {
        let id = task.payload;
        match store
            .record_failed_update(FailedStatusUpdate::new(id, Utc::now()))
            .await
        {
            Ok(_) => kept += 1,
            Err(err) => error!(transaction_id = %id, error = %err, "failed to dead-letter queued status update"),
        }
        let _ = status_updates.task_done();
    }
    if kept > 0 {
        warn!(count = kept, "queued status updates dead-lettered at shutdown");
    }
}

async fn quiesce(
    notifications: &WorkQueue<Notification>,
    status_updates: &WorkQueue<TransactionId>,
    retry: &RetryScheduler,
) {
    loop {
        notifications.join().await;
        status_updates.join().await;
        if retry.pending() == 0 && notifications.unfinished() == 0 && status_updates.unfinished() == 0 {
            return;
        }
        retry.wait_idle().await;
    }
}
