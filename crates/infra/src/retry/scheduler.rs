//! Delayed re-enqueue of failed tasks, with dead-lettering on exhaustion.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use payrelay_core::FailedStatusUpdate;

use super::RetryPolicy;
use crate::queue::{RetryPayload, Task, WorkQueue};
use crate::store::{PayoutStore, StoreError};

/// What [`RetryScheduler::schedule`] decided for a failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// A timer will re-enqueue the payload as `attempt` after `delay`.
    Scheduled { attempt: u32, delay: Duration },
    /// Retries are exhausted and a failed-update row was written.
    DeadLettered,
    /// Retries are exhausted and nothing was kept.
    Discarded,
}

/// How to treat retry timers that have not fired yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownMode {
    /// Let every pending timer fire and re-enqueue its task.
    #[default]
    Drain,
    /// Abort pending timers. Status tasks are dead-lettered for
    /// reconciliation; notifications are dropped.
    Cancel,
}

/// Schedules retries on spawned timer tasks.
///
/// Each retry chain is independent: no jitter, no shared rate limit.
/// Cloning yields a handle onto the same set of timers.
#[derive(Clone)]
pub struct RetryScheduler {
    policy: RetryPolicy,
    store: Arc<dyn PayoutStore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RetryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("policy", &self.policy)
            .field("pending", &self.pending())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy, store: Arc<dyn PayoutStore>) -> Self {
        Self {
            policy,
            store,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Number of timers that have not fired (or been cancelled) yet.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Handle a task that just failed transiently.
    ///
    /// Returns as soon as the decision is made; the delay runs on its own
    /// task. When `persist` is set, a payload with a dead-letter key is
    /// persisted if its chain ends without success: on exhaustion, or when
    /// the timer is cancelled. The only error is a failed write of that row.
    pub async fn schedule<T>(
        &self,
        queue: &Arc<WorkQueue<T>>,
        task: Task<T>,
        persist: bool,
    ) -> Result<RetryOutcome, StoreError>
    where
        T: RetryPayload,
    {
        if self.policy.should_retry(task.attempt) {
            let delay = self.policy.delay_for_attempt(task.attempt);
            let next = task.next_attempt();
            let attempt = next.attempt;

            info!(
                queue = queue.name(),
                payload = %next.payload,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retry scheduled"
            );

            let queue = Arc::clone(queue);
            let cancel = self.cancel.clone();
            let store = Arc::clone(&self.store);
            self.tracker.spawn(async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        abandon(store.as_ref(), queue.name(), next, persist, "retry cancelled").await;
                    }
                    _ = tokio::time::sleep(delay) => {
                        // `put_blocking` consumes the task even when it fails.
                        if let Err(e) = queue.put_blocking(next.clone()).await {
                            warn!(queue = queue.name(), attempt, error = %e, "failed to re-enqueue retry");
                            abandon(store.as_ref(), queue.name(), next, persist, "retry not re-enqueued").await;
                        }
                    }
                }
            });

            return Ok(RetryOutcome::Scheduled { attempt, delay });
        }

        match task.payload.dead_letter_key() {
            Some(transaction_id) if persist => {
                self.store
                    .record_failed_update(FailedStatusUpdate::new(transaction_id, Utc::now()))
                    .await?;
                error!(
                    queue = queue.name(),
                    %transaction_id,
                    attempt = task.attempt,
                    "retries exhausted; dead-lettered for reconciliation"
                );
                Ok(RetryOutcome::DeadLettered)
            }
            _ => {
                error!(
                    queue = queue.name(),
                    payload = %task.payload,
                    attempt = task.attempt,
                    "retries exhausted; giving up"
                );
                Ok(RetryOutcome::Discarded)
            }
        }
    }

    /// Wait until every timer spawned so far has finished.
    ///
    /// Timers scheduled while waiting are waited for too.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Abort every pending timer. Later `schedule` calls still spawn timers,
    /// which are aborted right away. Persisted chains are dead-lettered.
    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    pub async fn shutdown(&self, mode: ShutdownMode) {
        if mode == ShutdownMode::Cancel {
            self.cancel_all();
        }
        debug!(?mode, pending = self.pending(), "retry scheduler shutting down");
        self.wait_idle().await;
    }
}

/// Drop a retry chain that will not run again, dead-lettering it when the
/// payload has a key and the chain persists.
async fn abandon<T: RetryPayload>(
    store: &dyn PayoutStore,
    queue: &'static str,
    task: Task<T>,
    persist: bool,
    reason: &'static str,
) {
    let Some(transaction_id) = task.payload.dead_letter_key().filter(|_| persist) else {
        warn!(queue, payload = %task.payload, attempt = task.attempt, "{reason}");
        return;
    };

    match store
        .record_failed_update(FailedStatusUpdate::new(transaction_id, Utc::now()))
        .await
    {
        Ok(_) => warn!(
            queue,
            %transaction_id,
            attempt = task.attempt,
            "{reason}; dead-lettered for reconciliation"
        ),
        Err(e) => error!(queue, %transaction_id, error = %e, "{reason}; failed to dead-letter"),
    }
}
