//! Turns payout notifications into recorded payouts and status tasks.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use payrelay_core::{PayoutRecord, TransactionId, UpstreamPayout};

use super::{WorkerHandle, consume};
use crate::queue::{Notification, Task, WorkQueue};
use crate::retry::{RetryOutcome, RetryScheduler};
use crate::store::{InsertOutcome, PayoutStore};
use crate::upstream::Upstream;

/// Tally of one fetch-and-persist pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Payouts returned by upstream, any state.
    pub fetched: usize,
    pub inserted: usize,
    pub already_recorded: usize,
    /// Payouts not in an actionable state.
    pub ignored: usize,
    /// Actionable payouts that could not be converted or persisted.
    pub failed: usize,
    /// Status tasks put on the status-update queue.
    pub enqueued: usize,
}

/// What happened to one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionOutcome {
    Ingested(IngestReport),
    Retry(RetryOutcome),
    Dropped,
}

/// Consumes the notification queue.
pub struct IngestionWorker {
    upstream: Arc<dyn Upstream>,
    store: Arc<dyn PayoutStore>,
    notifications: Arc<WorkQueue<Notification>>,
    status_updates: Arc<WorkQueue<TransactionId>>,
    retry: RetryScheduler,
}

impl IngestionWorker {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        store: Arc<dyn PayoutStore>,
        notifications: Arc<WorkQueue<Notification>>,
        status_updates: Arc<WorkQueue<TransactionId>>,
        retry: RetryScheduler,
    ) -> Self {
        Self {
            upstream,
            store,
            notifications,
            status_updates,
            retry,
        }
    }

    pub fn spawn(self) -> WorkerHandle {
        WorkerHandle::spawn("ingestion", move |shutdown| async move {
            let queue = Arc::clone(&self.notifications);
            let worker = &self;
            consume("ingestion", &queue, shutdown, move |task| async move {
                worker.process(task).await;
            })
            .await;
        })
    }

    /// Handle one notification: fetch everything pending upstream, record
    /// the actionable payouts and queue a status update for each.
    pub async fn process(&self, task: Task<Notification>) -> IngestionOutcome {
        let attempt = task.attempt;
        let payouts = match self.upstream.fetch_payouts().await {
            Ok(payouts) => payouts,
            Err(err) if err.is_transient() => {
                warn!(attempt, error = %err, "payout fetch failed; retrying");
                // A notification carries nothing durable: any later one
                // re-fetches the same payouts.
                return match self.retry.schedule(&self.notifications, task, false).await {
                    Ok(outcome) => IngestionOutcome::Retry(outcome),
                    Err(err) => {
                        error!(error = %err, "failed to schedule notification retry");
                        IngestionOutcome::Dropped
                    }
                };
            }
            Err(err) => {
                error!(attempt, error = %err, "payout fetch failed; dropping notification");
                return IngestionOutcome::Dropped;
            }
        };

        let report = self.ingest(payouts).await;
        info!(
            fetched = report.fetched,
            inserted = report.inserted,
            already_recorded = report.already_recorded,
            ignored = report.ignored,
            failed = report.failed,
            "notification processed"
        );
        IngestionOutcome::Ingested(report)
    }

    async fn ingest(&self, payouts: Vec<UpstreamPayout>) -> IngestReport {
        let mut report = IngestReport {
            fetched: payouts.len(),
            ..Default::default()
        };

        for payout in payouts {
            if !payout.state.is_actionable() {
                debug!(id = %payout.id, state = %payout.state, "ignoring payout");
                report.ignored += 1;
                continue;
            }

            let record = match PayoutRecord::try_from(payout) {
                Ok(record) => record,
                Err(err) => {
                    warn!(error = %err, "skipping malformed payout");
                    report.failed += 1;
                    continue;
                }
            };
            let id = record.external_id;

            match self.store.insert_payout(record).await {
                Ok(InsertOutcome::Inserted) => report.inserted += 1,
                Ok(InsertOutcome::AlreadyRecorded) => {
                    debug!(transaction_id = %id, "payout already recorded");
                    report.already_recorded += 1;
                }
                Err(err) => {
                    error!(transaction_id = %id, error = %err, "failed to record payout");
                    report.failed += 1;
                    continue;
                }
            }

            // Replays enqueue too, which heals a crash between insert and
            // enqueue on the next notification.
            match self.status_updates.put_blocking(Task::new(id)).await {
                Ok(()) => report.enqueued += 1,
                Err(err) => {
                    warn!(transaction_id = %id, error = %err, "failed to queue status update");
                }
            }
        }

        report
    }
}
