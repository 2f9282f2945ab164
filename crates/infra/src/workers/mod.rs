//! Background loops of the pipeline.
//!
//! Each loop runs as one tokio task and stops when its [`WorkerHandle`] is
//! shut down. A failure while handling one item is logged and never ends
//! the loop.

pub mod ingestion;
pub mod reconciliation;
pub mod status_update;

pub use ingestion::{IngestReport, IngestionOutcome, IngestionWorker};
pub use reconciliation::Reconciler;
pub use status_update::{StatusUpdateOutcome, StatusUpdateWorker};

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::queue::{Task, WorkQueue};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn `run` on the current runtime, passing it the token that
    /// signals shutdown.
    pub fn spawn<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown = CancellationToken::new();
        let join = tokio::spawn(run(shutdown.clone()));
        Self {
            name,
            shutdown,
            join: Some(join),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    /// Ask the worker to stop after the item it is handling, without waiting.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                warn!(worker = self.name, error = %err, "worker task ended abnormally");
            }
        }
        debug!(worker = self.name, "worker stopped");
    }
}

/// Pop tasks from `queue` and hand each to `handle` until shutdown or until
/// the queue is closed and empty. Every fetched task is marked done.
pub(crate) async fn consume<T, F, Fut>(
    worker: &'static str,
    queue: &WorkQueue<T>,
    shutdown: CancellationToken,
    mut handle: F,
) where
    T: Send,
    F: FnMut(Task<T>) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let task = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            task = queue.get() => match task {
                Some(task) => task,
                None => break,
            },
        };

        handle(task).await;

        if let Err(err) = queue.task_done() {
            warn!(worker, error = %err, "task accounting out of sync");
        }
    }
    debug!(worker, "worker loop exited");
}
