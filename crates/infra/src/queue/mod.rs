//! Bounded in-memory work queues.
//!
//! A [`WorkQueue`] is a FIFO, multi-producer/multi-consumer queue of
//! [`Task`]s with a fixed capacity:
//!
//! - `put` waits for space (or fails fast, per [`OverflowPolicy`])
//! - `get` waits for an item and hands it to exactly one consumer
//! - `task_done` / `join` track completion of every item ever put
//!
//! Items live only in memory; a process crash loses whatever is queued.

pub mod task;

pub use task::{Notification, RetryPayload, Task};

use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Default capacity when `QUEUE_SIZE` is not set.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// What `put` does when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Wait until a consumer frees a slot.
    #[default]
    Block,
    /// Fail immediately with [`QueueError::Full`].
    Reject,
}

/// Work queue error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue {queue} is full (capacity {capacity})")]
    Full { queue: &'static str, capacity: usize },
    #[error("queue {queue} is closed")]
    Closed { queue: &'static str },
    #[error("task_done called more times than items were put on queue {queue}")]
    TaskDoneUnderflow { queue: &'static str },
}

/// Bounded, blocking FIFO queue shared by producers and consumers.
///
/// Share it behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct WorkQueue<T> {
    name: &'static str,
    capacity: usize,
    policy: OverflowPolicy,
    tx: mpsc::Sender<Task<T>>,
    // Consumers take turns on the receiver; the lock is what guarantees an
    // item is handed to a single caller.
    rx: Mutex<mpsc::Receiver<Task<T>>>,
    unfinished: watch::Sender<usize>,
    closed: CancellationToken,
}

impl<T: Send> WorkQueue<T> {
    /// Create a queue with a fixed capacity (clamped to at least 1).
    pub fn new(name: &'static str, capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (unfinished, _) = watch::channel(0usize);

        Self {
            name,
            capacity,
            policy,
            tx,
            rx: Mutex::new(rx),
            unfinished,
            closed: CancellationToken::new(),
        }
    }

    /// Queue with the default capacity and blocking overflow.
    pub fn with_defaults(name: &'static str) -> Self {
        Self::new(name, DEFAULT_QUEUE_CAPACITY, OverflowPolicy::Block)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Number of items currently queued (not yet handed to a consumer).
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items put but not yet marked done (queued + in progress).
    pub fn unfinished(&self) -> usize {
        *self.unfinished.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Enqueue a task, honoring the configured overflow policy.
    pub async fn put(&self, task: Task<T>) -> Result<(), QueueError> {
        match self.policy {
            OverflowPolicy::Reject => self.try_put(task),
            OverflowPolicy::Block => self.put_blocking(task).await,
        }
    }

    /// Enqueue without waiting; fails with [`QueueError::Full`] at capacity.
    pub fn try_put(&self, task: Task<T>) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let permit = self.tx.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => QueueError::Full {
                queue: self.name,
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(()) => self.closed_error(),
        })?;
        self.unfinished.send_modify(|n| *n += 1);
        permit.send(task);
        Ok(())
    }

    /// Enqueue, waiting for space whatever the overflow policy.
    ///
    /// Retries use this: a task already accepted once is never rejected.
    pub async fn put_blocking(&self, task: Task<T>) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }

        // Reserve first so that a cancelled `put` leaves no trace.
        let permit = tokio::select! {
            permit = self.tx.reserve() => permit.map_err(|_| self.closed_error())?,
            _ = self.closed.cancelled() => return Err(self.closed_error()),
        };
        self.unfinished.send_modify(|n| *n += 1);
        permit.send(task);
        Ok(())
    }

    /// Wait for the next task.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn get(&self) -> Option<Task<T>> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            item = rx.recv() => item,
            _ = self.closed.cancelled() => rx.try_recv().ok(),
        }
    }

    /// Mark one fetched task as finished.
    pub fn task_done(&self) -> Result<(), QueueError> {
        let mut underflow = false;
        self.unfinished.send_modify(|n| {
            if *n == 0 {
                underflow = true;
            } else {
                *n -= 1;
            }
        });

        if underflow {
            Err(QueueError::TaskDoneUnderflow { queue: self.name })
        } else {
            Ok(())
        }
    }

    /// Wait until every task ever put has been marked done.
    pub async fn join(&self) {
        let mut rx = self.unfinished.subscribe();
        // The sender lives in `self`, so this can only fail if `self` is gone.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Refuse further puts and wake blocked producers and idle consumers.
    ///
    /// Items already queued can still be fetched with `get`.
    pub fn close(&self) {
        self.closed.cancel();
    }

    fn closed_error(&self) -> QueueError {
        QueueError::Closed { queue: self.name }
    }
}
