//! Retry scheduling for transient failures.

mod policy;
mod scheduler;

pub use policy::{DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES, ReconcileBackoff, RetryPolicy};
pub use scheduler::{RetryOutcome, RetryScheduler, ShutdownMode};
