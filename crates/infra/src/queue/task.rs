//! Queue items: a payload plus the attempt number it is on.

use chrono::{DateTime, Utc};

use payrelay_core::TransactionId;

/// A unit of work held by a [`WorkQueue`](super::WorkQueue).
///
/// `attempt` starts at 1 and grows by one each time the retry scheduler puts
/// the payload back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task<T> {
    pub payload: T,
    pub attempt: u32,
}

impl<T> Task<T> {
    /// A first attempt for `payload`.
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            attempt: 1,
        }
    }

    pub fn with_attempt(payload: T, attempt: u32) -> Self {
        Self {
            payload,
            attempt: attempt.max(1),
        }
    }

    /// The same payload, one attempt later.
    pub fn next_attempt(self) -> Self {
        Self {
            payload: self.payload,
            attempt: self.attempt.saturating_add(1),
        }
    }
}

/// Marker payload for "upstream says a payout happened".
///
/// Carries no payout data; the ingestion worker fetches everything pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub received_at: DateTime<Utc>,
}

impl Notification {
    pub fn now() -> Self {
        Self {
            received_at: Utc::now(),
        }
    }
}

impl core::fmt::Display for Notification {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "payout notification received at {}", self.received_at.to_rfc3339())
    }
}

/// Payloads the retry scheduler can handle.
pub trait RetryPayload: Clone + Send + Sync + core::fmt::Display + 'static {
    /// Transaction to dead-letter when the retry chain is exhausted, if the
    /// payload has one.
    fn dead_letter_key(&self) -> Option<TransactionId> {
        None
    }
}

impl RetryPayload for Notification {}

impl RetryPayload for TransactionId {
    fn dead_letter_key(&self) -> Option<TransactionId> {
        Some(*self)
    }
}
