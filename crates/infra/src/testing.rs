//! Scripted collaborators for worker tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;

use payrelay_core::{PayoutState, TransactionId, UpstreamPayout};

use crate::upstream::{Upstream, UpstreamError};

pub(crate) fn payout(id: TransactionId, state: PayoutState) -> UpstreamPayout {
    UpstreamPayout {
        id: id.to_string(),
        create_time: "Mon, 10 Jun 2024 12:30:00 GMT".to_string(),
        amount: Some(Decimal::new(12550, 2)),
        recipient_account_identifier: "FI2112345600000785".to_string(),
        state,
    }
}

/// An [`Upstream`] that serves a fixed payout list and fails on demand.
#[derive(Default)]
pub(crate) struct FakeUpstream {
    payouts: Mutex<Vec<UpstreamPayout>>,
    fetch_failures: Mutex<VecDeque<UpstreamError>>,
    push_failures: Mutex<VecDeque<UpstreamError>>,
    pushed: Mutex<Vec<TransactionId>>,
    fetches: AtomicUsize,
}

impl FakeUpstream {
    pub(crate) fn with_payouts(payouts: Vec<UpstreamPayout>) -> Self {
        let fake = Self::default();
        *fake.payouts.lock().unwrap() = payouts;
        fake
    }

    pub(crate) fn fail_fetch(&self, err: UpstreamError, times: usize) {
        let mut failures = self.fetch_failures.lock().unwrap();
        failures.extend(std::iter::repeat_n(err, times));
    }

    pub(crate) fn fail_push(&self, err: UpstreamError, times: usize) {
        let mut failures = self.push_failures.lock().unwrap();
        failures.extend(std::iter::repeat_n(err, times));
    }

    pub(crate) fn pushed(&self) -> Vec<TransactionId> {
        self.pushed.lock().unwrap().clone()
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

pub(crate) fn unavailable(operation: &'static str) -> UpstreamError {
    UpstreamError::Server {
        operation,
        status: 503,
    }
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn fetch_payouts(&self) -> Result<Vec<UpstreamPayout>, UpstreamError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fetch_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.payouts.lock().unwrap().clone())
    }

    async fn mark_processing(&self, id: TransactionId) -> Result<(), UpstreamError> {
        if let Some(err) = self.push_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.pushed.lock().unwrap().push(id);
        Ok(())
    }
}
