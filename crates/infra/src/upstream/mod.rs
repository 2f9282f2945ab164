//! Client for the upstream payment platform.

mod client;
mod error;

pub use client::HttpUpstream;
pub use error::UpstreamError;

use async_trait::async_trait;

use payrelay_core::{TransactionId, UpstreamPayout};

/// The two calls the pipeline makes against the upstream platform.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Every payout the platform currently has pending, in any state.
    async fn fetch_payouts(&self) -> Result<Vec<UpstreamPayout>, UpstreamError>;

    /// Report that the payout `id` is now being processed.
    async fn mark_processing(&self, id: TransactionId) -> Result<(), UpstreamError>;
}

#[async_trait]
impl<U> Upstream for std::sync::Arc<U>
where
    U: Upstream + ?Sized,
{
    async fn fetch_payouts(&self) -> Result<Vec<UpstreamPayout>, UpstreamError> {
        (**self).fetch_payouts().await
    }

    async fn mark_processing(&self, id: TransactionId) -> Result<(), UpstreamError> {
        (**self).mark_processing(id).await
    }
}
