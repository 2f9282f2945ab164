//! Domain types for the payout relay.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! payout records, dead-lettered status updates, and the identifiers and
//! errors they share.

pub mod error;
pub mod failed_update;
pub mod id;
pub mod payout;

pub use error::{DomainError, DomainResult};
pub use failed_update::{FailedStatusUpdate, FailedStatusUpdateRow};
pub use id::TransactionId;
pub use payout::{PayoutRecord, PayoutState, UpstreamPayout, parse_upstream_time};
