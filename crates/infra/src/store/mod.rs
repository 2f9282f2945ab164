//! Durable store boundary.
//!
//! Two record types live here: recorded payouts and dead-lettered status
//! updates. Both are written through [`PayoutStore::execute`] with
//! idempotent-insert semantics.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use r#trait::{InsertOutcome, PayoutStore, StoreError, StoreOp};
