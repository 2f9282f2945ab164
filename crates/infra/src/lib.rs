//! Infrastructure layer: queues, workers, storage, upstream client and
//! configuration for the payout relay.

pub mod config;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod store;
pub mod upstream;
pub mod workers;

#[cfg(test)]
mod testing;


pub use config::Config;
pub use pipeline::{Pipeline, PipelineHandle};
pub use retry::ShutdownMode;
