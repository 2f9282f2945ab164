//! HTTP API: webhook intake, payout count and health endpoints.

pub mod app;
