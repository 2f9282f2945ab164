//! HTTP API application wiring (Axum router + shared state).
//!
//! - `routes/`: HTTP handlers (webhook intake, system endpoints)
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use payrelay_infra::PipelineHandle;
use payrelay_infra::queue::{Notification, WorkQueue};
use payrelay_infra::store::PayoutStore;

pub mod errors;
pub mod routes;

/// What the handlers need from the running pipeline.
#[derive(Clone)]
pub struct AppState {
    pub notifications: Arc<WorkQueue<Notification>>,
    pub store: Arc<dyn PayoutStore>,
}

impl AppState {
    pub fn from_pipeline(pipeline: &PipelineHandle) -> Self {
        Self {
            notifications: Arc::clone(pipeline.notifications()),
            store: Arc::clone(pipeline.store()),
        }
    }
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .route("/payout/count", get(routes::system::payout_count))
        .route(
            "/expenzy/webhook/",
            get(routes::webhook::receive).post(routes::webhook::receive),
        )
        .layer(ServiceBuilder::new().layer(Extension(state)))
}
