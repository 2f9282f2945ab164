use axum::{extract::Extension, http::StatusCode, response::IntoResponse};
use tracing::{debug, warn};

use payrelay_infra::queue::{Notification, Task};

use crate::app::AppState;
use crate::app::errors::queue_error_to_response;

/// Upstream calls this when a payout happened. The body is ignored: the
/// ingestion worker fetches everything pending.
///
/// Waits for queue space under the blocking overflow policy.
pub async fn receive(Extension(state): Extension<AppState>) -> axum::response::Response {
    match state.notifications.put(Task::new(Notification::now())).await {
        Ok(()) => {
            debug!(queued = state.notifications.len(), "payout notification queued");
            (StatusCode::OK, "ok").into_response()
        }
        Err(err) => {
            warn!(error = %err, "payout notification refused");
            queue_error_to_response(err)
        }
    }
}
