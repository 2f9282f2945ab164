use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use payrelay_infra::queue::QueueError;
use payrelay_infra::store::StoreError;

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    match err {
        QueueError::Full { .. } => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "queue_full", err.to_string())
        }
        QueueError::Closed { .. } => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "shutting_down", err.to_string())
        }
        QueueError::TaskDoneUnderflow { .. } => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "queue_error", err.to_string())
        }
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::Unavailable { .. } => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", err.to_string())
        }
        StoreError::Database { .. } | StoreError::Decode(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
