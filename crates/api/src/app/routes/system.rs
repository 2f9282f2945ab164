use axum::{extract::Extension, http::StatusCode, response::IntoResponse};

use crate::app::AppState;
use crate::app::errors::store_error_to_response;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Number of recorded payouts, as plain text.
pub async fn payout_count(Extension(state): Extension<AppState>) -> axum::response::Response {
    match state.store.count_payouts().await {
        Ok(count) => (StatusCode::OK, count.to_string()).into_response(),
        Err(err) => store_error_to_response(err),
    }
}
