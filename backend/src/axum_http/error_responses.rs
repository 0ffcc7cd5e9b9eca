use axum::{
    Json,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::usecases::subscriptions::SubscriptionError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

/// Maps a use-case error onto the JSON error shape. Internal detail never
/// reaches the client; provider errors pass through verbatim.
pub fn subscription_error_response(err: &SubscriptionError) -> Response {
    let status = err.status_code();
    (
        status,
        Json(ErrorResponse {
            code: status.as_u16(),
            message: err.client_message(),
        }),
    )
        .into_response()
}
