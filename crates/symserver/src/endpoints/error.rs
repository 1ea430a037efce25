use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sentry::integrations::anyhow::capture_anyhow;
use serde_json::json;

use symserver_service::metric;
use symserver_service::types::ValidationError;

/// An error response: `{"error": <reason>}` with the matching status code.
///
/// Constructing a bad-request error increments the
/// `symbolicate.request_error` counter tagged with the reason.
#[derive(Debug)]
pub struct RequestError {
    status: StatusCode,
    body: serde_json::Value,
}

impl RequestError {
    pub fn bad_request(reason: &'static str, message: impl std::fmt::Display) -> Self {
        metric!(counter("symbolicate.request_error") += 1, "reason" => reason);
        tracing::debug!(reason, %message, "rejecting symbolication request");

        Self {
            status: StatusCode::BAD_REQUEST,
            body: json!({ "error": reason }),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        let event_id = capture_anyhow(&err);
        tracing::error!(error = %err, %event_id, "internal error");

        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: json!({ "error": "internal_error", "correlation_id": event_id.to_string() }),
        }
    }
}

impl From<ValidationError> for RequestError {
    fn from(err: ValidationError) -> Self {
        Self::bad_request(err.reason, err)
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
