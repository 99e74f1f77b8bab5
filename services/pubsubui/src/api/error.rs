//! API error types and helpers.
//!
//! # Purpose
//! Keeps error bodies uniform across handlers and translates broker status
//! codes into HTTP statuses.
//!
//! # Key invariants
//! - Every error body carries a stable `code` and a human-readable `message`.
//! - Broker failures that map to a 5xx status are logged server-side; 4xx
//!   outcomes are the caller's problem and are not.
use crate::api::types::ErrorResponse;
use crate::readiness::NotServable;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use pubsubui_broker::{BrokerError, Code};

/// Structured API error returned by handlers.
///
/// ```rust
/// use axum::http::StatusCode;
/// use pubsubui::api::error::api_bad_request;
///
/// let err = api_bad_request("invalid page \"x\"");
/// assert_eq!(err.status, StatusCode::BAD_REQUEST);
/// assert_eq!(err.body.code, "bad_request");
/// ```
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

fn api_error(status: StatusCode, code: &str, message: &str) -> ApiError {
    ApiError {
        status,
        body: ErrorResponse {
            code: code.to_string(),
            message: message.to_string(),
            request_id: None,
        },
    }
}

pub fn api_bad_request(message: &str) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

pub fn api_not_ready(message: &str) -> ApiError {
    api_error(StatusCode::SERVICE_UNAVAILABLE, "not_ready", message)
}

pub fn api_unavailable(message: &str) -> ApiError {
    api_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable", message)
}

/// Error for a project that cannot be served yet (or at all).
pub fn api_not_servable(project_id: &str, reason: NotServable) -> ApiError {
    match reason {
        NotServable::Pending => api_not_ready("Pub/Sub clients are still initializing"),
        NotServable::UnknownProject => {
            tracing::debug!(project_id, "no client configured for project");
            api_error(
                StatusCode::BAD_REQUEST,
                "project_not_supported",
                &format!("project {project_id:?} not supported"),
            )
        }
    }
}

/// HTTP status for a broker status code.
pub fn status_for_code(code: Code) -> StatusCode {
    match code {
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::DeadlineExceeded => StatusCode::REQUEST_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists => StatusCode::ALREADY_REPORTED,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
        Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
        Code::Aborted => StatusCode::NOT_ACCEPTABLE,
        Code::OutOfRange => StatusCode::RANGE_NOT_SATISFIABLE,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::Cancelled | Code::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Translates a broker failure while attempting `action`.
pub fn api_broker(action: &str, err: &BrokerError) -> ApiError {
    let status = status_for_code(err.code);
    if status.is_server_error() {
        tracing::error!(action, code = %err.code, error = %err.message, "broker request failed");
    }
    api_error(
        status,
        &err.code.as_str().to_ascii_lowercase(),
        &err.message,
    )
}
