//! API request payloads and the uniform response envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::url;
use crate::{Error, Result};

/// Response messages.
pub const MSG_INVALID_REQUEST_BODY: &str = "invalid request body";
pub const MSG_QUERY_PARAM_MISSING: &str = "query param missing or invalid";
pub const MSG_UNPROCESSABLE_ENTITY: &str = "unprocessable entity";
pub const MSG_JOB_ENQUEUED: &str = "job enqueued";
pub const MSG_JOB_ENQUEUE_FAIL: &str = "job enqueue failed";
pub const MSG_JOB_ALREADY_EXISTS: &str = "job already exists";
pub const MSG_JOB_RETRIEVED: &str = "job retrieved";
pub const MSG_JOBS_RETRIEVED: &str = "jobs retrieved";
pub const MSG_JOB_NOT_FOUND: &str = "job not found";
pub const MSG_JOB_CANCELLED: &str = "job cancelled";
pub const MSG_JOB_CANCEL_FAILED: &str = "job cancel failed";
pub const MSG_GET_JOBS_FAIL: &str = "get all jobs failed";
pub const MSG_ARTIFACT_NOT_FOUND: &str = "artifact not found";
pub const MSG_FILE_NOT_FOUND: &str = "file not found";

/// Request payload for enqueueing a new download job.
#[derive(Debug, Clone, Deserialize)]
pub struct EnqueueRequest {
    pub url: String,
    /// Extractor format preset alias, e.g. "mp4" or "aac".
    pub preset: String,
}

impl EnqueueRequest {
    pub fn validate(&self) -> Result<()> {
        if !url::is_valid(&self.url) {
            return Err(Error::InvalidUrl);
        }

        if self.preset.is_empty() {
            return Err(Error::InvalidPreset);
        }

        Ok(())
    }
}

/// Uniform response envelope.
///
/// `data` is never JSON null: absent data serializes as an empty string
/// so clients can rely on the field's presence.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub message: String,
    pub error: String,
    pub data: Value,
}

impl Envelope {
    pub fn new(message: &str, data: Value, error: Option<&Error>) -> Self {
        Self {
            message: message.to_string(),
            error: error.map(|e| e.to_string()).unwrap_or_default(),
            data: if data.is_null() {
                Value::String(String::new())
            } else {
                data
            },
        }
    }
}

/// Build a JSON envelope response with the given status.
pub fn envelope(
    status: StatusCode,
    message: &str,
    data: Value,
    error: Option<&Error>,
) -> Response {
    (status, Json(Envelope::new(message, data, error))).into_response()
}

pub fn ok(message: &str, data: Value) -> Response {
    envelope(StatusCode::OK, message, data, None)
}

pub fn accepted(message: &str, data: Value) -> Response {
    envelope(StatusCode::ACCEPTED, message, data, None)
}

pub fn no_content() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

pub fn bad_request(message: &str, error: Option<&Error>) -> Response {
    envelope(StatusCode::BAD_REQUEST, message, Value::Null, error)
}

pub fn not_found(message: &str, error: Option<&Error>) -> Response {
    envelope(StatusCode::NOT_FOUND, message, Value::Null, error)
}

pub fn unprocessable(message: &str, error: Option<&Error>) -> Response {
    envelope(
        StatusCode::UNPROCESSABLE_ENTITY,
        message,
        Value::Null,
        error,
    )
}

pub fn internal(message: &str, error: Option<&Error>) -> Response {
    envelope(
        StatusCode::INTERNAL_SERVER_ERROR,
        message,
        Value::Null,
        error,
    )
}
