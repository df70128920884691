//! Mapping of request failures onto HTTP responses.

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dfscan_core::AnalyzeError;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Failure of one HTTP request.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The multipart body carried no file.
    #[error("missing multipart field 'file'")]
    MissingFile,

    /// The request body is not a readable multipart form.
    #[error("invalid multipart body: {0}")]
    Multipart(String),

    /// The upload exceeds the configured size ceiling.
    #[error("upload too large: {0}")]
    PayloadTooLarge(String),

    /// Decoding or scoring the frame failed.
    #[error(transparent)]
    Analyze(#[from] AnalyzeError),

    /// The scoring task itself failed (panicked or was cancelled).
    #[error("analysis task failed: {0}")]
    Task(String),
}

impl ApiError {
    /// HTTP status this error is reported with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MissingFile | Self::Multipart(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Analyze(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            Self::Analyze(_) | Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge(e.body_text())
        } else {
            Self::Multipart(e.body_text())
        }
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(e: MultipartRejection) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge(e.body_text())
        } else {
            Self::Multipart(e.body_text())
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Always `"error"`.
    pub status: &'static str,
    /// Human-readable description.
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(%status, "Request failed: {self}");
        } else {
            warn!(%status, "Request rejected: {self}");
        }
        let body = ErrorBody {
            status: "error",
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
