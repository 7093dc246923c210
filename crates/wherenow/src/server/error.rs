//! HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::Error;
use crate::record::ValidationError;

/// An error reported to the client as `{"error": "<code>"}`.
#[derive(Debug)]
pub enum ApiError {
    /// The method is not GET, POST or PATCH.
    MethodNotAllowed,
    /// The path is not served.
    NotFound,
    /// Missing, malformed or wrong bearer token.
    Unauthorized,
    /// The body is larger than the accepted maximum.
    PayloadTooLarge,
    /// The body failed validation.
    Validation(ValidationError),
    /// The log operation failed.
    Storage(Error),
}

impl ApiError {
    /// HTTP status of this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Storage(err) if err.is_not_found() => StatusCode::NOT_FOUND,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MethodNotAllowed => "method_not_allowed",
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::PayloadTooLarge => "payload_too_large",
            Self::Validation(err) => err.code(),
            Self::Storage(err) => err.code(),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self::Storage(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Storage(err) if status.is_server_error() => {
                tracing::error!(code = err.code(), "location log error: {err}");
            }
            Self::Validation(err) => tracing::debug!(code = err.code(), "rejected body: {err}"),
            _ => tracing::debug!(code = self.code(), "request rejected"),
        }
        (status, Json(json!({ "error": self.code() }))).into_response()
    }
}
