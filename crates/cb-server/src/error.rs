//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`cb_core::Error`] so that route handlers
//! can return `Result<T, AppError>` directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
pub struct AppError {
    inner: cb_core::Error,
}

impl AppError {
    pub fn new(inner: cb_core::Error) -> Self {
        Self { inner }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.inner.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<cb_core::Error> for AppError {
    fn from(e: cb_core::Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                "Server error in API handler"
            );
        }

        let code = match &self.inner {
            cb_core::Error::Configuration(_) => "configuration_error",
            cb_core::Error::Auth(_) => "auth_error",
            cb_core::Error::NotFound { .. } => "not_found",
            cb_core::Error::Transfer(_) => "transfer_error",
            cb_core::Error::Parse(_) => "parse_error",
            cb_core::Error::Database { .. } => "database_error",
            cb_core::Error::Cancelled(_) => "cancelled",
            cb_core::Error::CredentialState(_) => "credential_state_error",
            cb_core::Error::Validation(_) => "validation_error",
            cb_core::Error::Bus(_) => "bus_error",
            cb_core::Error::Tool { .. } => "tool_error",
            cb_core::Error::Io { .. } => "io_error",
            cb_core::Error::Internal(_) => "internal_error",
        };

        let body = json!({
            "error": self.inner.to_string(),
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
