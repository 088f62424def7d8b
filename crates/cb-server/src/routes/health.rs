//! Liveness endpoint.

use axum::http::StatusCode;

/// GET /
pub async fn root() -> (StatusCode, &'static str) {
    (StatusCode::OK, "coursebridge is running")
}
