//! HTTP intake bridge: publishes a job body onto its bus subject.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use cb_core::jobs::JobKind;
use cb_core::Error;

use crate::context::AppContext;
use crate::error::AppError;

/// POST /api/tasks/:kind
///
/// The body is forwarded untouched; validation happens when the dispatcher
/// receives it.
pub async fn submit_task(
    State(ctx): State<AppContext>,
    Path(kind): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let kind: JobKind = kind.parse().map_err(|_| Error::not_found("job kind", &kind))?;
    let subject = kind.subject();
    ctx.bus.publish(&subject, body.to_vec()).await?;

    tracing::debug!(subject = %subject, "Accepted job over HTTP");
    Ok((StatusCode::ACCEPTED, Json(json!({ "subject": subject }))))
}
