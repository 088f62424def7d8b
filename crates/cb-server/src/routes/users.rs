//! User listing for a provider, served straight from its "Users" export.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use cb_core::work::JobDeadline;
use cb_core::{Error, ProviderId, Result};
use cb_db::models::NewUser;
use cb_providers::create_service;

use crate::context::AppContext;

#[derive(Debug, Deserialize)]
pub struct UsersParams {
    pub id: Option<String>,
}

/// GET /api/users?id=<provider_platform_id>
///
/// Any failure is a 500 with a plain-text body.
pub async fn list_users(State(ctx): State<AppContext>, Query(params): Query<UsersParams>) -> Response {
    match fetch_users(&ctx, params.id.as_deref()).await {
        Ok(users) => Json(users).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to list provider users");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn fetch_users(ctx: &AppContext, id: Option<&str>) -> Result<Vec<NewUser>> {
    let provider: ProviderId = id
        .ok_or_else(|| Error::Validation("missing provider id".into()))?
        .parse()
        .map_err(|e| Error::Validation(format!("invalid provider id: {e}")))?;

    let service = create_service(&ctx.services(), provider)?;
    service.refresh_credential().await?;

    let deadline = JobDeadline::start(&CancellationToken::new(), ctx.config.jobs.ceiling());
    service.get_users(deadline.token()).await
}
