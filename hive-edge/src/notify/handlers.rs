//! Notification HTTP endpoints

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use super::model::{Notification, NotificationRequest, Page};
use crate::auth::Principal;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub user_id: Option<String>,
    #[serde(default)]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub size: usize,
}

fn default_page_size() -> usize {
    20
}

/// Resolve the effective owner for a read-side call
///
/// A `userId` parameter naming someone else is an ownership error, which
/// the notification contract reports as 400.
fn effective_owner(principal: &Principal, requested: Option<&str>) -> Result<String> {
    match requested {
        Some(user_id) if user_id != principal.id => Err(Error::Validation(
            "Notification does not belong to the requesting user".to_string(),
        )),
        _ => Ok(principal.id.clone()),
    }
}

/// `POST /api/v1/notifications` — create and fan out
pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(request): Json<NotificationRequest>,
) -> Result<(StatusCode, Json<Notification>)> {
    let notification = state
        .notifications
        .create(request, &ctx.correlation_id)
        .await?;
    Ok((StatusCode::CREATED, Json(notification)))
}

/// `GET /api/v1/notifications?userId&page&size`
pub async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Notification>>> {
    let owner = effective_owner(&principal, query.user_id.as_deref())?;
    let page = state
        .notifications
        .list(&owner, query.page, query.size)
        .await?;
    Ok(Json(page))
}

/// `GET /api/v1/notifications/unread`
pub async fn unread(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<Notification>>> {
    Ok(Json(state.notifications.unread(&principal.id).await?))
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub count: usize,
}

/// `GET /api/v1/notifications/unread/count`
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<UnreadCountResponse>> {
    let count = state.notifications.unread_count(&principal.id).await?;
    Ok(Json(UnreadCountResponse { count }))
}

/// `PATCH /api/v1/notifications/{id}/read`
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Notification>> {
    Ok(Json(
        state.notifications.mark_read(&id, &principal.id).await?,
    ))
}

/// `PATCH /api/v1/notifications/{id}/archive`
pub async fn archive(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<Notification>> {
    Ok(Json(state.notifications.archive(&id, &principal.id).await?))
}

/// `DELETE /api/v1/notifications/{id}`
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.notifications.delete(&id, &principal.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
