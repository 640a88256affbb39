use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::notification::Notification;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users/:user_id/notifications", get(list_notifications))
        .route(
            "/users/:user_id/notifications/:id/read",
            post(mark_notification_read),
        )
}

#[derive(Serialize)]
pub struct InboxResponse {
    pub unread: usize,
    pub notifications: Vec<Notification>,
}

async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Json<InboxResponse> {
    Json(InboxResponse {
        unread: state.inbox.unread_count(user_id),
        notifications: state.inbox.list(user_id),
    })
}

async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    Path((user_id, id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Notification>, AppError> {
    state
        .inbox
        .mark_read(user_id, id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("notification {id} not found")))
}
