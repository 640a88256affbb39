use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo;
use crate::models::store::Store;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stores", post(register_store))
        .route("/stores/:id", get(get_store))
}

#[derive(Deserialize)]
pub struct RegisterStoreRequest {
    pub owner_user_id: Uuid,
    pub name: String,
    pub address: String,
    pub location: Option<String>,
}

async fn register_store(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterStoreRequest>,
) -> Result<Json<Store>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let location = payload
        .location
        .as_deref()
        .map(|raw| geo::parse_point(raw).map(|point| geo::format_point(&point)))
        .transpose()?;

    let store = Store {
        id: Uuid::new_v4(),
        owner_user_id: payload.owner_user_id,
        name: payload.name,
        address: payload.address,
        location,
        created_at: Utc::now(),
    };

    Ok(Json(state.repository.insert_store(store).await?))
}

async fn get_store(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Store>, AppError> {
    Ok(Json(state.repository.get_store(id).await?))
}
