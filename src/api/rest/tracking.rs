use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use chrono::Utc;

use crate::engine::location::{self, TrackedCourier};
use crate::error::AppError;
use crate::geo::MapMarker;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tracking", get(snapshot))
        .route("/tracking/markers", get(markers))
}

async fn snapshot(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TrackedCourier>>, AppError> {
    Ok(Json(location::tracking_snapshot(&state, Utc::now()).await?))
}

async fn markers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<MapMarker>>, AppError> {
    Ok(Json(location::markers(&state, Utc::now()).await?))
}
