use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::assignment::{self, AvailableOrder};
use crate::engine::lifecycle::{self, PlaceOrder};
use crate::error::AppError;
use crate::models::actor::Actor;
use crate::models::order::{Order, OrderState};
use crate::persistence::{DeliverySettlement, OrderFilter};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(place_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/transitions", post(advance_order))
        .route("/orders/:id/claim", post(claim_order))
        .route("/orders/:id/deliver", post(deliver_order))
        .route("/available-orders", get(list_available))
}

#[derive(Deserialize)]
pub struct TransitionRequest {
    pub actor: Actor,
    pub state: OrderState,
}

#[derive(Deserialize)]
pub struct CourierRequest {
    pub courier_id: Uuid,
}

async fn place_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PlaceOrder>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(lifecycle::place_order(&state, payload).await?))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<OrderFilter>,
) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.repository.list_orders(&filter).await?))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.repository.get_order(id).await?))
}

async fn advance_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TransitionRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(
        lifecycle::advance(&state, id, payload.actor, payload.state).await?,
    ))
}

async fn claim_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CourierRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(assignment::claim(&state, id, payload.courier_id).await?))
}

async fn deliver_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CourierRequest>,
) -> Result<Json<DeliverySettlement>, AppError> {
    Ok(Json(
        lifecycle::confirm_delivery(&state, id, payload.courier_id).await?,
    ))
}

async fn list_available(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<AvailableOrder>>, AppError> {
    Ok(Json(assignment::list_available(&state).await?))
}
