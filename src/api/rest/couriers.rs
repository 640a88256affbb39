use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::{get, patch, post, put};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{location, withdrawals};
use crate::error::AppError;
use crate::models::courier::{Courier, GeoPoint};
use crate::models::order::{Order, OrderState};
use crate::models::wallet::{Wallet, WalletTransaction};
use crate::models::withdrawal::WithdrawalRequest;
use crate::persistence::OrderFilter;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(register_courier).get(list_couriers))
        .route("/couriers/:id", get(get_courier))
        .route("/couriers/:id/availability", patch(update_availability))
        .route("/couriers/:id/location", put(report_location))
        .route("/couriers/:id/deliveries", get(active_deliveries))
        .route("/couriers/:id/wallet", get(get_wallet))
        .route("/couriers/:id/withdrawals", post(request_withdrawal))
}

#[derive(Deserialize)]
pub struct RegisterCourierRequest {
    pub user_id: Uuid,
    pub name: String,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

#[derive(Deserialize)]
pub struct AvailabilityRequest {
    pub available: bool,
}

#[derive(Deserialize)]
pub struct WithdrawalPayload {
    pub amount: i64,
}

#[derive(Serialize)]
pub struct WalletResponse {
    pub wallet: Wallet,
    pub transactions: Vec<WalletTransaction>,
}

async fn register_courier(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterCourierRequest>,
) -> Result<Json<Courier>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let courier = Courier {
        id: Uuid::new_v4(),
        user_id: payload.user_id,
        name: payload.name,
        available: payload.available,
        current_location: None,
        last_location_at: None,
        total_deliveries: 0,
        total_earnings: 0,
        rating: 5.0,
        created_at: Utc::now(),
    };

    Ok(Json(state.repository.insert_courier(courier).await?))
}

async fn list_couriers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Courier>>, AppError> {
    Ok(Json(state.repository.list_couriers().await?))
}

async fn get_courier(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Courier>, AppError> {
    Ok(Json(state.repository.get_courier(id).await?))
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AvailabilityRequest>,
) -> Result<Json<Courier>, AppError> {
    Ok(Json(
        location::set_availability(&state, id, payload.available).await?,
    ))
}

async fn report_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(point): Json<GeoPoint>,
) -> Result<Json<Courier>, AppError> {
    Ok(Json(location::report_location(&state, id, point).await?))
}

async fn active_deliveries(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Order>>, AppError> {
    state.repository.get_courier(id).await?;

    let filter = OrderFilter {
        state: Some(OrderState::EnCamino),
        courier_id: Some(id),
        ..OrderFilter::default()
    };
    Ok(Json(state.repository.list_orders(&filter).await?))
}

async fn get_wallet(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<WalletResponse>, AppError> {
    let account = withdrawals::wallet_for_courier(&state, id).await?;
    let mut transactions = account.transactions;
    transactions.reverse();

    Ok(Json(WalletResponse {
        wallet: account.wallet,
        transactions,
    }))
}

async fn request_withdrawal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<WithdrawalPayload>,
) -> Result<Json<WithdrawalRequest>, AppError> {
    Ok(Json(
        withdrawals::request_withdrawal(&state, id, payload.amount).await?,
    ))
}
