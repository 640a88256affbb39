use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::withdrawals;
use crate::error::AppError;
use crate::models::withdrawal::{WithdrawalRequest, WithdrawalState};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/withdrawals", get(list_withdrawals))
        .route("/withdrawals/:id", get(get_withdrawal))
        .route("/withdrawals/:id/approve", post(approve))
        .route("/withdrawals/:id/reject", post(reject))
        .route("/withdrawals/:id/paid", post(mark_paid))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub state: Option<WithdrawalState>,
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub notes: String,
}

#[derive(Deserialize, Default)]
pub struct PaidRequest {
    pub payment_reference: Option<String>,
}

async fn list_withdrawals(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<WithdrawalRequest>>, AppError> {
    Ok(Json(withdrawals::list(&state, query.state).await?))
}

async fn get_withdrawal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<WithdrawalRequest>, AppError> {
    Ok(Json(state.repository.get_withdrawal(id).await?))
}

async fn approve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<WithdrawalRequest>, AppError> {
    Ok(Json(withdrawals::approve(&state, id).await?))
}

async fn reject(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<WithdrawalRequest>, AppError> {
    Ok(Json(withdrawals::reject(&state, id, payload.notes).await?))
}

async fn mark_paid(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PaidRequest>,
) -> Result<Json<WithdrawalRequest>, AppError> {
    Ok(Json(
        withdrawals::mark_paid(&state, id, payload.payment_reference).await?,
    ))
}
