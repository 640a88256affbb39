use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::geo::GeoError;
use crate::models::order::OrderState;
use crate::persistence::RepositoryError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: OrderState, to: OrderState },

    /// Lost a claim race. Expected; the caller should pick another order.
    #[error("order already claimed by another courier")]
    AlreadyClaimed,

    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: i64, requested: i64 },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("wallet inconsistency: {0}")]
    WalletInconsistency(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { .. } => AppError::NotFound(err.to_string()),
            RepositoryError::NotAssigned { .. } => AppError::PermissionDenied(err.to_string()),
            RepositoryError::InsufficientFunds {
                available,
                requested,
            } => AppError::InsufficientFunds {
                available,
                requested,
            },
            RepositoryError::WalletInconsistency(msg) => AppError::WalletInconsistency(msg),
            RepositoryError::Duplicate(_)
            | RepositoryError::StateMismatch { .. }
            | RepositoryError::WithdrawalStateMismatch { .. } => {
                AppError::Conflict(err.to_string())
            }
            RepositoryError::Backend(msg) => AppError::Internal(msg),
        }
    }
}

impl From<GeoError> for AppError {
    fn from(err: GeoError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::InvalidTransition { .. } | AppError::InsufficientFunds { .. } => {
                (StatusCode::CONFLICT, self.to_string())
            }
            AppError::AlreadyClaimed => (
                StatusCode::CONFLICT,
                "order is no longer available, try another order".to_string(),
            ),
            AppError::PermissionDenied(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::WalletInconsistency(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "wallet requires manual reconciliation".to_string(),
            ),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
