use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::notification::{Notification, NotificationKind};
use crate::models::wallet::WalletAccount;
use crate::models::withdrawal::{WithdrawalRequest, WithdrawalState};
use crate::persistence::RepositoryError;
use crate::state::AppState;

pub async fn wallet_for_courier(
    state: &AppState,
    courier_id: Uuid,
) -> Result<WalletAccount, AppError> {
    let courier = state.repository.get_courier(courier_id).await?;
    Ok(state.repository.wallet_for_user(courier.user_id).await?)
}

/// Reserves part of the available balance for payout.
pub async fn request_withdrawal(
    state: &AppState,
    courier_id: Uuid,
    amount: i64,
) -> Result<WithdrawalRequest, AppError> {
    if amount <= 0 {
        return Err(AppError::BadRequest("amount must be > 0".to_string()));
    }

    let request = state
        .repository
        .create_withdrawal(courier_id, amount, Utc::now())
        .await?;

    info!(withdrawal_id = %request.id, courier_id = %courier_id, amount, "withdrawal requested");
    Ok(request)
}

pub async fn list(
    state: &AppState,
    filter: Option<WithdrawalState>,
) -> Result<Vec<WithdrawalRequest>, AppError> {
    Ok(state.repository.list_withdrawals(filter).await?)
}

pub async fn approve(state: &AppState, id: Uuid) -> Result<WithdrawalRequest, AppError> {
    let (request, transaction) = state
        .repository
        .approve_withdrawal(id, Utc::now())
        .await
        .inspect_err(|err| {
            if let RepositoryError::WalletInconsistency(detail) = err {
                error!(
                    withdrawal_id = %id,
                    detail = %detail,
                    "withdrawal blocked: wallet needs manual reconciliation"
                );
            }
        })?;

    info!(
        withdrawal_id = %id,
        transaction_id = %transaction.id,
        amount = request.amount,
        "withdrawal approved"
    );
    notify_courier(state, &request, "Withdrawal approved").await;
    Ok(request)
}

pub async fn reject(
    state: &AppState,
    id: Uuid,
    notes: String,
) -> Result<WithdrawalRequest, AppError> {
    if notes.trim().is_empty() {
        return Err(AppError::BadRequest(
            "a rejection reason is required".to_string(),
        ));
    }

    let request = state
        .repository
        .reject_withdrawal(id, notes, Utc::now())
        .await?;

    info!(withdrawal_id = %id, "withdrawal rejected");
    notify_courier(state, &request, "Withdrawal rejected").await;
    Ok(request)
}

pub async fn mark_paid(
    state: &AppState,
    id: Uuid,
    reference: Option<String>,
) -> Result<WithdrawalRequest, AppError> {
    let request = state
        .repository
        .mark_withdrawal_paid(id, reference, Utc::now())
        .await?;

    info!(withdrawal_id = %id, "withdrawal paid");
    notify_courier(state, &request, "Withdrawal paid").await;
    Ok(request)
}

async fn notify_courier(state: &AppState, request: &WithdrawalRequest, title: &str) {
    match state.repository.get_courier(request.courier_id).await {
        Ok(courier) => state.notify(Notification::new(
            courier.user_id,
            NotificationKind::WithdrawalUpdated,
            title,
            format!("Your withdrawal of ${} is {}", request.amount, request.state),
            None,
        )),
        Err(err) => warn!(withdrawal_id = %request.id, error = %err, "courier not notified"),
    }
}
