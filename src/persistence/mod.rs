pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::courier::Courier;
use crate::models::order::{Order, OrderState};
use crate::models::store::Store;
use crate::models::wallet::{Wallet, WalletAccount, WalletTransaction};
use crate::models::withdrawal::{WithdrawalRequest, WithdrawalState};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{0} already exists")]
    Duplicate(String),

    /// A conditional order update found a different state than expected.
    #[error("order {order_id} is {current}, expected {expected}")]
    StateMismatch {
        order_id: Uuid,
        expected: OrderState,
        current: OrderState,
    },

    #[error("order {order_id} is not assigned to courier {courier_id}")]
    NotAssigned { order_id: Uuid, courier_id: Uuid },

    #[error("withdrawal {id} is {current}, expected {expected}")]
    WithdrawalStateMismatch {
        id: Uuid,
        expected: WithdrawalState,
        current: WithdrawalState,
    },

    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: i64, requested: i64 },

    #[error("wallet inconsistency: {0}")]
    WalletInconsistency(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderFilter {
    pub state: Option<OrderState>,
    pub store_id: Option<Uuid>,
    pub courier_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    pub unassigned_only: bool,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.state.is_none_or(|state| order.state == state)
            && self.store_id.is_none_or(|id| order.store_id == id)
            && self.courier_id.is_none_or(|id| order.courier_id == Some(id))
            && self.customer_id.is_none_or(|id| order.customer_id == id)
            && (!self.unassigned_only || order.courier_id.is_none())
    }
}

/// Result of the conditional claim update.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed(Order),
    /// The precondition did not hold; carries the order as it was found.
    Unavailable(Order),
}

/// Everything written by a confirmed delivery.
#[derive(Debug, Clone, Serialize)]
pub struct DeliverySettlement {
    pub order: Order,
    pub courier: Courier,
    pub wallet: Wallet,
    pub transaction: WalletTransaction,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RepositoryCounts {
    pub stores: usize,
    pub couriers: usize,
    pub orders: usize,
    pub withdrawals: usize,
}

/// Durable storage for orders, couriers and wallets.
///
/// Every method that checks a precondition and then mutates must do both as a
/// single atomic step against the backing store; callers never follow a read
/// with a dependent write.
#[async_trait]
pub trait DeliveryRepository: Send + Sync + 'static {
    async fn insert_store(&self, store: Store) -> Result<Store, RepositoryError>;

    async fn get_store(&self, id: Uuid) -> Result<Store, RepositoryError>;

    /// Inserts a courier and creates its wallet unless the user already has one.
    async fn insert_courier(&self, courier: Courier) -> Result<Courier, RepositoryError>;

    async fn get_courier(&self, id: Uuid) -> Result<Courier, RepositoryError>;

    async fn list_couriers(&self) -> Result<Vec<Courier>, RepositoryError>;

    async fn set_courier_availability(
        &self,
        id: Uuid,
        available: bool,
    ) -> Result<Courier, RepositoryError>;

    /// Last-write-wins position update.
    async fn update_courier_location(
        &self,
        id: Uuid,
        location: String,
        at: DateTime<Utc>,
    ) -> Result<Courier, RepositoryError>;

    async fn insert_order(&self, order: Order) -> Result<Order, RepositoryError>;

    async fn get_order(&self, id: Uuid) -> Result<Order, RepositoryError>;

    /// Matching orders, newest first.
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError>;

    /// `UPDATE ... SET state = next WHERE id = ? AND state = expected`.
    async fn transition_order(
        &self,
        id: Uuid,
        expected: OrderState,
        next: OrderState,
        at: DateTime<Utc>,
    ) -> Result<Order, RepositoryError>;

    /// `UPDATE ... SET courier_id = ?, state = en_camino
    ///  WHERE id = ? AND state = listo_recoger AND courier_id IS NULL`.
    async fn claim_order(
        &self,
        id: Uuid,
        courier_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<ClaimOutcome, RepositoryError>;

    /// Marks the order delivered, credits the courier wallet, appends the
    /// ledger entry and bumps courier totals as one unit. Nothing is written
    /// if the wallet fails its consistency check.
    async fn complete_delivery(
        &self,
        id: Uuid,
        courier_id: Uuid,
        default_fee: i64,
        at: DateTime<Utc>,
    ) -> Result<DeliverySettlement, RepositoryError>;

    async fn wallet_for_user(&self, user_id: Uuid) -> Result<WalletAccount, RepositoryError>;

    /// Reserves `amount` of the courier's available balance and records a
    /// pending request.
    async fn create_withdrawal(
        &self,
        courier_id: Uuid,
        amount: i64,
        at: DateTime<Utc>,
    ) -> Result<WithdrawalRequest, RepositoryError>;

    async fn get_withdrawal(&self, id: Uuid) -> Result<WithdrawalRequest, RepositoryError>;

    async fn list_withdrawals(
        &self,
        state: Option<WithdrawalState>,
    ) -> Result<Vec<WithdrawalRequest>, RepositoryError>;

    async fn approve_withdrawal(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(WithdrawalRequest, WalletTransaction), RepositoryError>;

    async fn reject_withdrawal(
        &self,
        id: Uuid,
        notes: String,
        at: DateTime<Utc>,
    ) -> Result<WithdrawalRequest, RepositoryError>;

    async fn mark_withdrawal_paid(
        &self,
        id: Uuid,
        reference: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<WithdrawalRequest, RepositoryError>;

    async fn counts(&self) -> Result<RepositoryCounts, RepositoryError>;
}
