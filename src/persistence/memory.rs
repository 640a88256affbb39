use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::models::courier::Courier;
use crate::models::order::{Order, OrderState};
use crate::models::store::Store;
use crate::models::wallet::{TransactionKind, Wallet, WalletAccount, WalletTransaction};
use crate::models::withdrawal::{WithdrawalRequest, WithdrawalState};
use crate::persistence::{
    ClaimOutcome, DeliveryRepository, DeliverySettlement, OrderFilter, RepositoryCounts,
    RepositoryError,
};

/// In-process repository backed by `DashMap`s.
///
/// Each map entry's write lock is the serialization point for that row.
/// Compound operations take locks in the order order -> wallet -> courier and
/// wallet -> withdrawal, and never hold two entries of the same map.
#[derive(Default)]
pub struct InMemoryRepository {
    stores: DashMap<Uuid, Store>,
    couriers: DashMap<Uuid, Courier>,
    couriers_by_user: DashMap<Uuid, Uuid>,
    orders: DashMap<Uuid, Order>,
    wallets: DashMap<Uuid, WalletAccount>,
    wallets_by_user: DashMap<Uuid, Uuid>,
    withdrawals: DashMap<Uuid, WithdrawalRequest>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn courier_user(&self, courier_id: Uuid) -> Result<Uuid, RepositoryError> {
        self.couriers
            .get(&courier_id)
            .map(|courier| courier.user_id)
            .ok_or(RepositoryError::NotFound {
                entity: "courier",
                id: courier_id,
            })
    }

    fn wallet_id_for_user(&self, user_id: Uuid) -> Result<Uuid, RepositoryError> {
        self.wallets_by_user
            .get(&user_id)
            .map(|id| *id)
            .ok_or(RepositoryError::NotFound {
                entity: "wallet for user",
                id: user_id,
            })
    }

    fn withdrawal_wallet(&self, id: Uuid) -> Result<Uuid, RepositoryError> {
        self.withdrawals
            .get(&id)
            .map(|request| request.wallet_id)
            .ok_or(RepositoryError::NotFound {
                entity: "withdrawal",
                id,
            })
    }
}

fn expect_withdrawal_state(
    request: &WithdrawalRequest,
    expected: WithdrawalState,
) -> Result<(), RepositoryError> {
    if request.state == expected {
        Ok(())
    } else {
        Err(RepositoryError::WithdrawalStateMismatch {
            id: request.id,
            expected,
            current: request.state,
        })
    }
}

#[async_trait]
impl DeliveryRepository for InMemoryRepository {
    async fn insert_store(&self, store: Store) -> Result<Store, RepositoryError> {
        self.stores.insert(store.id, store.clone());
        Ok(store)
    }

    async fn get_store(&self, id: Uuid) -> Result<Store, RepositoryError> {
        self.stores
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(RepositoryError::NotFound { entity: "store", id })
    }

    async fn insert_courier(&self, courier: Courier) -> Result<Courier, RepositoryError> {
        match self.couriers_by_user.entry(courier.user_id) {
            Entry::Occupied(_) => {
                return Err(RepositoryError::Duplicate(format!(
                    "courier for user {}",
                    courier.user_id
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(courier.id);
            }
        }

        if let Entry::Vacant(slot) = self.wallets_by_user.entry(courier.user_id) {
            let wallet = Wallet::new(courier.user_id, courier.created_at);
            slot.insert(wallet.id);
            self.wallets.insert(wallet.id, WalletAccount::new(wallet));
        }

        self.couriers.insert(courier.id, courier.clone());
        Ok(courier)
    }

    async fn get_courier(&self, id: Uuid) -> Result<Courier, RepositoryError> {
        self.couriers
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(RepositoryError::NotFound {
                entity: "courier",
                id,
            })
    }

    async fn list_couriers(&self) -> Result<Vec<Courier>, RepositoryError> {
        let mut couriers: Vec<Courier> = self
            .couriers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        couriers.sort_by_key(|courier| courier.created_at);
        Ok(couriers)
    }

    async fn set_courier_availability(
        &self,
        id: Uuid,
        available: bool,
    ) -> Result<Courier, RepositoryError> {
        let mut courier = self.couriers.get_mut(&id).ok_or(RepositoryError::NotFound {
            entity: "courier",
            id,
        })?;
        courier.available = available;
        Ok(courier.clone())
    }

    async fn update_courier_location(
        &self,
        id: Uuid,
        location: String,
        at: DateTime<Utc>,
    ) -> Result<Courier, RepositoryError> {
        let mut courier = self.couriers.get_mut(&id).ok_or(RepositoryError::NotFound {
            entity: "courier",
            id,
        })?;
        courier.current_location = Some(location);
        courier.last_location_at = Some(at);
        Ok(courier.clone())
    }

    async fn insert_order(&self, order: Order) -> Result<Order, RepositoryError> {
        match self.orders.entry(order.id) {
            Entry::Occupied(_) => Err(RepositoryError::Duplicate(format!("order {}", order.id))),
            Entry::Vacant(slot) => {
                slot.insert(order.clone());
                Ok(order)
            }
        }
    }

    async fn get_order(&self, id: Uuid) -> Result<Order, RepositoryError> {
        self.orders
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(RepositoryError::NotFound { entity: "order", id })
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, RepositoryError> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn transition_order(
        &self,
        id: Uuid,
        expected: OrderState,
        next: OrderState,
        at: DateTime<Utc>,
    ) -> Result<Order, RepositoryError> {
        let mut order = self
            .orders
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound { entity: "order", id })?;

        if order.state != expected {
            return Err(RepositoryError::StateMismatch {
                order_id: id,
                expected,
                current: order.state,
            });
        }

        order.apply_state(next, at);
        Ok(order.clone())
    }

    async fn claim_order(
        &self,
        id: Uuid,
        courier_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<ClaimOutcome, RepositoryError> {
        let mut order = self
            .orders
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound { entity: "order", id })?;

        if order.state != OrderState::ListoRecoger || order.courier_id.is_some() {
            return Ok(ClaimOutcome::Unavailable(order.clone()));
        }

        order.courier_id = Some(courier_id);
        order.apply_state(OrderState::EnCamino, at);
        Ok(ClaimOutcome::Claimed(order.clone()))
    }

    async fn complete_delivery(
        &self,
        id: Uuid,
        courier_id: Uuid,
        default_fee: i64,
        at: DateTime<Utc>,
    ) -> Result<DeliverySettlement, RepositoryError> {
        let user_id = self.courier_user(courier_id)?;
        let wallet_id = self.wallet_id_for_user(user_id)?;

        let mut order = self
            .orders
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound { entity: "order", id })?;

        if order.state != OrderState::EnCamino {
            return Err(RepositoryError::StateMismatch {
                order_id: id,
                expected: OrderState::EnCamino,
                current: order.state,
            });
        }
        if order.courier_id != Some(courier_id) {
            return Err(RepositoryError::NotAssigned {
                order_id: id,
                courier_id,
            });
        }

        let mut account = self
            .wallets
            .get_mut(&wallet_id)
            .ok_or(RepositoryError::NotFound {
                entity: "wallet",
                id: wallet_id,
            })?;
        account
            .check_consistency()
            .map_err(RepositoryError::WalletInconsistency)?;

        let mut courier = self
            .couriers
            .get_mut(&courier_id)
            .ok_or(RepositoryError::NotFound {
                entity: "courier",
                id: courier_id,
            })?;

        let earnings = order.courier_earnings(default_fee);
        let (Some(total_deliveries), Some(total_earnings)) = (
            courier.total_deliveries.checked_add(1),
            courier.total_earnings.checked_add(earnings),
        ) else {
            return Err(RepositoryError::WalletInconsistency(format!(
                "courier {courier_id}: earnings total overflows"
            )));
        };
        let transaction = account
            .credit(
                earnings,
                TransactionKind::DeliveryIncome,
                Some(order.id),
                format!("Delivery of order {}", order.number),
                at,
            )
            .map_err(RepositoryError::WalletInconsistency)?;

        courier.total_deliveries = total_deliveries;
        courier.total_earnings = total_earnings;

        order.payment_confirmed = true;
        order.apply_state(OrderState::Entregado, at);

        Ok(DeliverySettlement {
            order: order.clone(),
            courier: courier.clone(),
            wallet: account.wallet.clone(),
            transaction,
        })
    }

    async fn wallet_for_user(&self, user_id: Uuid) -> Result<WalletAccount, RepositoryError> {
        let wallet_id = self.wallet_id_for_user(user_id)?;
        self.wallets
            .get(&wallet_id)
            .map(|entry| entry.value().clone())
            .ok_or(RepositoryError::NotFound {
                entity: "wallet",
                id: wallet_id,
            })
    }

    async fn create_withdrawal(
        &self,
        courier_id: Uuid,
        amount: i64,
        at: DateTime<Utc>,
    ) -> Result<WithdrawalRequest, RepositoryError> {
        let user_id = self.courier_user(courier_id)?;
        let wallet_id = self.wallet_id_for_user(user_id)?;

        let mut account = self
            .wallets
            .get_mut(&wallet_id)
            .ok_or(RepositoryError::NotFound {
                entity: "wallet",
                id: wallet_id,
            })?;

        let available = account.wallet.available_balance;
        if amount > available {
            return Err(RepositoryError::InsufficientFunds {
                available,
                requested: amount,
            });
        }

        account.reserve(amount, at);

        let request = WithdrawalRequest {
            id: Uuid::new_v4(),
            wallet_id,
            courier_id,
            amount,
            state: WithdrawalState::Pending,
            admin_notes: None,
            payment_reference: None,
            requested_at: at,
            approved_at: None,
            rejected_at: None,
            paid_at: None,
        };
        self.withdrawals.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get_withdrawal(&self, id: Uuid) -> Result<WithdrawalRequest, RepositoryError> {
        self.withdrawals
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(RepositoryError::NotFound {
                entity: "withdrawal",
                id,
            })
    }

    async fn list_withdrawals(
        &self,
        state: Option<WithdrawalState>,
    ) -> Result<Vec<WithdrawalRequest>, RepositoryError> {
        let mut requests: Vec<WithdrawalRequest> = self
            .withdrawals
            .iter()
            .filter(|entry| state.is_none_or(|state| entry.state == state))
            .map(|entry| entry.value().clone())
            .collect();
        requests.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        Ok(requests)
    }

    async fn approve_withdrawal(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(WithdrawalRequest, WalletTransaction), RepositoryError> {
        let wallet_id = self.withdrawal_wallet(id)?;

        let mut account = self
            .wallets
            .get_mut(&wallet_id)
            .ok_or(RepositoryError::NotFound {
                entity: "wallet",
                id: wallet_id,
            })?;
        let mut request = self.withdrawals.get_mut(&id).ok_or(RepositoryError::NotFound {
            entity: "withdrawal",
            id,
        })?;

        expect_withdrawal_state(&request, WithdrawalState::Pending)?;
        account
            .check_consistency()
            .map_err(RepositoryError::WalletInconsistency)?;
        if account.wallet.pending_balance < request.amount {
            return Err(RepositoryError::WalletInconsistency(format!(
                "wallet {}: pending {} does not cover withdrawal {} of {}",
                wallet_id, account.wallet.pending_balance, id, request.amount
            )));
        }

        let short_id: String = id.to_string().chars().take(8).collect();
        let transaction =
            account.settle_withdrawal(request.amount, format!("Withdrawal #{short_id}"), at);

        request.state = WithdrawalState::Approved;
        request.approved_at = Some(at);
        Ok((request.clone(), transaction))
    }

    async fn reject_withdrawal(
        &self,
        id: Uuid,
        notes: String,
        at: DateTime<Utc>,
    ) -> Result<WithdrawalRequest, RepositoryError> {
        let wallet_id = self.withdrawal_wallet(id)?;

        let mut account = self
            .wallets
            .get_mut(&wallet_id)
            .ok_or(RepositoryError::NotFound {
                entity: "wallet",
                id: wallet_id,
            })?;
        let mut request = self.withdrawals.get_mut(&id).ok_or(RepositoryError::NotFound {
            entity: "withdrawal",
            id,
        })?;

        expect_withdrawal_state(&request, WithdrawalState::Pending)?;

        account.release(request.amount, at);
        request.state = WithdrawalState::Rejected;
        request.admin_notes = Some(notes);
        request.rejected_at = Some(at);
        Ok(request.clone())
    }

    async fn mark_withdrawal_paid(
        &self,
        id: Uuid,
        reference: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<WithdrawalRequest, RepositoryError> {
        let mut request = self.withdrawals.get_mut(&id).ok_or(RepositoryError::NotFound {
            entity: "withdrawal",
            id,
        })?;

        expect_withdrawal_state(&request, WithdrawalState::Approved)?;

        request.state = WithdrawalState::Paid;
        request.payment_reference = reference;
        request.paid_at = Some(at);
        Ok(request.clone())
    }

    async fn counts(&self) -> Result<RepositoryCounts, RepositoryError> {
        Ok(RepositoryCounts {
            stores: self.stores.len(),
            couriers: self.couriers.len(),
            orders: self.orders.len(),
            withdrawals: self.withdrawals.len(),
        })
    }
}
