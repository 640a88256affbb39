use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::events::ChangeEvent;
use crate::geo;
use crate::models::actor::Actor;
use crate::models::notification::{Notification, NotificationKind};
use crate::models::order::{Order, OrderState, OrderTimeline, PaymentMethod};
use crate::persistence::{DeliverySettlement, RepositoryError};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrder {
    pub customer_id: Uuid,
    pub store_id: Uuid,
    pub subtotal: i64,
    pub delivery_fee: Option<i64>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    pub delivery_address: String,
    pub delivery_location: Option<String>,
    pub notes: Option<String>,
}

/// Turns a lost conditional update into the transition error the caller sees.
pub(crate) fn transition_error(err: RepositoryError, to: OrderState) -> AppError {
    match err {
        RepositoryError::StateMismatch { current, .. } => {
            AppError::InvalidTransition { from: current, to }
        }
        other => AppError::from(other),
    }
}

/// Checkout: records a new order in `pendiente` and tells the store.
pub async fn place_order(state: &AppState, request: PlaceOrder) -> Result<Order, AppError> {
    if request.subtotal < 0 {
        return Err(AppError::BadRequest("subtotal must be >= 0".to_string()));
    }
    if request.delivery_fee.is_some_and(|fee| fee < 0) {
        return Err(AppError::BadRequest("delivery_fee must be >= 0".to_string()));
    }
    if request.delivery_address.trim().is_empty() {
        return Err(AppError::BadRequest(
            "delivery_address cannot be empty".to_string(),
        ));
    }

    let delivery_location = request
        .delivery_location
        .as_deref()
        .map(|raw| geo::parse_point(raw).map(|point| geo::format_point(&point)))
        .transpose()?;

    let store = state.repository.get_store(request.store_id).await?;

    let now = Utc::now();
    let fee = request
        .delivery_fee
        .unwrap_or(state.settings.default_delivery_fee);
    let total = request
        .subtotal
        .checked_add(fee)
        .ok_or_else(|| AppError::BadRequest("order total is out of range".to_string()))?;
    let mut timeline = OrderTimeline::default();
    timeline.stamp(OrderState::Pendiente, now);

    let order = Order {
        id: Uuid::new_v4(),
        number: state.next_order_number(),
        store_id: store.id,
        customer_id: request.customer_id,
        courier_id: None,
        state: OrderState::Pendiente,
        subtotal: request.subtotal,
        delivery_fee: Some(fee),
        total,
        payment_method: request.payment_method,
        payment_confirmed: false,
        delivery_address: request.delivery_address,
        delivery_location,
        notes: request.notes,
        timeline,
        created_at: now,
    };

    let order = state.repository.insert_order(order).await?;

    info!(order_id = %order.id, number = %order.number, store_id = %store.id, "order placed");
    state.publish(ChangeEvent::OrderChanged {
        order: order.clone(),
    });
    state.notify(Notification::new(
        store.owner_user_id,
        NotificationKind::NewOrder,
        "New order",
        format!("Order {} for ${}", order.number, order.total),
        Some(order.id),
    ));

    Ok(order)
}

/// Moves an order one step along its lifecycle on behalf of `actor`.
pub async fn advance(
    state: &AppState,
    order_id: Uuid,
    actor: Actor,
    target: OrderState,
) -> Result<Order, AppError> {
    let order = state.repository.get_order(order_id).await?;

    if !order.state.can_transition_to(target) {
        return Err(AppError::InvalidTransition {
            from: order.state,
            to: target,
        });
    }

    match target {
        OrderState::EnCamino => {
            return Err(AppError::PermissionDenied(
                "orders go en route only by being claimed".to_string(),
            ));
        }
        OrderState::Entregado => {
            let Actor::Courier(courier_id) = actor else {
                return Err(AppError::PermissionDenied(
                    "only the assigned courier can confirm delivery".to_string(),
                ));
            };
            return confirm_delivery(state, order_id, courier_id)
                .await
                .map(|settlement| settlement.order);
        }
        _ => {}
    }

    if actor != Actor::Store(order.store_id) {
        return Err(AppError::PermissionDenied(format!(
            "only the owning store can move order {} to {}",
            order.number, target
        )));
    }

    let updated = state
        .repository
        .transition_order(order_id, order.state, target, Utc::now())
        .await
        .map_err(|err| transition_error(err, target))?;

    state
        .metrics
        .order_transitions_total
        .with_label_values(&[target.as_str()])
        .inc();
    info!(order_id = %updated.id, from = %order.state, to = %target, "order advanced");

    state.publish(ChangeEvent::OrderChanged {
        order: updated.clone(),
    });
    state.notify(Notification::new(
        updated.customer_id,
        NotificationKind::OrderStateChanged,
        "Order update",
        format!("Your order {} is {}", updated.number, target.label()),
        Some(updated.id),
    ));

    Ok(updated)
}

/// Completes `en_camino -> entregado` for the assigned courier and settles
/// the courier's earnings.
pub async fn confirm_delivery(
    state: &AppState,
    order_id: Uuid,
    courier_id: Uuid,
) -> Result<DeliverySettlement, AppError> {
    let order = state.repository.get_order(order_id).await?;

    if order.state != OrderState::EnCamino {
        return Err(AppError::InvalidTransition {
            from: order.state,
            to: OrderState::Entregado,
        });
    }
    if order.courier_id != Some(courier_id) {
        return Err(AppError::PermissionDenied(format!(
            "order {} is not assigned to courier {}",
            order.number, courier_id
        )));
    }

    let settlement = match state
        .repository
        .complete_delivery(
            order_id,
            courier_id,
            state.settings.default_delivery_fee,
            Utc::now(),
        )
        .await
    {
        Ok(settlement) => settlement,
        Err(RepositoryError::WalletInconsistency(detail)) => {
            error!(
                order_id = %order_id,
                courier_id = %courier_id,
                detail = %detail,
                "delivery aborted: wallet needs manual reconciliation"
            );
            return Err(AppError::WalletInconsistency(detail));
        }
        Err(err) => return Err(transition_error(err, OrderState::Entregado)),
    };

    let amount = settlement.transaction.amount;
    state.metrics.deliveries_total.inc();
    state
        .metrics
        .order_transitions_total
        .with_label_values(&[OrderState::Entregado.as_str()])
        .inc();
    match u64::try_from(amount) {
        Ok(credited) => state.metrics.wallet_credited_total.inc_by(credited),
        Err(_) => warn!(order_id = %order_id, amount, "negative delivery credit"),
    }

    info!(
        order_id = %order_id,
        courier_id = %courier_id,
        amount,
        balance = settlement.wallet.balance,
        "delivery confirmed"
    );

    state.publish(ChangeEvent::OrderChanged {
        order: settlement.order.clone(),
    });
    state.notify(Notification::new(
        settlement.order.customer_id,
        NotificationKind::OrderDelivered,
        "Order delivered",
        format!("Your order {} has been delivered", settlement.order.number),
        Some(order_id),
    ));

    Ok(settlement)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::events::{Notifier, NotifyError};
    use crate::models::courier::Courier;
    use crate::models::store::Store;

    struct BrokenNotifier;

    impl Notifier for BrokenNotifier {
        fn publish(&self, _notification: Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Unavailable("push gateway down".to_string()))
        }
    }

    async fn seeded() -> (AppState, Store, Courier) {
        let state = AppState::new(&Config::default());
        let store = state
            .repository
            .insert_store(Store {
                id: Uuid::new_v4(),
                owner_user_id: Uuid::new_v4(),
                name: "Panaderia Central".to_string(),
                address: "Cra 7 # 12-30".to_string(),
                location: Some("POINT(-74.0721 4.711)".to_string()),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let courier = state
            .repository
            .insert_courier(Courier {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                name: "Andres".to_string(),
                available: true,
                current_location: None,
                last_location_at: None,
                total_deliveries: 0,
                total_earnings: 0,
                rating: 4.8,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        (state, store, courier)
    }

    fn checkout(store: &Store, fee: Option<i64>) -> PlaceOrder {
        PlaceOrder {
            customer_id: Uuid::new_v4(),
            store_id: store.id,
            subtotal: 18_000,
            delivery_fee: fee,
            payment_method: PaymentMethod::Cash,
            delivery_address: "Calle 45 # 10-12".to_string(),
            delivery_location: Some("POINT(-74.06 4.65)".to_string()),
            notes: None,
        }
    }

    async fn ready_order(state: &AppState, store: &Store, fee: Option<i64>) -> Order {
        let order = place_order(state, checkout(store, fee)).await.unwrap();
        let actor = Actor::Store(store.id);
        for next in [
            OrderState::Aceptado,
            OrderState::Preparando,
            OrderState::ListoRecoger,
        ] {
            advance(state, order.id, actor, next).await.unwrap();
        }
        state.repository.get_order(order.id).await.unwrap()
    }

    #[tokio::test]
    async fn checkout_uses_default_fee_and_notifies_store() {
        let (state, store, _) = seeded().await;
        let order = place_order(&state, checkout(&store, None)).await.unwrap();

        assert_eq!(order.state, OrderState::Pendiente);
        assert_eq!(order.delivery_fee, Some(5000));
        assert_eq!(order.total, 23_000);
        assert_eq!(order.number, "PED-1");
        assert!(order.timeline.created_at.is_some());
        assert_eq!(state.inbox.list(store.owner_user_id).len(), 1);
    }

    #[tokio::test]
    async fn checkout_rejects_malformed_location() {
        let (state, store, _) = seeded().await;
        let mut request = checkout(&store, None);
        request.delivery_location = Some("somewhere downtown".to_string());

        let err = place_order(&state, request).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn checkout_rejects_total_out_of_range() {
        let (state, store, _) = seeded().await;
        let mut request = checkout(&store, Some(1));
        request.subtotal = i64::MAX;

        let err = place_order(&state, request).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(state.repository.counts().await.unwrap().orders, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_deliveries_all_reach_the_wallet() {
        use crate::engine::assignment;

        const DELIVERIES: usize = 20;
        const FEE: i64 = 7000;

        let (state, store, courier) = seeded().await;
        let state = Arc::new(state);

        let mut order_ids = Vec::with_capacity(DELIVERIES);
        for _ in 0..DELIVERIES {
            let order = ready_order(&state, &store, Some(FEE)).await;
            assignment::claim(&state, order.id, courier.id).await.unwrap();
            order_ids.push(order.id);
        }

        let mut handles = Vec::with_capacity(DELIVERIES);
        for order_id in order_ids {
            let state = state.clone();
            let courier_id = courier.id;
            handles.push(tokio::spawn(async move {
                confirm_delivery(&state, order_id, courier_id).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let account = state.repository.wallet_for_user(courier.user_id).await.unwrap();
        let expected = FEE * DELIVERIES as i64;
        assert_eq!(account.wallet.balance, expected);
        assert_eq!(account.ledger_sum(), expected);
        assert_eq!(account.transactions.len(), DELIVERIES);
        assert!(account.check_consistency().is_ok());

        let courier = state.repository.get_courier(courier.id).await.unwrap();
        assert_eq!(courier.total_deliveries, DELIVERIES as u64);
        assert_eq!(courier.total_earnings, expected);
    }

    #[tokio::test]
    async fn store_walks_order_to_ready() {
        let (state, store, _) = seeded().await;
        let order = ready_order(&state, &store, None).await;

        assert_eq!(order.state, OrderState::ListoRecoger);
        assert!(order.courier_id.is_none());
        assert!(order.timeline.accepted_at.is_some());
        assert!(order.timeline.preparing_at.is_some());
        assert!(order.timeline.ready_at.is_some());
        assert_eq!(state.inbox.list(order.customer_id).len(), 3);
    }

    #[tokio::test]
    async fn skipping_states_is_rejected() {
        let (state, store, _) = seeded().await;
        let order = place_order(&state, checkout(&store, None)).await.unwrap();

        let err = advance(&state, order.id, Actor::Store(store.id), OrderState::ListoRecoger)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: OrderState::Pendiente,
                to: OrderState::ListoRecoger
            }
        ));

        let err = advance(&state, order.id, Actor::Admin, OrderState::EnCamino)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn other_store_cannot_touch_order() {
        let (state, store, _) = seeded().await;
        let order = place_order(&state, checkout(&store, None)).await.unwrap();

        let err = advance(
            &state,
            order.id,
            Actor::Store(Uuid::new_v4()),
            OrderState::Aceptado,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));

        let err = advance(
            &state,
            order.id,
            Actor::Customer(order.customer_id),
            OrderState::Cancelado,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn ready_orders_cannot_be_moved_en_route_directly() {
        let (state, store, courier) = seeded().await;
        let order = ready_order(&state, &store, None).await;

        let err = advance(&state, order.id, Actor::Courier(courier.id), OrderState::EnCamino)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn cancel_allowed_only_before_preparation() {
        let (state, store, _) = seeded().await;
        let actor = Actor::Store(store.id);

        let order = place_order(&state, checkout(&store, None)).await.unwrap();
        advance(&state, order.id, actor, OrderState::Aceptado)
            .await
            .unwrap();
        let cancelled = advance(&state, order.id, actor, OrderState::Cancelado)
            .await
            .unwrap();
        assert_eq!(cancelled.state, OrderState::Cancelado);
        assert!(cancelled.timeline.cancelled_at.is_some());

        let err = advance(&state, order.id, actor, OrderState::Aceptado)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: OrderState::Cancelado,
                ..
            }
        ));

        let order = place_order(&state, checkout(&store, None)).await.unwrap();
        advance(&state, order.id, actor, OrderState::Aceptado)
            .await
            .unwrap();
        advance(&state, order.id, actor, OrderState::Preparando)
            .await
            .unwrap();
        let err = advance(&state, order.id, actor, OrderState::Cancelado)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn delivery_requires_assigned_courier_and_en_route_state() {
        let (state, store, courier) = seeded().await;
        let order = ready_order(&state, &store, None).await;

        let err = confirm_delivery(&state, order.id, courier.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: OrderState::ListoRecoger,
                to: OrderState::Entregado
            }
        ));

        let wallet = state.repository.wallet_for_user(courier.user_id).await.unwrap();
        assert!(wallet.transactions.is_empty());
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_transition() {
        let (state, store, _) = seeded().await;
        let state = state.with_notifier(Arc::new(BrokenNotifier));

        let order = place_order(&state, checkout(&store, None)).await.unwrap();
        let accepted = advance(&state, order.id, Actor::Store(store.id), OrderState::Aceptado)
            .await
            .unwrap();

        assert_eq!(accepted.state, OrderState::Aceptado);
        assert_eq!(state.metrics.notification_failures_total.get(), 2);
    }
}
