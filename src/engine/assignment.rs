use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::events::ChangeEvent;
use crate::geo::{self, MapMarker};
use crate::models::notification::{Notification, NotificationKind};
use crate::models::order::{Order, OrderState};
use crate::persistence::{ClaimOutcome, OrderFilter};
use crate::state::AppState;

/// A ready, unassigned order as shown to couriers.
#[derive(Debug, Clone, Serialize)]
pub struct AvailableOrder {
    pub order: Order,
    pub store_name: Option<String>,
    pub store_address: Option<String>,
    pub distance_km: Option<f64>,
    pub eta_minutes: Option<u32>,
    pub distance_label: Option<String>,
    pub eta_label: Option<String>,
    pub earnings: i64,
    pub markers: Vec<MapMarker>,
}

/// Orders in `listo_recoger` without a courier, newest first.
pub async fn list_available(state: &AppState) -> Result<Vec<AvailableOrder>, AppError> {
    let filter = OrderFilter {
        state: Some(OrderState::ListoRecoger),
        unassigned_only: true,
        ..OrderFilter::default()
    };
    let orders = state.repository.list_orders(&filter).await?;

    let mut available = Vec::with_capacity(orders.len());
    for order in orders {
        let store = match state.repository.get_store(order.store_id).await {
            Ok(store) => Some(store),
            Err(err) => {
                warn!(order_id = %order.id, error = %err, "store lookup failed for listing");
                None
            }
        };
        let store_location = store.as_ref().and_then(|s| s.location.as_deref());
        let estimate = geo::route_estimate(store_location, order.delivery_location.as_deref());

        let mut markers = Vec::with_capacity(2);
        if let (Some(store), Some(point)) = (&store, geo::parse_optional(store_location)) {
            markers.push(MapMarker::new(
                format!("pickup-{}", order.id),
                point,
                format!("Pickup: {}", store.name),
            ));
        }
        if let Some(point) = geo::parse_optional(order.delivery_location.as_deref()) {
            markers.push(MapMarker::new(
                format!("dropoff-{}", order.id),
                point,
                format!("Deliver: {}", order.delivery_address),
            ));
        }

        available.push(AvailableOrder {
            earnings: order.courier_earnings(state.settings.default_delivery_fee),
            store_name: store.as_ref().map(|s| s.name.clone()),
            store_address: store.map(|s| s.address),
            distance_km: estimate.map(|e| e.distance_km),
            eta_minutes: estimate.map(|e| e.eta_minutes),
            distance_label: estimate.map(|e| geo::format_distance(e.distance_km)),
            eta_label: estimate.map(|e| geo::format_duration(e.eta_minutes)),
            markers,
            order,
        });
    }

    Ok(available)
}

/// First-writer-wins claim of a ready order.
///
/// Exactly one of any number of concurrent callers gets the order; the rest
/// see `AlreadyClaimed` and nothing is written on their behalf.
pub async fn claim(state: &AppState, order_id: Uuid, courier_id: Uuid) -> Result<Order, AppError> {
    state.repository.get_courier(courier_id).await?;

    let start = Instant::now();
    let outcome = state
        .repository
        .claim_order(order_id, courier_id, Utc::now())
        .await?;
    let elapsed = start.elapsed().as_secs_f64();

    let current = match outcome {
        ClaimOutcome::Claimed(order) => {
            record(state, "won", elapsed);
            state
                .metrics
                .order_transitions_total
                .with_label_values(&[OrderState::EnCamino.as_str()])
                .inc();
            info!(order_id = %order.id, courier_id = %courier_id, "order claimed");
            announce_claim(state, &order).await;
            return Ok(order);
        }
        ClaimOutcome::Unavailable(current) => current,
    };

    if current.courier_id == Some(courier_id) || current.courier_id.is_none() {
        // Already ours, or not (yet) claimable at all.
        record(state, "rejected", elapsed);
        return Err(AppError::InvalidTransition {
            from: current.state,
            to: OrderState::EnCamino,
        });
    }

    record(state, "already_claimed", elapsed);
    info!(order_id = %order_id, courier_id = %courier_id, "claim lost to another courier");
    Err(AppError::AlreadyClaimed)
}

fn record(state: &AppState, outcome: &str, elapsed: f64) {
    state
        .metrics
        .claim_latency_seconds
        .with_label_values(&[outcome])
        .observe(elapsed);
    state
        .metrics
        .claims_total
        .with_label_values(&[outcome])
        .inc();
}

async fn announce_claim(state: &AppState, order: &Order) {
    state.publish(ChangeEvent::OrderChanged {
        order: order.clone(),
    });

    state.notify(Notification::new(
        order.customer_id,
        NotificationKind::OrderEnRoute,
        "Courier on the way",
        format!("Your order {} is on its way", order.number),
        Some(order.id),
    ));

    match state.repository.get_store(order.store_id).await {
        Ok(store) => state.notify(Notification::new(
            store.owner_user_id,
            NotificationKind::OrderAssigned,
            "Order assigned",
            format!("Order {} was assigned to a courier", order.number),
            Some(order.id),
        )),
        Err(err) => warn!(order_id = %order.id, error = %err, "store not notified of assignment"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::engine::lifecycle::{PlaceOrder, advance, confirm_delivery, place_order};
    use crate::models::actor::Actor;
    use crate::models::courier::Courier;
    use crate::models::order::PaymentMethod;
    use crate::models::store::Store;

    async fn store(state: &AppState, location: Option<&str>) -> Store {
        state
            .repository
            .insert_store(Store {
                id: Uuid::new_v4(),
                owner_user_id: Uuid::new_v4(),
                name: "Tienda Don Jose".to_string(),
                address: "Calle 5 # 3-21".to_string(),
                location: location.map(str::to_string),
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    async fn courier(state: &AppState) -> Courier {
        state
            .repository
            .insert_courier(Courier {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                name: "Luisa".to_string(),
                available: true,
                current_location: None,
                last_location_at: None,
                total_deliveries: 0,
                total_earnings: 0,
                rating: 4.5,
                created_at: Utc::now(),
            })
            .await
            .unwrap()
    }

    async fn order_in_state(
        state: &AppState,
        store: &Store,
        fee: Option<i64>,
        target: OrderState,
    ) -> Order {
        let mut current = place_order(
            state,
            PlaceOrder {
                customer_id: Uuid::new_v4(),
                store_id: store.id,
                subtotal: 12_000,
                delivery_fee: fee,
                payment_method: PaymentMethod::Card,
                delivery_address: "Carrera 15 # 80-20".to_string(),
                delivery_location: Some("POINT(-74.0721 4.9807)".to_string()),
                notes: None,
            },
        )
        .await
        .unwrap();

        for next in [
            OrderState::Aceptado,
            OrderState::Preparando,
            OrderState::ListoRecoger,
        ] {
            if current.state == target {
                break;
            }
            current = advance(state, current.id, Actor::Store(store.id), next)
                .await
                .unwrap();
        }
        current
    }

    #[tokio::test]
    async fn listing_annotates_distance_and_eta() {
        let state = AppState::new(&Config::default());
        let shop = store(&state, Some("POINT(-74.0721 4.711)")).await;
        let ready = order_in_state(&state, &shop, Some(7000), OrderState::ListoRecoger).await;
        order_in_state(&state, &shop, None, OrderState::Preparando).await;

        let listing = list_available(&state).await.unwrap();
        assert_eq!(listing.len(), 1);

        let entry = &listing[0];
        assert_eq!(entry.order.id, ready.id);
        assert_eq!(entry.earnings, 7000);
        assert_eq!(entry.store_name.as_deref(), Some("Tienda Don Jose"));
        // 0.2697 degrees of latitude is just under 30 km.
        let km = entry.distance_km.unwrap();
        assert!((km - 30.0).abs() < 0.1, "{km}");
        assert_eq!(entry.eta_minutes, Some(60));
        assert_eq!(entry.markers.len(), 2);
    }

    #[tokio::test]
    async fn listing_survives_unparseable_store_location() {
        let state = AppState::new(&Config::default());
        let shop = store(&state, Some("not a point")).await;
        order_in_state(&state, &shop, None, OrderState::ListoRecoger).await;

        let listing = list_available(&state).await.unwrap();
        assert_eq!(listing.len(), 1);
        assert!(listing[0].distance_km.is_none());
        assert!(listing[0].eta_minutes.is_none());
        assert_eq!(listing[0].earnings, 5000);
        assert_eq!(listing[0].markers.len(), 1);
    }

    #[tokio::test]
    async fn two_couriers_one_winner() {
        let state = AppState::new(&Config::default());
        let shop = store(&state, None).await;
        let c1 = courier(&state).await;
        let c2 = courier(&state).await;
        let order = order_in_state(&state, &shop, None, OrderState::ListoRecoger).await;

        let won = claim(&state, order.id, c1.id).await.unwrap();
        assert_eq!(won.courier_id, Some(c1.id));
        assert_eq!(won.state, OrderState::EnCamino);
        assert!(won.timeline.en_route_at.is_some());

        let lost = claim(&state, order.id, c2.id).await.unwrap_err();
        assert!(matches!(lost, AppError::AlreadyClaimed));

        let stored = state.repository.get_order(order.id).await.unwrap();
        assert_eq!(stored.courier_id, Some(c1.id));
        assert!(list_available(&state).await.unwrap().is_empty());
        assert_eq!(state.inbox.list(shop.owner_user_id).len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_have_exactly_one_winner() {
        let state = Arc::new(AppState::new(&Config::default()));
        let shop = store(&state, None).await;
        let order = order_in_state(&state, &shop, None, OrderState::ListoRecoger).await;

        let mut couriers = Vec::new();
        for _ in 0..16 {
            couriers.push(courier(&state).await);
        }

        let order_id = order.id;
        let handles: Vec<_> = couriers
            .iter()
            .map(|c| {
                let state = state.clone();
                let courier_id = c.id;
                tokio::spawn(async move { claim(&state, order_id, courier_id).await })
            })
            .collect();

        let mut winners = 0;
        let mut losers = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(AppError::AlreadyClaimed) => losers += 1,
                Err(other) => panic!("unexpected claim error: {other}"),
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(losers, 15);
        assert_eq!(
            state
                .metrics
                .order_transitions_total
                .with_label_values(&["en_camino"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn reclaiming_own_order_has_no_side_effect() {
        let state = AppState::new(&Config::default());
        let shop = store(&state, None).await;
        let c = courier(&state).await;
        let order = order_in_state(&state, &shop, None, OrderState::ListoRecoger).await;

        let first = claim(&state, order.id, c.id).await.unwrap();
        let err = claim(&state, order.id, c.id).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: OrderState::EnCamino,
                to: OrderState::EnCamino
            }
        ));

        let stored = state.repository.get_order(order.id).await.unwrap();
        assert_eq!(stored.timeline.en_route_at, first.timeline.en_route_at);
    }

    #[tokio::test]
    async fn unready_order_cannot_be_claimed() {
        let state = AppState::new(&Config::default());
        let shop = store(&state, None).await;
        let c = courier(&state).await;
        let order = order_in_state(&state, &shop, None, OrderState::Pendiente).await;

        let err = claim(&state, order.id, c.id).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: OrderState::Pendiente,
                to: OrderState::EnCamino
            }
        ));
    }

    #[tokio::test]
    async fn unknown_courier_is_not_found() {
        let state = AppState::new(&Config::default());
        let shop = store(&state, None).await;
        let order = order_in_state(&state, &shop, None, OrderState::ListoRecoger).await;

        let err = claim(&state, order.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn delivery_credits_exact_fee() {
        let state = AppState::new(&Config::default());
        let shop = store(&state, None).await;
        let c = courier(&state).await;
        let order = order_in_state(&state, &shop, Some(7000), OrderState::ListoRecoger).await;

        claim(&state, order.id, c.id).await.unwrap();
        let settlement = confirm_delivery(&state, order.id, c.id).await.unwrap();

        assert_eq!(settlement.order.state, OrderState::Entregado);
        assert!(settlement.order.payment_confirmed);
        assert_eq!(settlement.wallet.available_balance, 7000);
        assert_eq!(settlement.transaction.amount, 7000);
        assert_eq!(settlement.courier.total_deliveries, 1);

        let again = confirm_delivery(&state, order.id, c.id).await.unwrap_err();
        assert!(matches!(again, AppError::InvalidTransition { .. }));

        let account = state.repository.wallet_for_user(c.user_id).await.unwrap();
        assert_eq!(account.transactions.len(), 1);
        assert_eq!(account.wallet.balance, account.ledger_sum());

        let err = advance(&state, order.id, Actor::Store(shop.id), OrderState::Cancelado)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn store_cannot_cancel_en_route_order() {
        let state = AppState::new(&Config::default());
        let shop = store(&state, None).await;
        let c = courier(&state).await;
        let order = order_in_state(&state, &shop, None, OrderState::ListoRecoger).await;
        claim(&state, order.id, c.id).await.unwrap();

        let err = advance(&state, order.id, Actor::Store(shop.id), OrderState::Cancelado)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: OrderState::EnCamino,
                to: OrderState::Cancelado
            }
        ));
        let stored = state.repository.get_order(order.id).await.unwrap();
        assert_eq!(stored.state, OrderState::EnCamino);
    }
}
