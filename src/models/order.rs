use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Pendiente,
    Aceptado,
    Preparando,
    ListoRecoger,
    EnCamino,
    Entregado,
    Cancelado,
}

impl OrderState {
    pub const ALL: [OrderState; 7] = [
        OrderState::Pendiente,
        OrderState::Aceptado,
        OrderState::Preparando,
        OrderState::ListoRecoger,
        OrderState::EnCamino,
        OrderState::Entregado,
        OrderState::Cancelado,
    ];

    /// States reachable in one step.
    pub fn next_allowed(self) -> &'static [OrderState] {
        match self {
            OrderState::Pendiente => &[OrderState::Aceptado, OrderState::Cancelado],
            OrderState::Aceptado => &[OrderState::Preparando, OrderState::Cancelado],
            OrderState::Preparando => &[OrderState::ListoRecoger],
            OrderState::ListoRecoger => &[OrderState::EnCamino],
            OrderState::EnCamino => &[OrderState::Entregado],
            OrderState::Entregado | OrderState::Cancelado => &[],
        }
    }

    pub fn can_transition_to(self, next: OrderState) -> bool {
        self.next_allowed().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.next_allowed().is_empty()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderState::Pendiente => "pendiente",
            OrderState::Aceptado => "aceptado",
            OrderState::Preparando => "preparando",
            OrderState::ListoRecoger => "listo_recoger",
            OrderState::EnCamino => "en_camino",
            OrderState::Entregado => "entregado",
            OrderState::Cancelado => "cancelado",
        }
    }

    /// Customer-facing label used in notification messages.
    pub fn label(self) -> &'static str {
        match self {
            OrderState::Pendiente => "pending",
            OrderState::Aceptado => "accepted",
            OrderState::Preparando => "being prepared",
            OrderState::ListoRecoger => "ready for pickup",
            OrderState::EnCamino => "on its way",
            OrderState::Entregado => "delivered",
            OrderState::Cancelado => "cancelled",
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Cash,
    Card,
    Transfer,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrderTimeline {
    pub created_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub preparing_at: Option<DateTime<Utc>>,
    pub ready_at: Option<DateTime<Utc>>,
    pub en_route_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl OrderTimeline {
    pub fn stamp(&mut self, state: OrderState, at: DateTime<Utc>) {
        let slot = match state {
            OrderState::Pendiente => &mut self.created_at,
            OrderState::Aceptado => &mut self.accepted_at,
            OrderState::Preparando => &mut self.preparing_at,
            OrderState::ListoRecoger => &mut self.ready_at,
            OrderState::EnCamino => &mut self.en_route_at,
            OrderState::Entregado => &mut self.delivered_at,
            OrderState::Cancelado => &mut self.cancelled_at,
        };
        *slot = Some(at);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub number: String,
    pub store_id: Uuid,
    pub customer_id: Uuid,
    pub courier_id: Option<Uuid>,
    pub state: OrderState,
    pub subtotal: i64,
    /// Final delivery fee paid to the courier; `None` means the default applies.
    pub delivery_fee: Option<i64>,
    pub total: i64,
    pub payment_method: PaymentMethod,
    pub payment_confirmed: bool,
    pub delivery_address: String,
    pub delivery_location: Option<String>,
    pub notes: Option<String>,
    pub timeline: OrderTimeline,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn courier_earnings(&self, default_fee: i64) -> i64 {
        self.delivery_fee.unwrap_or(default_fee)
    }

    /// Moves the order to `next` and stamps the matching timeline slot.
    pub fn apply_state(&mut self, next: OrderState, at: DateTime<Utc>) {
        self.state = next;
        self.timeline.stamp(next, at);
    }
}
