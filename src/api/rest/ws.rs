use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::events::{ChangeEvent, Topic};
use crate::state::AppState;

/// Narrows the change feed. Notifications are only delivered to a
/// subscriber that names their recipient in `user_id`.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct Subscription {
    pub topic: Option<Topic>,
    pub user_id: Option<Uuid>,
}

impl Subscription {
    pub fn wants(&self, event: &ChangeEvent) -> bool {
        if self.topic.is_some_and(|topic| topic != event.topic()) {
            return false;
        }
        match self.user_id {
            Some(user_id) => event.visible_to(user_id),
            None => event.topic() != Topic::Notifications,
        }
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(subscription): Query<Subscription>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, subscription))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, subscription: Subscription) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(state.events_tx.subscribe());

    info!(
        topic = ?subscription.topic,
        user_id = ?subscription.user_id,
        "websocket client connected"
    );

    let send_task = tokio::spawn(async move {
        while let Some(next) = events.next().await {
            let event = match next {
                Ok(event) => event,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket subscriber lagging, events dropped");
                    continue;
                }
            };
            if !subscription.wants(&event) {
                continue;
            }

            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize change event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("websocket client disconnected");
}
