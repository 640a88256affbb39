use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::courier::GeoPoint;
use crate::models::notification::Notification;
use crate::models::order::Order;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Orders,
    Couriers,
    Notifications,
}

/// Row-level change pushed to realtime subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    OrderChanged {
        order: Order,
    },
    CourierLocation {
        courier_id: Uuid,
        location: GeoPoint,
        at: DateTime<Utc>,
    },
    Notification {
        notification: Notification,
    },
}

impl ChangeEvent {
    pub fn topic(&self) -> Topic {
        match self {
            ChangeEvent::OrderChanged { .. } => Topic::Orders,
            ChangeEvent::CourierLocation { .. } => Topic::Couriers,
            ChangeEvent::Notification { .. } => Topic::Notifications,
        }
    }

    /// Whether a subscriber scoped to `user_id` should see this event.
    /// Only notifications are addressed to a single user.
    pub fn visible_to(&self, user_id: Uuid) -> bool {
        match self {
            ChangeEvent::Notification { notification } => notification.user_id == user_id,
            _ => true,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
}

/// Outbound notification capability. Must not block the caller.
pub trait Notifier: Send + Sync {
    fn publish(&self, notification: Notification) -> Result<(), NotifyError>;
}

const DEFAULT_INBOX_CAPACITY: usize = 200;

/// Per-user notification history backing the notification bell.
/// Keeps at most `capacity` notifications per user, dropping the oldest.
pub struct NotificationInbox {
    by_user: DashMap<Uuid, Vec<Notification>>,
    capacity: usize,
}

impl Default for NotificationInbox {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_INBOX_CAPACITY)
    }
}

impl NotificationInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            by_user: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, notification: Notification) {
        let mut items = self.by_user.entry(notification.user_id).or_default();
        items.push(notification);
        if items.len() > self.capacity {
            let excess = items.len() - self.capacity;
            items.drain(..excess);
        }
    }

    /// Newest first.
    pub fn list(&self, user_id: Uuid) -> Vec<Notification> {
        let mut items = self
            .by_user
            .get(&user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        items.reverse();
        items
    }

    pub fn unread_count(&self, user_id: Uuid) -> usize {
        self.by_user
            .get(&user_id)
            .map(|entry| entry.iter().filter(|n| !n.read).count())
            .unwrap_or(0)
    }

    pub fn mark_read(&self, user_id: Uuid, notification_id: Uuid) -> Option<Notification> {
        let mut items = self.by_user.get_mut(&user_id)?;
        let item = items.iter_mut().find(|n| n.id == notification_id)?;
        item.read = true;
        Some(item.clone())
    }
}

/// Stores notifications in the inbox and fans them out on the change feed.
pub struct FeedNotifier {
    inbox: Arc<NotificationInbox>,
    events_tx: broadcast::Sender<ChangeEvent>,
}

impl FeedNotifier {
    pub fn new(
        inbox: Arc<NotificationInbox>,
        events_tx: broadcast::Sender<ChangeEvent>,
    ) -> Self {
        Self { inbox, events_tx }
    }
}

impl Notifier for FeedNotifier {
    fn publish(&self, notification: Notification) -> Result<(), NotifyError> {
        self.inbox.push(notification.clone());
        // No live subscribers is fine; the inbox keeps the record.
        let _ = self
            .events_tx
            .send(ChangeEvent::Notification { notification });
        Ok(())
    }
}
