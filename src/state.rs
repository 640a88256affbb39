use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tracing::warn;

use crate::config::Config;
use crate::events::{ChangeEvent, FeedNotifier, NotificationInbox, Notifier};
use crate::models::notification::Notification;
use crate::observability::metrics::Metrics;
use crate::persistence::DeliveryRepository;
use crate::persistence::memory::InMemoryRepository;

/// Business settings the engine reads on every request.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub default_delivery_fee: i64,
    pub location_stale_secs: i64,
}

pub struct AppState {
    pub repository: Arc<dyn DeliveryRepository>,
    pub notifier: Arc<dyn Notifier>,
    pub inbox: Arc<NotificationInbox>,
    pub events_tx: broadcast::Sender<ChangeEvent>,
    pub metrics: Metrics,
    pub settings: Settings,
    order_seq: AtomicU64,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self::with_repository(Arc::new(InMemoryRepository::new()), config)
    }

    pub fn with_repository(repository: Arc<dyn DeliveryRepository>, config: &Config) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(config.event_buffer_size);
        let inbox = Arc::new(NotificationInbox::with_capacity(config.inbox_capacity));
        let notifier: Arc<dyn Notifier> =
            Arc::new(FeedNotifier::new(inbox.clone(), events_tx.clone()));

        Self {
            repository,
            notifier,
            inbox,
            events_tx,
            metrics: Metrics::new(),
            settings: Settings {
                default_delivery_fee: config.default_delivery_fee,
                location_stale_secs: config.location_stale_secs,
            },
            order_seq: AtomicU64::new(1),
        }
    }

    /// Replaces the outbound notification channel.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn next_order_number(&self) -> String {
        let n = self.order_seq.fetch_add(1, Ordering::SeqCst);
        format!("PED-{n}")
    }

    /// Broadcasts a change; having no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Fire-and-forget: failures are logged and counted, never returned.
    pub fn notify(&self, notification: Notification) {
        let kind = notification.kind;
        let user_id = notification.user_id;

        if let Err(err) = self.notifier.publish(notification) {
            self.metrics.notification_failures_total.inc();
            warn!(error = %err, user_id = %user_id, kind = ?kind, "notification not delivered");
        }
    }
}
