use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::notification::Notification;
use crate::observability::metrics::Metrics;

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), AppError>;
}

/// Publishes notifications to in-process subscribers (the `/ws` feed).
#[derive(Clone)]
pub struct BroadcastDispatcher {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastDispatcher {
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _unused_rx) = broadcast::channel(buffer_size);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationDispatcher for BroadcastDispatcher {
    async fn notify(&self, notification: Notification) -> Result<(), AppError> {
        // No subscribers is not a failure; nobody is listening yet.
        if self.tx.send(notification).is_err() {
            debug!("notification dropped: no subscribers");
        }
        Ok(())
    }
}

/// Hands notifications to a dispatcher off the caller's path. Failures and
/// timeouts are logged and counted, never returned.
#[derive(Clone)]
pub struct Notifier {
    dispatcher: Arc<dyn NotificationDispatcher>,
    timeout: Duration,
    metrics: Metrics,
}

impl Notifier {
    pub fn new(dispatcher: Arc<dyn NotificationDispatcher>, timeout: Duration, metrics: Metrics) -> Self {
        Self {
            dispatcher,
            timeout,
            metrics,
        }
    }

    pub fn emit(&self, notification: Notification) {
        let dispatcher = self.dispatcher.clone();
        let timeout = self.timeout;
        let metrics = self.metrics.clone();
        let channel = notification.channel.as_str();

        tokio::spawn(async move {
            let failure = match tokio::time::timeout(timeout, dispatcher.notify(notification)).await {
                Ok(Ok(())) => return,
                Ok(Err(err)) => err.to_string(),
                Err(_) => format!("timed out after {}ms", timeout.as_millis()),
            };

            metrics
                .notifications_failed_total
                .with_label_values(&[channel])
                .inc();
            warn!(channel, error = %failure, "notification not delivered");
        });
    }

    pub fn emit_all(&self, notifications: impl IntoIterator<Item = Notification>) {
        for notification in notifications {
            self.emit(notification);
        }
    }
}
