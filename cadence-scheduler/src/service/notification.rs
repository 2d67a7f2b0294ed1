//! Notification service
//!
//! Job status events are published on the `job-notifications` bus topic.
//! When that channel is unavailable the event is emitted synchronously to a
//! fallback [`NotificationSink`] and the delivery is reported as failed.
//! Delivery outcome never affects the job transition that produced it.

use cadence_core::bus::{MessageBus, Subscription, publish_message};
use cadence_core::domain::job::NotificationDeliveryStatus;
use cadence_core::domain::notification::{Notification, Severity};
use cadence_core::dto::message::JOB_NOTIFICATIONS_TOPIC;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Number of notifications kept by [`BufferedNotificationSink`] by default
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// Fire-and-forget receiver of notifications
pub trait NotificationSink: Send + Sync {
    fn emit(&self, notification: &Notification);
}

/// Sink writing notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn emit(&self, n: &Notification) {
        match n.severity {
            Severity::Error => error!(job_id = %n.job_id, job = %n.job_name, "{}", n.message),
            Severity::Warning => warn!(job_id = %n.job_id, job = %n.job_name, "{}", n.message),
            Severity::Info | Severity::Success => {
                info!(job_id = %n.job_id, job = %n.job_name, "{}", n.message)
            }
        }
    }
}

/// Sink keeping the most recent notifications in memory
pub struct BufferedNotificationSink {
    capacity: usize,
    entries: Mutex<VecDeque<Notification>>,
}

impl BufferedNotificationSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Buffered notifications, oldest first
    pub fn recent(&self) -> Vec<Notification> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BufferedNotificationSink {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl NotificationSink for BufferedNotificationSink {
    fn emit(&self, notification: &Notification) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(notification.clone());
    }
}

/// Publishes notifications with a synchronous fallback
pub struct Notifier {
    bus: Arc<dyn MessageBus>,
    fallback: Arc<dyn NotificationSink>,
}

impl Notifier {
    pub fn new(bus: Arc<dyn MessageBus>, fallback: Arc<dyn NotificationSink>) -> Self {
        Self { bus, fallback }
    }

    /// Delivers `notification`, returning how the primary channel fared
    pub async fn notify(&self, notification: &Notification) -> NotificationDeliveryStatus {
        let key = notification.job_id.to_string();

        match publish_message(
            self.bus.as_ref(),
            JOB_NOTIFICATIONS_TOPIC,
            &key,
            notification,
        )
        .await
        {
            Ok(()) => {
                debug!(job_id = %notification.job_id, "Notification published");
                NotificationDeliveryStatus::Success
            }
            Err(e) => {
                warn!(
                    job_id = %notification.job_id,
                    "Notification channel unavailable, using fallback: {}", e
                );
                self.fallback.emit(notification);
                NotificationDeliveryStatus::Failed
            }
        }
    }
}

/// Forwards notifications from the bus to `sink` until shutdown
pub async fn forward_notifications(
    mut subscription: Subscription,
    sink: Arc<dyn NotificationSink>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let envelope = tokio::select! {
            envelope = subscription.recv() => envelope,
            _ = shutdown.changed() => break,
        };

        let Some(envelope) = envelope else {
            break;
        };

        match envelope.decode::<Notification>() {
            Ok(notification) => sink.emit(&notification),
            Err(e) => warn!("Discarding malformed notification: {}", e),
        }
    }

    debug!("Notification forwarder stopped");
}
