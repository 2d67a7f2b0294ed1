//! Service layer
//!
//! Job lifecycle operations, result reconciliation, notifications and
//! retention.

pub mod job;
pub mod notification;
pub mod reconciler;
pub mod retention;

pub use job::JobService;
pub use notification::{
    BufferedNotificationSink, LogNotificationSink, NotificationSink, Notifier,
    forward_notifications,
};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use retention::RetentionSweep;
