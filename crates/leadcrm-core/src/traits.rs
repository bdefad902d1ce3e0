//! Seams between the scheduler and its collaborators.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{DeliveryError, Result};
use crate::types::{DueMessage, Recipient, ScheduledContact};

/// Wall-clock source. Injected so scans can be driven deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Store operations the background scheduler needs.
///
/// The scheduler is the only writer of the terminal flags, so the mark
/// operations are conditional updates: they return `false` when the record
/// is gone (e.g. its lead was deleted) or was already terminal.
pub trait SchedulerStore: Send + Sync {
    /// Undelivered messages with `scheduled_time <= now`, oldest first.
    fn find_due_messages(&self, now: DateTime<Utc>) -> Result<Vec<DueMessage>>;

    /// Un-notified contacts with `scheduled_time <= now`, oldest first.
    fn find_due_contacts(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledContact>>;

    fn mark_message_delivered(&self, id: i64, at: DateTime<Utc>) -> Result<bool>;

    /// Bump `attempt_count` and keep `reason` as `last_error`. The message
    /// stays pending.
    fn record_delivery_failure(&self, id: i64, reason: &str, at: DateTime<Utc>) -> Result<()>;

    fn mark_contact_notified(&self, id: i64, at: DateTime<Utc>) -> Result<bool>;
}

/// Outbound transport for scheduled messages.
#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Wait until the transport accepts another send. Callers take a turn
    /// before each `attempt_delivery`; the wait is not part of the attempt.
    async fn pace(&self) {}

    /// Try to hand `content` to the transport for `recipient`.
    async fn attempt_delivery(
        &self,
        recipient: &Recipient,
        content: &str,
    ) -> std::result::Result<(), DeliveryError>;

    /// Check credentials / connectivity without sending anything.
    async fn health_check(&self) -> std::result::Result<(), DeliveryError> {
        Ok(())
    }
}

#[async_trait]
impl<G: DeliveryGateway + ?Sized> DeliveryGateway for std::sync::Arc<G> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn pace(&self) {
        (**self).pace().await
    }

    async fn attempt_delivery(
        &self,
        recipient: &Recipient,
        content: &str,
    ) -> std::result::Result<(), DeliveryError> {
        (**self).attempt_delivery(recipient, content).await
    }

    async fn health_check(&self) -> std::result::Result<(), DeliveryError> {
        (**self).health_check().await
    }
}
