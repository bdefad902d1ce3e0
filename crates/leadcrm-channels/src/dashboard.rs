//! In-process transport: a due message becomes "ready" on the dashboard and
//! nothing leaves the machine.

use async_trait::async_trait;
use leadcrm_core::error::DeliveryError;
use leadcrm_core::traits::DeliveryGateway;
use leadcrm_core::types::Recipient;

/// Always accepts. Marking a message delivered means it is ready for the
/// user to send by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct DashboardGateway;

#[async_trait]
impl DeliveryGateway for DashboardGateway {
    fn name(&self) -> &str {
        "dashboard"
    }

    async fn attempt_delivery(&self, recipient: &Recipient, content: &str) -> Result<(), DeliveryError> {
        tracing::debug!(
            "📋 Message ready for {} ({} chars)",
            recipient.name.as_deref().unwrap_or("unknown recipient"),
            content.chars().count()
        );
        Ok(())
    }
}
