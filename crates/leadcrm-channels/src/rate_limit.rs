//! Minimum spacing between consecutive sends on a real transport.

use std::time::Duration;

use async_trait::async_trait;
use leadcrm_core::error::DeliveryError;
use leadcrm_core::traits::DeliveryGateway;
use leadcrm_core::types::Recipient;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Wraps a gateway so that two sends start at least `min_interval` apart.
/// The spacing is enforced in [`DeliveryGateway::pace`]; turns are handed
/// out in arrival order.
pub struct RateLimitedGateway<G> {
    inner: G,
    min_interval: Duration,
    last_send: Mutex<Option<Instant>>,
}

impl<G: DeliveryGateway> RateLimitedGateway<G> {
    pub fn new(inner: G, min_interval: Duration) -> Self {
        Self { inner, min_interval, last_send: Mutex::new(None) }
    }
}

#[async_trait]
impl<G: DeliveryGateway> DeliveryGateway for RateLimitedGateway<G> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn pace(&self) {
        let mut last = self.last_send.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_interval;
            if ready_at > Instant::now() {
                tracing::debug!("⏳ {}: pacing send for {:?}", self.inner.name(), ready_at - Instant::now());
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
        self.inner.pace().await
    }

    async fn attempt_delivery(&self, recipient: &Recipient, content: &str) -> Result<(), DeliveryError> {
        self.inner.attempt_delivery(recipient, content).await
    }

    async fn health_check(&self) -> Result<(), DeliveryError> {
        self.inner.health_check().await
    }
}
