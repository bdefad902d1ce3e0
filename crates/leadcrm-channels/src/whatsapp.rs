//! WhatsApp Business Cloud API transport.
//!
//! Requires an access token and a Phone Number ID from Meta Business Suite.

use async_trait::async_trait;
use leadcrm_core::config::WhatsAppConfig;
use leadcrm_core::error::DeliveryError;
use leadcrm_core::traits::DeliveryGateway;
use leadcrm_core::types::Recipient;

use crate::phone::normalize_phone;

/// Sends scheduled messages as WhatsApp text messages.
pub struct WhatsAppGateway {
    config: WhatsAppConfig,
    country_code: String,
    client: reqwest::Client,
}

impl WhatsAppGateway {
    pub fn new(config: WhatsAppConfig, country_code: impl Into<String>) -> Self {
        Self {
            config,
            country_code: country_code.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Use a preconfigured HTTP client (proxy, timeouts, TLS roots).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn ensure_configured(&self) -> Result<(), DeliveryError> {
        if self.config.access_token.is_empty() {
            return Err(DeliveryError::NotConfigured("WhatsApp access_token".into()));
        }
        if self.config.phone_number_id.is_empty() {
            return Err(DeliveryError::NotConfigured("WhatsApp phone_number_id".into()));
        }
        Ok(())
    }

    /// Send a text message via the Cloud API. Returns the provider message id.
    async fn send_text_message(&self, to: &str, text: &str) -> Result<String, DeliveryError> {
        let url = format!(
            "{}/{}/messages",
            self.config.api_base.trim_end_matches('/'),
            self.config.phone_number_id
        );

        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": {
                "preview_url": false,
                "body": text
            }
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(format!("WhatsApp API request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected { status: status.as_u16(), body });
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DeliveryError::Transport(format!("Invalid WhatsApp response: {e}")))?;

        let msg_id = result["messages"][0]["id"]
            .as_str()
            .unwrap_or("unknown")
            .to_string();

        tracing::debug!("WhatsApp message sent: {} → {}", msg_id, to);
        Ok(msg_id)
    }
}

#[async_trait]
impl DeliveryGateway for WhatsAppGateway {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn attempt_delivery(&self, recipient: &Recipient, content: &str) -> Result<(), DeliveryError> {
        self.ensure_configured()?;
        let phone = recipient
            .phone
            .as_deref()
            .ok_or_else(|| DeliveryError::InvalidRecipient("no phone number".into()))?;
        let to = normalize_phone(phone, &self.country_code)?;
        self.send_text_message(&to, content).await?;
        Ok(())
    }

    /// Verify the token by reading the sender's phone number record.
    async fn health_check(&self) -> Result<(), DeliveryError> {
        self.ensure_configured()?;
        let url = format!(
            "{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.phone_number_id
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(format!("WhatsApp verification failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            tracing::info!("WhatsApp Business: reachable (phone_id={})", self.config.phone_number_id);
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(DeliveryError::Rejected { status: status.as_u16(), body })
        }
    }
}
