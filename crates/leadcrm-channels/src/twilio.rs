//! Twilio WhatsApp sender.

use async_trait::async_trait;
use leadcrm_core::config::TwilioConfig;
use leadcrm_core::error::DeliveryError;
use leadcrm_core::traits::DeliveryGateway;
use leadcrm_core::types::Recipient;

use crate::phone::normalize_phone;

/// Sends through Twilio's Messages resource with `whatsapp:` addresses.
pub struct TwilioGateway {
    config: TwilioConfig,
    country_code: String,
    client: reqwest::Client,
}

impl TwilioGateway {
    pub fn new(config: TwilioConfig, country_code: impl Into<String>) -> Self {
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

    fn account_url(&self) -> String {
        format!(
            "{}/Accounts/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.account_sid
        )
    }

    fn ensure_configured(&self) -> Result<(), DeliveryError> {
        if self.config.account_sid.is_empty()
            || self.config.auth_token.is_empty()
            || self.config.from_number.is_empty()
        {
            return Err(DeliveryError::NotConfigured(
                "Twilio account_sid, auth_token and from_number".into(),
            ));
        }
        Ok(())
    }
}

fn whatsapp_address(number: &str) -> String {
    let trimmed = number.trim();
    let trimmed = trimmed.strip_prefix("whatsapp:").unwrap_or(trimmed);
    if trimmed.starts_with('+') {
        format!("whatsapp:{trimmed}")
    } else {
        format!("whatsapp:+{trimmed}")
    }
}

#[async_trait]
impl DeliveryGateway for TwilioGateway {
    fn name(&self) -> &str {
        "twilio"
    }

    async fn attempt_delivery(&self, recipient: &Recipient, content: &str) -> Result<(), DeliveryError> {
        self.ensure_configured()?;
        let phone = recipient
            .phone
            .as_deref()
            .ok_or_else(|| DeliveryError::InvalidRecipient("no phone number".into()))?;
        let to = whatsapp_address(&normalize_phone(phone, &self.country_code)?);
        let from = whatsapp_address(&self.config.from_number);

        let response = self
            .client
            .post(format!("{}/Messages.json", self.account_url()))
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[("From", from.as_str()), ("To", to.as_str()), ("Body", content)])
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(format!("Twilio request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected { status: status.as_u16(), body });
        }

        let result: serde_json::Value = response.json().await.unwrap_or_default();
        tracing::debug!(
            "Twilio message {} queued → {}",
            result["sid"].as_str().unwrap_or("unknown"),
            to
        );
        Ok(())
    }

    async fn health_check(&self) -> Result<(), DeliveryError> {
        self.ensure_configured()?;
        let response = self
            .client
            .get(format!("{}.json", self.account_url()))
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(format!("Twilio account check failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            tracing::info!("Twilio: account {} reachable", self.config.account_sid);
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(DeliveryError::Rejected { status: status.as_u16(), body })
        }
    }
}
