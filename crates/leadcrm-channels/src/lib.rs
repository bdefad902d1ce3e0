//! # LeadCRM Channels
//! Outbound transports for scheduled messages.
//!
//! `dashboard` keeps everything in-process; `whatsapp` and `twilio` talk to
//! the providers' HTTP APIs and are paced by [`RateLimitedGateway`].

pub mod dashboard;
pub mod phone;
pub mod rate_limit;
pub mod twilio;
pub mod whatsapp;

use std::sync::Arc;
use std::time::Duration;

use leadcrm_core::config::{DeliveryConfig, Transport};
use leadcrm_core::error::{CrmError, Result};
use leadcrm_core::traits::DeliveryGateway;

pub use dashboard::DashboardGateway;
pub use phone::normalize_phone;
pub use rate_limit::RateLimitedGateway;
pub use twilio::TwilioGateway;
pub use whatsapp::WhatsAppGateway;

/// Build the gateway selected by `[delivery] transport`.
pub fn gateway_from_config(config: &DeliveryConfig) -> Result<Arc<dyn DeliveryGateway>> {
    let pacing = Duration::from_millis(config.min_interval_ms);
    let gateway: Arc<dyn DeliveryGateway> = match config.transport {
        Transport::Dashboard => Arc::new(DashboardGateway),
        Transport::WhatsApp => {
            let wa = config
                .whatsapp
                .clone()
                .ok_or_else(|| CrmError::Config("missing [delivery.whatsapp] section".into()))?;
            Arc::new(RateLimitedGateway::new(
                WhatsAppGateway::new(wa, config.default_country_code.clone()),
                pacing,
            ))
        }
        Transport::Twilio => {
            let tw = config
                .twilio
                .clone()
                .ok_or_else(|| CrmError::Config("missing [delivery.twilio] section".into()))?;
            Arc::new(RateLimitedGateway::new(
                TwilioGateway::new(tw, config.default_country_code.clone()),
                pacing,
            ))
        }
    };
    tracing::info!("📡 Delivery transport: {}", gateway.name());
    Ok(gateway)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! One-shot HTTP responder for exercising the provider clients.

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    pub struct FakeServer {
        addr: std::net::SocketAddr,
        request: oneshot::Receiver<String>,
    }

    impl FakeServer {
        /// Answer the first request with `status` and a JSON `body`.
        pub async fn start(status: u16, body: &'static str) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let (tx, rx) = oneshot::channel();

            tokio::spawn(async move {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if request_complete(&buf) {
                        break;
                    }
                }
                let response = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
                tx.send(String::from_utf8_lossy(&buf).into_owned()).ok();
            });

            Self { addr, request: rx }
        }

        pub fn base_url(&self) -> String {
            format!("http://{}", self.addr)
        }

        /// The raw request the server received.
        pub async fn request(self) -> String {
            self.request.await.unwrap()
        }
    }

    fn request_complete(buf: &[u8]) -> bool {
        let text = String::from_utf8_lossy(buf);
        let Some(head_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..head_end]
            .lines()
            .filter_map(|l| l.split_once(':'))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        buf.len() >= head_end + 4 + content_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadcrm_core::config::WhatsAppConfig;

    #[test]
    fn test_gateway_from_config() {
        let mut config = DeliveryConfig::default();
        assert_eq!(gateway_from_config(&config).unwrap().name(), "dashboard");

        config.transport = Transport::WhatsApp;
        assert!(gateway_from_config(&config).is_err());

        config.whatsapp = Some(WhatsAppConfig {
            access_token: "tok".into(),
            phone_number_id: "1".into(),
            ..Default::default()
        });
        assert_eq!(gateway_from_config(&config).unwrap().name(), "whatsapp");
    }
}
