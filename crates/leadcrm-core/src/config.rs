//! LeadCRM configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CrmError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Fixed local offset used for "today" on the dashboard.
    #[serde(default = "default_utc_offset")]
    pub utc_offset_minutes: i32,
}

fn default_utc_offset() -> i32 { -180 }

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            delivery: DeliveryConfig::default(),
            utc_offset_minutes: default_utc_offset(),
        }
    }
}

impl CrmConfig {
    /// Load config from the default path (~/.leadcrm/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CrmError::Config(format!("Failed to read config: {e}")))?;
        let config = Self::parse(&content)?;
        tracing::debug!("📄 Config loaded from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CrmError::Config(format!("Failed to parse config: {e}")))
    }

    /// Environment wins over the file for the database location and the
    /// Twilio credentials.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = var("LEADCRM_DATABASE") {
            self.database.path = path;
        } else if let Some(url) = var("DATABASE_URL") {
            if let Some(path) = url.strip_prefix("sqlite://") {
                self.database.path = path.to_string();
            }
        }

        let sid = var("TWILIO_ACCOUNT_SID");
        let token = var("TWILIO_AUTH_TOKEN");
        let number = var("TWILIO_PHONE_NUMBER");
        if sid.is_some() || token.is_some() || number.is_some() {
            let twilio = self.delivery.twilio.get_or_insert_with(TwilioConfig::default);
            if let Some(sid) = sid {
                twilio.account_sid = sid;
            }
            if let Some(token) = token {
                twilio.auth_token = token;
            }
            if let Some(number) = number {
                twilio.from_number = number;
            }
        }
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.message_check_secs == 0 || self.scheduler.contact_check_secs == 0 {
            return Err(CrmError::Config("check intervals must be at least 1 second".into()));
        }
        if self.scheduler.delivery_timeout_secs == 0 {
            return Err(CrmError::Config("delivery_timeout_secs must be at least 1".into()));
        }
        if self.utc_offset_minutes.abs() > 14 * 60 {
            return Err(CrmError::Config(format!(
                "utc_offset_minutes {} is out of range",
                self.utc_offset_minutes
            )));
        }
        match self.delivery.transport {
            Transport::Dashboard => {}
            Transport::WhatsApp => {
                let ok = self
                    .delivery
                    .whatsapp
                    .as_ref()
                    .is_some_and(|w| !w.access_token.is_empty() && !w.phone_number_id.is_empty());
                if !ok {
                    return Err(CrmError::Config(
                        "transport 'whatsapp' needs [delivery.whatsapp] access_token and phone_number_id".into(),
                    ));
                }
            }
            Transport::Twilio => {
                let ok = self.delivery.twilio.as_ref().is_some_and(|t| {
                    !t.account_sid.is_empty() && !t.auth_token.is_empty() && !t.from_number.is_empty()
                });
                if !ok {
                    return Err(CrmError::Config(
                        "transport 'twilio' needs account_sid, auth_token and from_number".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the LeadCRM home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".leadcrm")
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database.path).to_string())
    }
}

/// SQLite store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.leadcrm/crm.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Timer cadences for the two scan loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_message_check")]
    pub message_check_secs: u64,
    #[serde(default = "default_contact_check")]
    pub contact_check_secs: u64,
    /// Upper bound on a single delivery attempt.
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,
}

fn default_message_check() -> u64 { 60 }
fn default_contact_check() -> u64 { 300 }
fn default_delivery_timeout() -> u64 { 30 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            message_check_secs: default_message_check(),
            contact_check_secs: default_contact_check(),
            delivery_timeout_secs: default_delivery_timeout(),
        }
    }
}

impl SchedulerConfig {
    pub fn message_interval(&self) -> Duration {
        Duration::from_secs(self.message_check_secs)
    }

    pub fn contact_interval(&self) -> Duration {
        Duration::from_secs(self.contact_check_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

/// Which transport carries scheduled messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Mark messages ready for the dashboard; nothing leaves the process.
    #[default]
    Dashboard,
    #[serde(rename = "whatsapp")]
    WhatsApp,
    Twilio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub transport: Transport,
    /// Minimum spacing between two sends on a real transport.
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,
    /// Prefixed to phone numbers that lack it.
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
    #[serde(default)]
    pub whatsapp: Option<WhatsAppConfig>,
    #[serde(default)]
    pub twilio: Option<TwilioConfig>,
}

fn default_min_interval() -> u64 { 5000 }
fn default_country_code() -> String { "55".into() }

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            min_interval_ms: default_min_interval(),
            default_country_code: default_country_code(),
            whatsapp: None,
            twilio: None,
        }
    }
}

/// WhatsApp Business Cloud API credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    pub access_token: String,
    pub phone_number_id: String,
    #[serde(default = "default_graph_url")]
    pub api_base: String,
}

fn default_graph_url() -> String { "https://graph.facebook.com/v21.0".into() }

/// Twilio WhatsApp sender credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender number, without the `whatsapp:` prefix.
    pub from_number: String,
    #[serde(default = "default_twilio_url")]
    pub api_base: String,
}

fn default_twilio_url() -> String { "https://api.twilio.com/2010-04-01".into() }

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            api_base: default_twilio_url(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = CrmConfig::default();
        assert_eq!(config.scheduler.message_check_secs, 60);
        assert_eq!(config.scheduler.contact_check_secs, 300);
        assert_eq!(config.delivery.transport, Transport::Dashboard);
        assert_eq!(config.delivery.default_country_code, "55");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = CrmConfig::parse(
            r#"
            utc_offset_minutes = 0

            [scheduler]
            message_check_secs = 15

            [delivery]
            transport = "whatsapp"

            [delivery.whatsapp]
            access_token = "tok"
            phone_number_id = "123"
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.message_check_secs, 15);
        assert_eq!(config.scheduler.contact_check_secs, 300);
        assert_eq!(config.delivery.transport, Transport::WhatsApp);
        assert_eq!(
            config.delivery.whatsapp.as_ref().unwrap().api_base,
            "https://graph.facebook.com/v21.0"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_credentials() {
        let mut config = CrmConfig::default();
        config.delivery.transport = Transport::Twilio;
        assert!(config.validate().is_err());

        config.delivery.transport = Transport::Dashboard;
        config.scheduler.message_check_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DATABASE_URL", "sqlite:///var/lib/crm.db"),
            ("TWILIO_ACCOUNT_SID", "AC1"),
            ("TWILIO_AUTH_TOKEN", "secret"),
            ("TWILIO_PHONE_NUMBER", "+15550001111"),
        ]);
        let mut config = CrmConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.database.path, "/var/lib/crm.db");
        let twilio = config.delivery.twilio.unwrap();
        assert_eq!(twilio.account_sid, "AC1");
        assert_eq!(twilio.from_number, "+15550001111");
    }
}
