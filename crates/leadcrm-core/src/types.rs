//! Entity definitions: the data model every other crate reads and writes.

use chrono::{DateTime, FixedOffset, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CrmError, Result};

/// A CRM user. Owns leads, scheduled items and templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// Fallback recipient for messages without a lead.
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub phone_number: Option<String>,
}

impl NewUser {
    pub fn validate(&self) -> Result<()> {
        require_non_empty("username", &self.username)?;
        require_non_empty("email", &self.email)?;
        if !self.email.contains('@') {
            return Err(CrmError::Validation(format!(
                "email '{}' is not an address",
                self.email
            )));
        }
        Ok(())
    }
}

/// Sales funnel position. Only moves forward; `Customer` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    #[serde(alias = "frio")]
    Cold,
    #[serde(alias = "quente")]
    Warm,
    #[serde(alias = "fervendo")]
    Hot,
    #[serde(alias = "cliente")]
    Customer,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 4] = [
        LeadStatus::Cold,
        LeadStatus::Warm,
        LeadStatus::Hot,
        LeadStatus::Customer,
    ];

    /// The next funnel step, `None` at `Customer`.
    pub fn next(self) -> Option<LeadStatus> {
        match self {
            LeadStatus::Cold => Some(LeadStatus::Warm),
            LeadStatus::Warm => Some(LeadStatus::Hot),
            LeadStatus::Hot => Some(LeadStatus::Customer),
            LeadStatus::Customer => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == LeadStatus::Customer
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::Cold => "cold",
            LeadStatus::Warm => "warm",
            LeadStatus::Hot => "hot",
            LeadStatus::Customer => "customer",
        }
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LeadStatus {
    type Err = CrmError;

    /// Accepts the English labels and the legacy Portuguese ones.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "cold" | "frio" => Ok(LeadStatus::Cold),
            "warm" | "quente" => Ok(LeadStatus::Warm),
            "hot" | "fervendo" => Ok(LeadStatus::Hot),
            "customer" | "cliente" => Ok(LeadStatus::Customer),
            other => Err(CrmError::Validation(format!("unknown lead status '{other}'"))),
        }
    }
}

/// A sales lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub next_contact_date: Option<DateTime<Utc>>,
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Whether `target` is the current status or the single next step.
    pub fn can_move_to(&self, target: LeadStatus) -> bool {
        target == self.status || self.status.next() == Some(target)
    }

    pub fn validate(&self) -> Result<()> {
        require_non_empty("name", &self.name)?;
        require_non_empty("phone", &self.phone)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewLead {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub notes: Option<String>,
    pub next_contact_date: Option<DateTime<Utc>>,
}

impl NewLead {
    pub fn validate(&self) -> Result<()> {
        require_non_empty("name", &self.name)?;
        require_non_empty("phone", &self.phone)
    }
}

/// Lead listing filter. Search matches name, phone or email.
#[derive(Debug, Clone, Default)]
pub struct LeadFilter {
    pub status: Option<LeadStatus>,
    pub search: Option<String>,
}

/// An outbound message waiting for its trigger time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledMessage {
    pub id: i64,
    pub user_id: i64,
    /// `None` for messages addressed to the owner rather than a lead.
    pub lead_id: Option<i64>,
    pub content: String,
    pub scheduled_time: DateTime<Utc>,
    /// Terminal flag. Once set the record is immutable.
    pub delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub is_bulk: bool,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScheduledMessage {
    pub lead_id: Option<i64>,
    pub content: String,
    pub scheduled_time: DateTime<Utc>,
}

impl NewScheduledMessage {
    pub fn validate(&self) -> Result<()> {
        require_non_empty("content", &self.content)
    }
}

/// A follow-up reminder for a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledContact {
    pub id: i64,
    pub user_id: i64,
    pub lead_id: i64,
    pub scheduled_time: DateTime<Utc>,
    pub notes: Option<String>,
    /// Terminal flag. Once set the reminder is never revisited.
    pub notified: bool,
    pub notified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScheduledContact {
    pub lead_id: i64,
    pub scheduled_time: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Reusable message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub content: String,
}

impl NewTemplate {
    pub fn validate(&self) -> Result<()> {
        require_non_empty("name", &self.name)?;
        require_non_empty("content", &self.content)
    }
}

/// Who a due message goes to, resolved from its lead or owner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: Option<String>,
    pub phone: Option<String>,
}

/// A message whose trigger time has passed, with its resolved recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct DueMessage {
    pub message: ScheduledMessage,
    pub recipient: Recipient,
}

/// The two kinds of scheduled work, each on its own timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemClass {
    Messages,
    Contacts,
}

impl std::fmt::Display for ItemClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemClass::Messages => write!(f, "messages"),
            ItemClass::Contacts => write!(f, "contacts"),
        }
    }
}

/// Lead counts per funnel stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub cold: usize,
    pub warm: usize,
    pub hot: usize,
    pub customer: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: LeadStatus, n: usize) {
        match status {
            LeadStatus::Cold => self.cold += n,
            LeadStatus::Warm => self.warm += n,
            LeadStatus::Hot => self.hot += n,
            LeadStatus::Customer => self.customer += n,
        }
    }

    pub fn total(&self) -> usize {
        self.cold + self.warm + self.hot + self.customer
    }
}

/// Read model behind the dashboard page.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSummary {
    pub total_leads: usize,
    pub by_status: StatusCounts,
    /// Next un-notified reminders from the start of the local day.
    pub upcoming_contacts: Vec<ScheduledContact>,
    /// Reminders the scheduler has already promoted.
    pub contact_alerts: Vec<ScheduledContact>,
    pub recent_leads: Vec<Lead>,
    pub pending_messages: usize,
    pub ready_messages: usize,
}

/// Midnight of the local day containing `now`, for a fixed UTC offset.
pub fn start_of_local_day(now: DateTime<Utc>, utc_offset_minutes: i32) -> DateTime<Utc> {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
    let midnight = now.with_timezone(&offset).date_naive().and_time(NaiveTime::MIN);
    midnight
        .and_local_timezone(offset)
        .single()
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(now)
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CrmError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}
