//! # LeadCRM Scheduler
//!
//! Background promotion of due work:
//!
//! ```text
//! CrmScheduler
//!   ├── messages loop (every 60s)  → Scanner → TransitionEngine → DeliveryGateway
//!   └── contacts loop (every 300s) → Scanner → TransitionEngine → mark notified
//! ```
//!
//! The scheduler only ever sets terminal flags and delivery bookkeeping; it
//! never creates or deletes records.

pub mod engine;
pub mod scanner;
pub mod transition;

pub use engine::{ClassStats, CrmScheduler, SchedulerStats, TickOutcome};
pub use scanner::{DueItem, Scanner};
pub use transition::{Outcome, TickReport, TransitionEngine};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use leadcrm_core::error::{CrmError, DeliveryError, Result};
    use leadcrm_core::traits::{Clock, DeliveryGateway, SchedulerStore};
    use leadcrm_core::types::{
        DueMessage, NewLead, NewScheduledContact, NewScheduledMessage, NewUser, Recipient,
        ScheduledContact,
    };
    use leadcrm_db::CrmDb;

    pub fn ten_am() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 14, 10, 0, 0).unwrap()
    }

    /// In-memory store with one user and one lead named Carlos.
    pub fn seeded_db() -> (Arc<CrmDb>, i64, i64) {
        let db = CrmDb::open_in_memory().unwrap();
        let user = db
            .create_user(&NewUser {
                username: "ana".into(),
                email: "ana@example.com".into(),
                phone_number: Some("11988887777".into()),
            })
            .unwrap();
        let lead = db
            .create_lead(
                user.id,
                &NewLead { name: "Carlos".into(), phone: "11912345678".into(), ..Default::default() },
            )
            .unwrap();
        (Arc::new(db), user.id, lead.id)
    }

    pub fn schedule_contact(db: &CrmDb, user_id: i64, lead_id: i64, at: DateTime<Utc>) -> i64 {
        db.schedule_contact(user_id, &NewScheduledContact { lead_id, scheduled_time: at, notes: None })
            .unwrap()
            .id
    }

    pub fn schedule_message(db: &CrmDb, user_id: i64, lead_id: Option<i64>, at: DateTime<Utc>) -> i64 {
        db.schedule_message(
            user_id,
            &NewScheduledMessage { lead_id, content: "Olá Carlos".into(), scheduled_time: at },
        )
        .unwrap()
        .id
    }

    /// Clock that only moves when told to.
    pub struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        pub fn at(t: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(t)))
        }

        pub fn advance(&self, by: chrono::Duration) {
            *self.0.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    /// Gateway with configurable latency, failure and a one-off panic.
    pub struct FakeGateway {
        latency: Duration,
        failure: Option<String>,
        panic_next: AtomicBool,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl FakeGateway {
        pub fn ok() -> Self {
            Self {
                latency: Duration::ZERO,
                failure: None,
                panic_next: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(reason: &str) -> Self {
            Self { failure: Some(reason.into()), ..Self::ok() }
        }

        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        pub fn panicking_once(self) -> Self {
            self.panic_next.store(true, Ordering::SeqCst);
            self
        }

        /// (recipient name, content) of every accepted delivery.
        pub fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeliveryGateway for FakeGateway {
        fn name(&self) -> &str {
            "fake"
        }

        async fn attempt_delivery(
            &self,
            recipient: &Recipient,
            content: &str,
        ) -> std::result::Result<(), DeliveryError> {
            if self.panic_next.swap(false, Ordering::SeqCst) {
                panic!("gateway exploded");
            }
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if let Some(reason) = &self.failure {
                return Err(DeliveryError::Transport(reason.clone()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((recipient.name.clone().unwrap_or_default(), content.to_string()));
            Ok(())
        }
    }

    /// Store wrapper whose contact update fails for one record.
    pub struct FlakyStore {
        inner: Arc<CrmDb>,
        failing_contact: i64,
    }

    impl FlakyStore {
        pub fn failing_contact(inner: Arc<CrmDb>, id: i64) -> Self {
            Self { inner, failing_contact: id }
        }
    }

    impl SchedulerStore for FlakyStore {
        fn find_due_messages(&self, now: DateTime<Utc>) -> Result<Vec<DueMessage>> {
            self.inner.find_due_messages(now)
        }

        fn find_due_contacts(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledContact>> {
            self.inner.find_due_contacts(now)
        }

        fn mark_message_delivered(&self, id: i64, at: DateTime<Utc>) -> Result<bool> {
            self.inner.mark_message_delivered(id, at)
        }

        fn record_delivery_failure(&self, id: i64, reason: &str, at: DateTime<Utc>) -> Result<()> {
            self.inner.record_delivery_failure(id, reason, at)
        }

        fn mark_contact_notified(&self, id: i64, at: DateTime<Utc>) -> Result<bool> {
            if id == self.failing_contact {
                return Err(CrmError::Database("disk I/O error".into()));
            }
            self.inner.mark_contact_notified(id, at)
        }
    }
}
