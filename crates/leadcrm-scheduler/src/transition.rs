//! State transition engine: moves due items to their terminal state, one
//! item at a time.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use leadcrm_core::error::{DeliveryError, Result};
use leadcrm_core::traits::{Clock, DeliveryGateway, SchedulerStore};
use leadcrm_core::types::{DueMessage, ItemClass, ScheduledContact};
use serde::Serialize;
use tokio::sync::watch;

use crate::scanner::DueItem;

/// What happened to a single item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Terminal flag set.
    Transitioned,
    /// Delivery failed; the failure is recorded and the item stays pending.
    DeliveryFailed(String),
    /// The record disappeared or was already terminal when we got to it.
    Vanished,
}

/// Summary of one tick for one class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub class: Option<ItemClass>,
    pub scanned: usize,
    pub transitioned: usize,
    /// Delivery failures plus storage errors.
    pub failed: usize,
    pub vanished: usize,
    /// Shutdown was requested before the batch finished.
    pub interrupted: bool,
    pub elapsed_ms: u64,
}

pub struct TransitionEngine {
    store: Arc<dyn SchedulerStore>,
    gateway: Arc<dyn DeliveryGateway>,
    clock: Arc<dyn Clock>,
    delivery_timeout: Duration,
}

impl TransitionEngine {
    pub fn new(
        store: Arc<dyn SchedulerStore>,
        gateway: Arc<dyn DeliveryGateway>,
        clock: Arc<dyn Clock>,
        delivery_timeout: Duration,
    ) -> Self {
        Self { store, gateway, clock, delivery_timeout }
    }

    /// Process `items` in order. An error or panic on one item is logged and
    /// counted, never propagated. Stops early once `shutdown` reads `true`; the item
    /// in progress always finishes first.
    pub async fn run_batch(
        &self,
        class: ItemClass,
        items: Vec<DueItem>,
        shutdown: &watch::Receiver<bool>,
    ) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport {
            class: Some(class),
            scanned: items.len(),
            ..Default::default()
        };

        for item in &items {
            if *shutdown.borrow() {
                tracing::info!(
                    "⏹️ {} batch interrupted by shutdown ({} left)",
                    class,
                    report.scanned - report.transitioned - report.failed - report.vanished
                );
                report.interrupted = true;
                break;
            }

            match AssertUnwindSafe(self.process(item)).catch_unwind().await {
                Ok(Ok(Outcome::Transitioned)) => report.transitioned += 1,
                Ok(Ok(Outcome::DeliveryFailed(reason))) => {
                    tracing::warn!("⚠️ Message {} not delivered: {}", item.id(), reason);
                    report.failed += 1;
                }
                Ok(Ok(Outcome::Vanished)) => {
                    tracing::debug!("{} item {} vanished before transition", class, item.id());
                    report.vanished += 1;
                }
                Ok(Err(e)) => {
                    tracing::warn!("⚠️ {} item {} left pending: {}", class, item.id(), e);
                    report.failed += 1;
                }
                Err(panic) => {
                    tracing::error!(
                        "💥 {} item {} panicked, left pending: {}",
                        class,
                        item.id(),
                        panic_message(&*panic)
                    );
                    report.failed += 1;
                }
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        report
    }

    /// Transition a single item and persist it.
    pub async fn process(&self, item: &DueItem) -> Result<Outcome> {
        match item {
            DueItem::Message(due) => self.deliver(due).await,
            DueItem::Contact(contact) => self.notify(contact),
        }
    }

    async fn deliver(&self, due: &DueMessage) -> Result<Outcome> {
        let message = &due.message;
        // Only the transport call is timed, not the wait for a send slot.
        self.gateway.pace().await;
        let attempt = self.gateway.attempt_delivery(&due.recipient, &message.content);
        let result = match tokio::time::timeout(self.delivery_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.delivery_timeout.as_secs())),
        };

        let at = self.clock.now();
        match result {
            Ok(()) => {
                if self.store.mark_message_delivered(message.id, at)? {
                    tracing::info!(
                        "✅ Message {} delivered via {} to {}",
                        message.id,
                        self.gateway.name(),
                        due.recipient.name.as_deref().unwrap_or("unknown")
                    );
                    Ok(Outcome::Transitioned)
                } else {
                    Ok(Outcome::Vanished)
                }
            }
            Err(e) => {
                let reason = e.to_string();
                self.store.record_delivery_failure(message.id, &reason, at)?;
                Ok(Outcome::DeliveryFailed(reason))
            }
        }
    }

    fn notify(&self, contact: &ScheduledContact) -> Result<Outcome> {
        if self.store.mark_contact_notified(contact.id, self.clock.now())? {
            tracing::info!(
                "🔔 Follow-up due: contact {} with lead {} (scheduled {})",
                contact.id,
                contact.lead_id,
                contact.scheduled_time
            );
            Ok(Outcome::Transitioned)
        } else {
            Ok(Outcome::Vanished)
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Scanner;
    use leadcrm_channels::{DashboardGateway, RateLimitedGateway};
    use crate::test_support::*;
    use chrono::Duration as ChronoDuration;

    fn engine_with(
        store: Arc<dyn SchedulerStore>,
        gateway: Arc<dyn DeliveryGateway>,
        clock: Arc<ManualClock>,
    ) -> TransitionEngine {
        TransitionEngine::new(store, gateway, clock, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_storage_error_isolated_to_one_item() {
        let (db, user_id, lead_id) = seeded_db();
        let a = schedule_contact(&db, user_id, lead_id, ten_am() - ChronoDuration::minutes(2));
        let b = schedule_contact(&db, user_id, lead_id, ten_am() - ChronoDuration::minutes(1));
        let store = Arc::new(FlakyStore::failing_contact(db.clone(), a));
        let clock = ManualClock::at(ten_am());

        let items = Scanner::new(store.clone(), clock.clone()).scan(ItemClass::Contacts).unwrap();
        let engine = engine_with(store, Arc::new(FakeGateway::ok()), clock);
        let (_tx, rx) = watch::channel(false);
        let report = engine.run_batch(ItemClass::Contacts, items, &rx).await;

        assert_eq!(report.scanned, 2);
        assert_eq!(report.transitioned, 1);
        assert_eq!(report.failed, 1);
        assert!(!db.get_contact(a).unwrap().notified);
        assert!(db.get_contact(b).unwrap().notified);
    }

    #[tokio::test]
    async fn test_slow_gateway_times_out_as_failure() {
        let (db, user_id, lead_id) = seeded_db();
        let id = schedule_message(&db, user_id, Some(lead_id), ten_am());
        let clock = ManualClock::at(ten_am());
        let items = Scanner::new(db.clone(), clock.clone()).scan(ItemClass::Messages).unwrap();

        let gateway = Arc::new(FakeGateway::ok().with_latency(Duration::from_secs(5)));
        let engine = engine_with(db.clone(), gateway, clock);
        let outcome = engine.process(&items[0]).await.unwrap();

        assert!(matches!(outcome, Outcome::DeliveryFailed(ref r) if r.contains("timed out")));
        let message = db.get_message(id).unwrap();
        assert!(!message.delivered);
        assert_eq!(message.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_waiting_for_send_slot_is_not_a_timeout() {
        let (db, user_id, lead_id) = seeded_db();
        let a = schedule_message(&db, user_id, Some(lead_id), ten_am() - ChronoDuration::minutes(2));
        let b = schedule_message(&db, user_id, Some(lead_id), ten_am() - ChronoDuration::minutes(1));
        let clock = ManualClock::at(ten_am());
        let items = Scanner::new(db.clone(), clock.clone()).scan(ItemClass::Messages).unwrap();

        // Slot spacing is longer than the 200ms delivery timeout.
        let gateway = Arc::new(RateLimitedGateway::new(DashboardGateway, Duration::from_millis(400)));
        let engine = engine_with(db.clone(), gateway, clock);
        let (_tx, rx) = watch::channel(false);
        let report = engine.run_batch(ItemClass::Messages, items, &rx).await;

        assert_eq!(report.transitioned, 2);
        assert_eq!(report.failed, 0);
        for id in [a, b] {
            let message = db.get_message(id).unwrap();
            assert!(message.delivered);
            assert_eq!(message.attempt_count, 1);
            assert_eq!(message.last_error, None);
        }
    }

    #[tokio::test]
    async fn test_panicking_item_does_not_abort_batch() {
        let (db, user_id, lead_id) = seeded_db();
        let a = schedule_message(&db, user_id, Some(lead_id), ten_am() - ChronoDuration::minutes(2));
        let b = schedule_message(&db, user_id, Some(lead_id), ten_am() - ChronoDuration::minutes(1));
        let clock = ManualClock::at(ten_am());
        let items = Scanner::new(db.clone(), clock.clone()).scan(ItemClass::Messages).unwrap();

        let engine = engine_with(db.clone(), Arc::new(FakeGateway::ok().panicking_once()), clock);
        let (_tx, rx) = watch::channel(false);
        let report = engine.run_batch(ItemClass::Messages, items, &rx).await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.transitioned, 1);
        assert!(!report.interrupted);
        let first = db.get_message(a).unwrap();
        assert!(!first.delivered);
        assert_eq!(first.attempt_count, 0);
        assert!(db.get_message(b).unwrap().delivered);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*boxed), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }

    #[tokio::test]
    async fn test_deleted_record_not_resurrected() {
        let (db, user_id, lead_id) = seeded_db();
        schedule_message(&db, user_id, Some(lead_id), ten_am());
        let clock = ManualClock::at(ten_am());
        let items = Scanner::new(db.clone(), clock.clone()).scan(ItemClass::Messages).unwrap();

        db.delete_lead(user_id, lead_id).unwrap();

        let gateway = Arc::new(FakeGateway::ok());
        let engine = engine_with(db.clone(), gateway.clone(), clock);
        let outcome = engine.process(&items[0]).await.unwrap();
        assert_eq!(outcome, Outcome::Vanished);
        assert!(db.find_due_messages(ten_am()).unwrap().is_empty());
        assert!(db.list_messages(user_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_stops_between_items() {
        let (db, user_id, lead_id) = seeded_db();
        for minutes in 1..=3 {
            schedule_contact(&db, user_id, lead_id, ten_am() - ChronoDuration::minutes(minutes));
        }
        let clock = ManualClock::at(ten_am());
        let items = Scanner::new(db.clone(), clock.clone()).scan(ItemClass::Contacts).unwrap();
        let engine = engine_with(db.clone(), Arc::new(FakeGateway::ok()), clock);

        let (tx, rx) = watch::channel(true);
        let report = engine.run_batch(ItemClass::Contacts, items, &rx).await;
        assert!(report.interrupted);
        assert_eq!(report.transitioned, 0);
        drop(tx);
    }
}
