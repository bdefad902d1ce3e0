//! Due-item scanner: pending records whose trigger time has passed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use leadcrm_core::error::Result;
use leadcrm_core::traits::{Clock, SchedulerStore};
use leadcrm_core::types::{DueMessage, ItemClass, ScheduledContact};

/// One unit of scheduled work.
#[derive(Debug, Clone, PartialEq)]
pub enum DueItem {
    Message(DueMessage),
    Contact(ScheduledContact),
}

impl DueItem {
    pub fn id(&self) -> i64 {
        match self {
            DueItem::Message(m) => m.message.id,
            DueItem::Contact(c) => c.id,
        }
    }

    pub fn class(&self) -> ItemClass {
        match self {
            DueItem::Message(_) => ItemClass::Messages,
            DueItem::Contact(_) => ItemClass::Contacts,
        }
    }

    pub fn scheduled_time(&self) -> DateTime<Utc> {
        match self {
            DueItem::Message(m) => m.message.scheduled_time,
            DueItem::Contact(c) => c.scheduled_time,
        }
    }
}

/// Read-only view over the store. Never mutates.
pub struct Scanner {
    store: Arc<dyn SchedulerStore>,
    clock: Arc<dyn Clock>,
}

impl Scanner {
    pub fn new(store: Arc<dyn SchedulerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Everything of `class` that is due as of the clock's `now`, oldest
    /// trigger first.
    pub fn scan(&self, class: ItemClass) -> Result<Vec<DueItem>> {
        self.scan_at(class, self.clock.now())
    }

    pub fn scan_at(&self, class: ItemClass, now: DateTime<Utc>) -> Result<Vec<DueItem>> {
        let items = match class {
            ItemClass::Messages => self
                .store
                .find_due_messages(now)?
                .into_iter()
                .map(DueItem::Message)
                .collect(),
            ItemClass::Contacts => self
                .store
                .find_due_contacts(now)?
                .into_iter()
                .map(DueItem::Contact)
                .collect(),
        };
        Ok(items)
    }
}
