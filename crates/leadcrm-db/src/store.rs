//! The scheduler's view of the store: due-item scans and terminal-flag
//! updates.
//!
//! Timestamps are fixed-width RFC 3339 text, so the due filter and the
//! trigger order run in SQL. A row whose timestamp does not decode is
//! logged and skipped.

use chrono::{DateTime, Utc};
use leadcrm_core::error::Result;
use leadcrm_core::traits::SchedulerStore;
use leadcrm_core::types::{DueMessage, Recipient, ScheduledContact};
use rusqlite::params;

use crate::contacts::{CONTACT_COLUMNS, contact_from_row};
use crate::messages::{MESSAGE_COLUMNS, message_from_row};
use crate::{CrmDb, collect_rows, db_err, ts};

fn due_message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DueMessage> {
    let message = message_from_row(row)?;
    let lead_name: Option<String> = row.get(12)?;
    let lead_phone: Option<String> = row.get(13)?;
    let owner_name: Option<String> = row.get(14)?;
    let owner_phone: Option<String> = row.get(15)?;

    let recipient = if message.lead_id.is_some() {
        Recipient { name: lead_name, phone: lead_phone }
    } else {
        Recipient { name: owner_name, phone: owner_phone }
    };
    Ok(DueMessage { message, recipient })
}

impl SchedulerStore for CrmDb {
    fn find_due_messages(&self, now: DateTime<Utc>) -> Result<Vec<DueMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MESSAGE_COLUMNS}, l.name, l.phone, u.username, u.phone_number
                 FROM scheduled_messages m
                 LEFT JOIN leads l ON l.id = m.lead_id
                 LEFT JOIN users u ON u.id = m.user_id
                 WHERE m.delivered = 0 AND m.scheduled_time <= ?1
                 ORDER BY m.scheduled_time, m.id"
            ))
            .map_err(db_err)?;
        let rows = stmt.query_map([ts(now)], due_message_from_row).map_err(db_err)?;
        Ok(collect_rows(rows, "scheduled message"))
    }

    fn find_due_contacts(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledContact>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CONTACT_COLUMNS} FROM scheduled_contacts c
                 WHERE c.notified = 0 AND c.scheduled_time <= ?1
                 ORDER BY c.scheduled_time, c.id"
            ))
            .map_err(db_err)?;
        let rows = stmt.query_map([ts(now)], contact_from_row).map_err(db_err)?;
        Ok(collect_rows(rows, "scheduled contact"))
    }

    fn mark_message_delivered(&self, id: i64, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE scheduled_messages
                 SET delivered = 1, delivered_at = ?1, attempt_count = attempt_count + 1,
                     last_error = NULL, updated_at = ?1
                 WHERE id = ?2 AND delivered = 0",
                params![ts(at), id],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }

    fn record_delivery_failure(&self, id: i64, reason: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE scheduled_messages
             SET attempt_count = attempt_count + 1, last_error = ?1, updated_at = ?2
             WHERE id = ?3 AND delivered = 0",
            params![reason, ts(at), id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn mark_contact_notified(&self, id: i64, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE scheduled_contacts SET notified = 1, notified_at = ?1
                 WHERE id = ?2 AND notified = 0",
                params![ts(at), id],
            )
            .map_err(db_err)?;
        Ok(changed == 1)
    }
}
