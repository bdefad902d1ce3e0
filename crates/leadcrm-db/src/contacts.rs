use chrono::Utc;
use leadcrm_core::error::{CrmError, Result};
use leadcrm_core::types::{NewScheduledContact, ScheduledContact};
use rusqlite::{Connection, OptionalExtension, params};

use crate::leads::find_lead;
use crate::{CrmDb, collect_rows, db_err, opt_ts_col, ts, ts_col};

pub(crate) const CONTACT_COLUMNS: &str =
    "c.id, c.user_id, c.lead_id, c.scheduled_time, c.notes, c.notified, c.notified_at, c.created_at";

pub(crate) fn contact_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledContact> {
    Ok(ScheduledContact {
        id: row.get(0)?,
        user_id: row.get(1)?,
        lead_id: row.get(2)?,
        scheduled_time: ts_col(row, 3)?,
        notes: row.get(4)?,
        notified: row.get::<_, i32>(5)? != 0,
        notified_at: opt_ts_col(row, 6)?,
        created_at: ts_col(row, 7)?,
    })
}

fn find_contact(conn: &Connection, id: i64) -> Result<ScheduledContact> {
    conn.query_row(
        &format!("SELECT {CONTACT_COLUMNS} FROM scheduled_contacts c WHERE c.id = ?1"),
        [id],
        contact_from_row,
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| CrmError::not_found("contact", id))
}

impl CrmDb {
    /// Schedule a follow-up reminder for one of the user's leads.
    pub fn schedule_contact(&self, user_id: i64, new: &NewScheduledContact) -> Result<ScheduledContact> {
        let conn = self.conn()?;
        find_lead(&conn, user_id, new.lead_id)?;
        conn.execute(
            "INSERT INTO scheduled_contacts (user_id, lead_id, scheduled_time, notes, notified, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![user_id, new.lead_id, ts(new.scheduled_time), new.notes, ts(Utc::now())],
        )
        .map_err(db_err)?;
        let id = conn.last_insert_rowid();
        tracing::info!("📅 Contact {} scheduled with lead {} at {}", id, new.lead_id, new.scheduled_time);
        find_contact(&conn, id)
    }

    pub fn get_contact(&self, id: i64) -> Result<ScheduledContact> {
        let conn = self.conn()?;
        find_contact(&conn, id)
    }

    /// All reminders of a user, soonest first.
    pub fn list_contacts(&self, user_id: i64) -> Result<Vec<ScheduledContact>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CONTACT_COLUMNS} FROM scheduled_contacts c
                 WHERE c.user_id = ?1 ORDER BY c.scheduled_time, c.id"
            ))
            .map_err(db_err)?;
        let rows = stmt.query_map([user_id], contact_from_row).map_err(db_err)?;
        Ok(collect_rows(rows, "contact"))
    }

    /// Reschedule or annotate a pending reminder.
    pub fn save_contact(&self, contact: &ScheduledContact) -> Result<ScheduledContact> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE scheduled_contacts SET scheduled_time = ?1, notes = ?2
                 WHERE id = ?3 AND user_id = ?4 AND notified = 0",
                params![ts(contact.scheduled_time), contact.notes, contact.id, contact.user_id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            let existing = find_contact(&conn, contact.id)?;
            if existing.notified {
                return Err(CrmError::Validation(format!(
                    "contact {} was already notified and cannot change",
                    contact.id
                )));
            }
            return Err(CrmError::not_found("contact", contact.id));
        }
        find_contact(&conn, contact.id)
    }

    pub fn delete_contact(&self, user_id: i64, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM scheduled_contacts WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(db_err)?;
        if removed == 0 {
            return Err(CrmError::not_found("contact", id));
        }
        Ok(())
    }
}
