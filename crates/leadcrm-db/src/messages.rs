use chrono::{DateTime, Utc};
use leadcrm_core::error::{CrmError, Result};
use leadcrm_core::template::{TemplateContext, render_template};
use leadcrm_core::types::{NewScheduledMessage, ScheduledMessage};
use rusqlite::{Connection, OptionalExtension, params};

use crate::leads::{LEAD_COLUMNS, find_lead, lead_from_row};
use crate::{CrmDb, collect_rows, db_err, opt_ts_col, ts, ts_col};

pub(crate) const MESSAGE_COLUMNS: &str = "m.id, m.user_id, m.lead_id, m.content, m.scheduled_time, \
     m.delivered, m.delivered_at, m.is_bulk, m.attempt_count, m.last_error, m.created_at, m.updated_at";

pub(crate) fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledMessage> {
    Ok(ScheduledMessage {
        id: row.get(0)?,
        user_id: row.get(1)?,
        lead_id: row.get(2)?,
        content: row.get(3)?,
        scheduled_time: ts_col(row, 4)?,
        delivered: row.get::<_, i32>(5)? != 0,
        delivered_at: opt_ts_col(row, 6)?,
        is_bulk: row.get::<_, i32>(7)? != 0,
        attempt_count: row.get(8)?,
        last_error: row.get(9)?,
        created_at: ts_col(row, 10)?,
        updated_at: ts_col(row, 11)?,
    })
}

fn find_message(conn: &Connection, id: i64) -> Result<ScheduledMessage> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM scheduled_messages m WHERE m.id = ?1"),
        [id],
        message_from_row,
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| CrmError::not_found("message", id))
}

fn insert_message(
    conn: &Connection,
    user_id: i64,
    lead_id: Option<i64>,
    content: &str,
    at: DateTime<Utc>,
    is_bulk: bool,
) -> Result<i64> {
    let now = ts(Utc::now());
    conn.execute(
        "INSERT INTO scheduled_messages
             (user_id, lead_id, content, scheduled_time, delivered, is_bulk, attempt_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, 0, ?6, ?6)",
        params![user_id, lead_id, content, ts(at), is_bulk as i32, now],
    )
    .map_err(db_err)?;
    Ok(conn.last_insert_rowid())
}

impl CrmDb {
    /// Schedule a single outbound message.
    pub fn schedule_message(&self, user_id: i64, new: &NewScheduledMessage) -> Result<ScheduledMessage> {
        new.validate()?;
        let conn = self.conn()?;
        if let Some(lead_id) = new.lead_id {
            find_lead(&conn, user_id, lead_id)?;
        }
        let id = insert_message(&conn, user_id, new.lead_id, &new.content, new.scheduled_time, false)?;
        tracing::info!("✉️ Message {} scheduled for {}", id, new.scheduled_time);
        find_message(&conn, id)
    }

    /// Broadcast to every lead of `user_id`: one bulk record per lead, with
    /// the body personalized for that lead.
    pub fn schedule_bulk_message(
        &self,
        user_id: i64,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<ScheduledMessage>> {
        if content.trim().is_empty() {
            return Err(CrmError::Validation("content must not be empty".into()));
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let leads = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {LEAD_COLUMNS} FROM leads WHERE user_id = ?1 ORDER BY id"
                ))
                .map_err(db_err)?;
            let rows = stmt.query_map([user_id], lead_from_row).map_err(db_err)?;
            collect_rows(rows, "lead")
        };

        let mut ids = Vec::with_capacity(leads.len());
        for lead in &leads {
            let body = render_template(content, &TemplateContext::for_lead(lead));
            ids.push(insert_message(&tx, user_id, Some(lead.id), &body, at, true)?);
        }

        let created = ids
            .iter()
            .map(|id| find_message(&tx, *id))
            .collect::<Result<Vec<_>>>()?;
        tx.commit().map_err(db_err)?;

        tracing::info!(
            "📢 Bulk message scheduled for {} lead(s) of user {} at {}",
            created.len(),
            user_id,
            at
        );
        Ok(created)
    }

    pub fn get_message(&self, id: i64) -> Result<ScheduledMessage> {
        let conn = self.conn()?;
        find_message(&conn, id)
    }

    /// All messages of a user, soonest first.
    pub fn list_messages(&self, user_id: i64) -> Result<Vec<ScheduledMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM scheduled_messages m
                 WHERE m.user_id = ?1 ORDER BY m.scheduled_time, m.id"
            ))
            .map_err(db_err)?;
        let rows = stmt.query_map([user_id], message_from_row).map_err(db_err)?;
        Ok(collect_rows(rows, "message"))
    }

    /// Persist edits to a pending message. Delivered messages are immutable
    /// and the delivery flag itself is never written here.
    pub fn save_message(&self, message: &ScheduledMessage) -> Result<ScheduledMessage> {
        if message.content.trim().is_empty() {
            return Err(CrmError::Validation("content must not be empty".into()));
        }
        let conn = self.conn()?;
        if let Some(lead_id) = message.lead_id {
            find_lead(&conn, message.user_id, lead_id)?;
        }

        let changed = conn
            .execute(
                "UPDATE scheduled_messages
                 SET content = ?1, scheduled_time = ?2, lead_id = ?3, updated_at = ?4
                 WHERE id = ?5 AND user_id = ?6 AND delivered = 0",
                params![
                    message.content,
                    ts(message.scheduled_time),
                    message.lead_id,
                    ts(Utc::now()),
                    message.id,
                    message.user_id,
                ],
            )
            .map_err(db_err)?;

        if changed == 0 {
            let existing = find_message(&conn, message.id)?;
            if existing.delivered {
                return Err(CrmError::Validation(format!(
                    "message {} was already delivered and cannot change",
                    message.id
                )));
            }
            return Err(CrmError::not_found("message", message.id));
        }
        find_message(&conn, message.id)
    }

    pub fn delete_message(&self, user_id: i64, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM scheduled_messages WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(db_err)?;
        if removed == 0 {
            return Err(CrmError::not_found("message", id));
        }
        Ok(())
    }
}
