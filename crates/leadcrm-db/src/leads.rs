use chrono::Utc;
use leadcrm_core::error::{CrmError, Result};
use leadcrm_core::types::{Lead, LeadFilter, LeadStatus, NewLead};
use rusqlite::{Connection, OptionalExtension, params};

use crate::{CrmDb, collect_rows, db_err, opt_ts_col, ts, ts_col};

pub(crate) const LEAD_COLUMNS: &str =
    "id, user_id, name, phone, email, notes, next_contact_date, status, created_at, updated_at";

pub(crate) fn lead_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lead> {
    let status_str: String = row.get(7)?;
    let status = status_str.parse::<LeadStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Lead {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        phone: row.get(3)?,
        email: row.get(4)?,
        notes: row.get(5)?,
        next_contact_date: opt_ts_col(row, 6)?,
        status,
        created_at: ts_col(row, 8)?,
        updated_at: ts_col(row, 9)?,
    })
}

/// Owner-scoped lookup on an already locked connection.
pub(crate) fn find_lead(conn: &Connection, user_id: i64, lead_id: i64) -> Result<Lead> {
    conn.query_row(
        &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1 AND user_id = ?2"),
        params![lead_id, user_id],
        lead_from_row,
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| CrmError::not_found("lead", lead_id))
}

/// Remove everything scheduled against a lead. Returns (messages, contacts).
fn delete_children(conn: &Connection, lead_id: i64) -> Result<(usize, usize)> {
    let messages = conn
        .execute("DELETE FROM scheduled_messages WHERE lead_id = ?1", [lead_id])
        .map_err(db_err)?;
    let contacts = conn
        .execute("DELETE FROM scheduled_contacts WHERE lead_id = ?1", [lead_id])
        .map_err(db_err)?;
    Ok((messages, contacts))
}

impl CrmDb {
    /// Add a lead for `user_id`. New leads start cold.
    pub fn create_lead(&self, user_id: i64, new: &NewLead) -> Result<Lead> {
        new.validate()?;
        let conn = self.conn()?;

        let owner_exists: i64 = conn
            .query_row("SELECT COUNT(*) FROM users WHERE id = ?1", [user_id], |r| r.get(0))
            .map_err(db_err)?;
        if owner_exists == 0 {
            return Err(CrmError::not_found("user", user_id));
        }

        let now = ts(Utc::now());
        conn.execute(
            "INSERT INTO leads (user_id, name, phone, email, notes, next_contact_date, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                user_id,
                new.name.trim(),
                new.phone.trim(),
                new.email,
                new.notes,
                new.next_contact_date.map(ts),
                LeadStatus::Cold.as_str(),
                now,
            ],
        )
        .map_err(db_err)?;
        let id = conn.last_insert_rowid();
        tracing::info!("🧲 Lead added: '{}' ({}) for user {}", new.name, id, user_id);
        find_lead(&conn, user_id, id)
    }

    pub fn get_lead(&self, user_id: i64, lead_id: i64) -> Result<Lead> {
        let conn = self.conn()?;
        find_lead(&conn, user_id, lead_id)
    }

    /// Leads of a user, most recently updated first.
    pub fn list_leads(&self, user_id: i64, filter: &LeadFilter) -> Result<Vec<Lead>> {
        let conn = self.conn()?;
        let search = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {LEAD_COLUMNS} FROM leads
                 WHERE user_id = ?1
                   AND (?2 IS NULL OR status = ?2)
                   AND (?3 IS NULL
                        OR name LIKE '%' || ?3 || '%'
                        OR phone LIKE '%' || ?3 || '%'
                        OR IFNULL(email, '') LIKE '%' || ?3 || '%')
                 ORDER BY updated_at DESC, id DESC"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                params![user_id, filter.status.map(|s| s.as_str()), search],
                lead_from_row,
            )
            .map_err(db_err)?;
        Ok(collect_rows(rows, "lead"))
    }

    /// Persist edits to a lead's contact fields. Status may stay or move
    /// one step forward.
    pub fn save_lead(&self, lead: &Lead) -> Result<Lead> {
        lead.validate()?;
        let conn = self.conn()?;
        let current = find_lead(&conn, lead.user_id, lead.id)?;
        if !current.can_move_to(lead.status) {
            return Err(CrmError::Validation(format!(
                "lead {} cannot move from {} to {}",
                lead.id, current.status, lead.status
            )));
        }

        conn.execute(
            "UPDATE leads SET name = ?1, phone = ?2, email = ?3, notes = ?4,
                    next_contact_date = ?5, status = ?6, updated_at = ?7
             WHERE id = ?8 AND user_id = ?9",
            params![
                lead.name.trim(),
                lead.phone.trim(),
                lead.email,
                lead.notes,
                lead.next_contact_date.map(ts),
                lead.status.as_str(),
                ts(Utc::now()),
                lead.id,
                lead.user_id,
            ],
        )
        .map_err(db_err)?;
        find_lead(&conn, lead.user_id, lead.id)
    }

    /// Move a lead one funnel step forward. `None` when already a customer.
    pub fn advance_lead_status(&self, user_id: i64, lead_id: i64) -> Result<Option<LeadStatus>> {
        let conn = self.conn()?;
        let lead = find_lead(&conn, user_id, lead_id)?;
        let Some(next) = lead.status.next() else {
            tracing::debug!("Lead {} is already a customer", lead_id);
            return Ok(None);
        };

        conn.execute(
            "UPDATE leads SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![next.as_str(), ts(Utc::now()), lead_id, lead.status.as_str()],
        )
        .map_err(db_err)?;
        tracing::info!("📈 Lead {} advanced: {} → {}", lead_id, lead.status, next);
        Ok(Some(next))
    }

    /// Delete a lead together with its scheduled messages and contacts.
    pub fn delete_lead(&self, user_id: i64, lead_id: i64) -> Result<()> {
        let mut conn = self.conn()?;
        find_lead(&conn, user_id, lead_id)?;

        let tx = conn.transaction().map_err(db_err)?;
        let (messages, contacts) = delete_children(&tx, lead_id)?;
        tx.execute("DELETE FROM leads WHERE id = ?1", [lead_id])
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        tracing::info!(
            "🗑️ Lead {} deleted with {} message(s) and {} contact(s)",
            lead_id,
            messages,
            contacts
        );
        Ok(())
    }

    /// Referential cleanup for a lead, without removing the lead itself.
    pub fn delete_messages_and_contacts_for_lead(&self, lead_id: i64) -> Result<(usize, usize)> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        let removed = delete_children(&tx, lead_id)?;
        tx.commit().map_err(db_err)?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::*;
    use chrono::{Duration, Utc};
    use leadcrm_core::error::CrmError;
    use leadcrm_core::types::{LeadFilter, LeadStatus, NewScheduledContact, NewScheduledMessage};

    #[test]
    fn test_create_lead_starts_cold() {
        let db = db();
        let u = user(&db, "ana");
        let l = lead(&db, u.id, "Carlos");
        assert_eq!(l.status, LeadStatus::Cold);
        assert_eq!(l.user_id, u.id);
    }

    #[test]
    fn test_lead_scoped_to_owner() {
        let db = db();
        let a = user(&db, "ana");
        let b = user(&db, "bia");
        let l = lead(&db, a.id, "Carlos");
        assert!(matches!(db.get_lead(b.id, l.id), Err(CrmError::NotFound { .. })));
    }

    #[test]
    fn test_advance_until_customer() {
        let db = db();
        let u = user(&db, "ana");
        let l = lead(&db, u.id, "Carlos");
        assert_eq!(db.advance_lead_status(u.id, l.id).unwrap(), Some(LeadStatus::Warm));
        assert_eq!(db.advance_lead_status(u.id, l.id).unwrap(), Some(LeadStatus::Hot));
        assert_eq!(db.advance_lead_status(u.id, l.id).unwrap(), Some(LeadStatus::Customer));
        assert_eq!(db.advance_lead_status(u.id, l.id).unwrap(), None);
        assert_eq!(db.get_lead(u.id, l.id).unwrap().status, LeadStatus::Customer);
    }

    #[test]
    fn test_save_lead_refuses_backward_status() {
        let db = db();
        let u = user(&db, "ana");
        let l = lead(&db, u.id, "Carlos");
        db.advance_lead_status(u.id, l.id).unwrap();

        let mut edited = db.get_lead(u.id, l.id).unwrap();
        edited.status = LeadStatus::Cold;
        assert!(matches!(db.save_lead(&edited), Err(CrmError::Validation(_))));

        edited.status = LeadStatus::Warm;
        edited.notes = Some("called twice".into());
        let saved = db.save_lead(&edited).unwrap();
        assert_eq!(saved.notes.as_deref(), Some("called twice"));
    }

    #[test]
    fn test_save_lead_refuses_skipping_steps() {
        let db = db();
        let u = user(&db, "ana");
        let l = lead(&db, u.id, "Carlos");

        let mut edited = db.get_lead(u.id, l.id).unwrap();
        edited.status = LeadStatus::Customer;
        assert!(matches!(db.save_lead(&edited), Err(CrmError::Validation(_))));
        assert_eq!(db.get_lead(u.id, l.id).unwrap().status, LeadStatus::Cold);

        edited.status = LeadStatus::Warm;
        assert_eq!(db.save_lead(&edited).unwrap().status, LeadStatus::Warm);
    }

    #[test]
    fn test_list_leads_filters() {
        let db = db();
        let u = user(&db, "ana");
        let carlos = lead(&db, u.id, "Carlos Souza");
        lead(&db, u.id, "Beatriz Lima");
        db.advance_lead_status(u.id, carlos.id).unwrap();

        let warm = db
            .list_leads(u.id, &LeadFilter { status: Some(LeadStatus::Warm), search: None })
            .unwrap();
        assert_eq!(warm.len(), 1);
        assert_eq!(warm[0].id, carlos.id);

        let found = db
            .list_leads(u.id, &LeadFilter { status: None, search: Some("beatriz".into()) })
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Beatriz Lima");

        assert_eq!(db.list_leads(u.id, &LeadFilter::default()).unwrap().len(), 2);
    }

    #[test]
    fn test_delete_lead_cascades() {
        let db = db();
        let u = user(&db, "ana");
        let l = lead(&db, u.id, "Carlos");
        let other = lead(&db, u.id, "Beatriz");
        let at = Utc::now() + Duration::hours(1);

        for _ in 0..2 {
            db.schedule_contact(u.id, &NewScheduledContact { lead_id: l.id, scheduled_time: at, notes: None })
                .unwrap();
        }
        db.schedule_message(
            u.id,
            &NewScheduledMessage { lead_id: Some(l.id), content: "oi".into(), scheduled_time: at },
        )
        .unwrap();
        db.schedule_contact(u.id, &NewScheduledContact { lead_id: other.id, scheduled_time: at, notes: None })
            .unwrap();

        db.delete_lead(u.id, l.id).unwrap();

        assert!(db.list_contacts(u.id).unwrap().iter().all(|c| c.lead_id != l.id));
        assert!(db.list_messages(u.id).unwrap().iter().all(|m| m.lead_id != Some(l.id)));
        assert_eq!(db.list_contacts(u.id).unwrap().len(), 1);
        assert!(matches!(db.get_lead(u.id, l.id), Err(CrmError::NotFound { .. })));
    }

    #[test]
    fn test_delete_children_only() {
        let db = db();
        let u = user(&db, "ana");
        let l = lead(&db, u.id, "Carlos");
        let at = Utc::now();
        db.schedule_contact(u.id, &NewScheduledContact { lead_id: l.id, scheduled_time: at, notes: None })
            .unwrap();
        assert_eq!(db.delete_messages_and_contacts_for_lead(l.id).unwrap(), (0, 1));
        assert!(db.get_lead(u.id, l.id).is_ok());
    }
}
