use chrono::{DateTime, Utc};
use leadcrm_core::error::Result;
use leadcrm_core::types::{DashboardSummary, LeadStatus, StatusCounts, start_of_local_day};
use rusqlite::params;

use crate::contacts::{CONTACT_COLUMNS, contact_from_row};
use crate::leads::{LEAD_COLUMNS, lead_from_row};
use crate::{CrmDb, collect_rows, db_err, ts};

const PANEL_SIZE: usize = 5;

impl CrmDb {
    /// Everything the dashboard page shows for one user.
    ///
    /// Upcoming reminders start at local midnight, so a reminder from
    /// earlier today that the scheduler has not reached yet still shows up.
    pub fn dashboard(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
        utc_offset_minutes: i32,
    ) -> Result<DashboardSummary> {
        let conn = self.conn()?;

        let mut by_status = StatusCounts::default();
        {
            let mut stmt = conn
                .prepare("SELECT status, COUNT(*) FROM leads WHERE user_id = ?1 GROUP BY status")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(db_err)?;
            for (status, n) in collect_rows(rows, "status count") {
                match status.parse::<LeadStatus>() {
                    Ok(s) => by_status.add(s, n as usize),
                    Err(e) => tracing::warn!("⚠️ Lead status not counted: {e}"),
                }
            }
        }

        let day_start = start_of_local_day(now, utc_offset_minutes);
        let upcoming_contacts = {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {CONTACT_COLUMNS} FROM scheduled_contacts c
                     WHERE c.user_id = ?1 AND c.notified = 0 AND c.scheduled_time >= ?2
                     ORDER BY c.scheduled_time, c.id LIMIT ?3"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![user_id, ts(day_start), PANEL_SIZE as i64], contact_from_row)
                .map_err(db_err)?;
            collect_rows(rows, "contact")
        };

        let contact_alerts = {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {CONTACT_COLUMNS} FROM scheduled_contacts c
                     WHERE c.user_id = ?1 AND c.notified = 1
                     ORDER BY c.notified_at DESC, c.id DESC LIMIT ?2"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![user_id, PANEL_SIZE as i64], contact_from_row)
                .map_err(db_err)?;
            collect_rows(rows, "contact")
        };

        let recent_leads = {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {LEAD_COLUMNS} FROM leads WHERE user_id = ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![user_id, PANEL_SIZE as i64], lead_from_row)
                .map_err(db_err)?;
            collect_rows(rows, "lead")
        };

        let (pending, ready): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(CASE WHEN scheduled_time <= ?2 THEN 1 ELSE 0 END), 0)
                 FROM scheduled_messages WHERE user_id = ?1 AND delivered = 0",
                params![user_id, ts(now)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(db_err)?;

        Ok(DashboardSummary {
            total_leads: by_status.total(),
            by_status,
            upcoming_contacts,
            contact_alerts,
            recent_leads,
            pending_messages: pending as usize,
            ready_messages: ready as usize,
        })
    }
}
