//! # LeadCRM Store
//!
//! SQLite-backed entity store for users, leads, scheduled messages,
//! scheduled contacts and message templates.
//!
//! One connection behind a mutex; every public operation takes the lock for
//! the duration of a single statement or a single per-entity transaction,
//! never across a whole scheduler batch.

mod contacts;
mod dashboard;
mod leads;
mod messages;
mod store;
mod templates;
mod users;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use leadcrm_core::error::{CrmError, Result};
use rusqlite::Connection;

/// The LeadCRM database.
pub struct CrmDb {
    conn: Mutex<Connection>,
}

impl CrmDb {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(|e| CrmError::Database(format!("DB open: {e}")))?;

        // WAL lets dashboard reads proceed while the scheduler writes.
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        let db = Self::from_connection(conn)?;
        tracing::debug!("🗄️ CRM database opened at {}", path.display());
        Ok(db)
    }

    /// Fresh in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CrmError::Database(format!("DB open: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(db_err)?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                phone_number TEXT,
                created_at TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS leads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                name TEXT NOT NULL,
                phone TEXT NOT NULL,
                email TEXT,
                notes TEXT,
                next_contact_date TEXT,
                status TEXT NOT NULL DEFAULT 'cold',   -- cold, warm, hot, customer
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS scheduled_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                lead_id INTEGER REFERENCES leads(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                scheduled_time TEXT NOT NULL,
                delivered INTEGER NOT NULL DEFAULT 0,
                delivered_at TEXT,
                is_bulk INTEGER NOT NULL DEFAULT 0,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS scheduled_contacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                lead_id INTEGER NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
                scheduled_time TEXT NOT NULL,
                notes TEXT,
                notified INTEGER NOT NULL DEFAULT 0,
                notified_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS message_templates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                name TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_pending
                ON scheduled_messages (delivered, scheduled_time);
            CREATE INDEX IF NOT EXISTS idx_contacts_pending
                ON scheduled_contacts (notified, scheduled_time);
            CREATE INDEX IF NOT EXISTS idx_messages_lead ON scheduled_messages (lead_id);
            CREATE INDEX IF NOT EXISTS idx_contacts_lead ON scheduled_contacts (lead_id);
            CREATE INDEX IF NOT EXISTS idx_leads_user ON leads (user_id);
            ",
        )
        .map_err(|e| CrmError::Database(format!("Migration: {e}")))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CrmError::Database(format!("Lock: {e}")))
    }
}

pub(crate) fn db_err(e: rusqlite::Error) -> CrmError {
    CrmError::Database(e.to_string())
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
pub(crate) fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn ts_col(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(idx, &raw)
}

pub(crate) fn opt_ts_col(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Keep good rows; log and drop rows that fail to decode.
pub(crate) fn collect_rows<T, I>(rows: I, what: &str) -> Vec<T>
where
    I: Iterator<Item = rusqlite::Result<T>>,
{
    rows.filter_map(|r| match r {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("⚠️ Skipping malformed {what} row: {e}");
            None
        }
    })
    .collect()
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_open_and_migrate() {
        let dir = std::env::temp_dir().join("leadcrm-db-open-test");
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("crm.db");
        {
            let db = CrmDb::open(&path).unwrap();
            assert!(db.list_users().unwrap().is_empty());
        }
        // Re-open runs migrations again without error.
        assert!(CrmDb::open(&path).is_ok());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_timestamp_format_sorts() {
        let a = Utc.with_ymd_and_hms(2026, 1, 2, 9, 0, 0).unwrap();
        let b = a + chrono::Duration::milliseconds(1500);
        assert!(ts(a) < ts(b));
        assert_eq!(ts(a), "2026-01-02T09:00:00.000000Z");
    }
}
