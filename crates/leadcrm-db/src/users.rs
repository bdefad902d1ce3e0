use chrono::Utc;
use leadcrm_core::error::{CrmError, Result};
use leadcrm_core::types::{NewUser, User};
use rusqlite::{OptionalExtension, params};

use crate::{CrmDb, collect_rows, db_err, ts, ts_col};

const USER_COLUMNS: &str = "id, username, email, phone_number, created_at, is_active";

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        phone_number: row.get(3)?,
        created_at: ts_col(row, 4)?,
        is_active: row.get::<_, i32>(5)? != 0,
    })
}

impl CrmDb {
    /// Register a user. Usernames and emails are unique.
    pub fn create_user(&self, new: &NewUser) -> Result<User> {
        new.validate()?;
        let conn = self.conn()?;

        let taken: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE username = ?1 OR email = ?2",
                params![new.username, new.email],
                |r| r.get(0),
            )
            .map_err(db_err)?;
        if taken > 0 {
            return Err(CrmError::Validation(format!(
                "username '{}' or email '{}' already registered",
                new.username, new.email
            )));
        }

        conn.execute(
            "INSERT INTO users (username, email, phone_number, created_at, is_active)
             VALUES (?1, ?2, ?3, ?4, 1)",
            params![new.username, new.email, new.phone_number, ts(Utc::now())],
        )
        .map_err(db_err)?;
        let id = conn.last_insert_rowid();
        tracing::info!("👤 User created: {} ({})", new.username, id);

        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [id],
            user_from_row,
        )
        .map_err(db_err)
    }

    pub fn get_user(&self, id: i64) -> Result<User> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [id],
            user_from_row,
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| CrmError::not_found("user", id))
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))
            .map_err(db_err)?;
        let rows = stmt.query_map([], user_from_row).map_err(db_err)?;
        Ok(collect_rows(rows, "user"))
    }
}
