use chrono::Utc;
use leadcrm_core::error::{CrmError, Result};
use leadcrm_core::types::{MessageTemplate, NewTemplate};
use rusqlite::{Connection, OptionalExtension, params};

use crate::{CrmDb, collect_rows, db_err, ts, ts_col};

const TEMPLATE_COLUMNS: &str = "id, user_id, name, content, created_at, updated_at";

fn template_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageTemplate> {
    Ok(MessageTemplate {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        content: row.get(3)?,
        created_at: ts_col(row, 4)?,
        updated_at: ts_col(row, 5)?,
    })
}

fn find_template(conn: &Connection, user_id: i64, id: i64) -> Result<MessageTemplate> {
    conn.query_row(
        &format!("SELECT {TEMPLATE_COLUMNS} FROM message_templates WHERE id = ?1 AND user_id = ?2"),
        params![id, user_id],
        template_from_row,
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| CrmError::not_found("template", id))
}

impl CrmDb {
    pub fn create_template(&self, user_id: i64, new: &NewTemplate) -> Result<MessageTemplate> {
        new.validate()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO message_templates (user_id, name, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![user_id, new.name.trim(), new.content, ts(Utc::now())],
        )
        .map_err(db_err)?;
        find_template(&conn, user_id, conn.last_insert_rowid())
    }

    pub fn get_template(&self, user_id: i64, id: i64) -> Result<MessageTemplate> {
        let conn = self.conn()?;
        find_template(&conn, user_id, id)
    }

    /// Templates of a user, newest first.
    pub fn list_templates(&self, user_id: i64) -> Result<Vec<MessageTemplate>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TEMPLATE_COLUMNS} FROM message_templates
                 WHERE user_id = ?1 ORDER BY created_at DESC, id DESC"
            ))
            .map_err(db_err)?;
        let rows = stmt.query_map([user_id], template_from_row).map_err(db_err)?;
        Ok(collect_rows(rows, "template"))
    }

    pub fn save_template(&self, template: &MessageTemplate) -> Result<MessageTemplate> {
        NewTemplate {
            name: template.name.clone(),
            content: template.content.clone(),
        }
        .validate()?;
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE message_templates SET name = ?1, content = ?2, updated_at = ?3
                 WHERE id = ?4 AND user_id = ?5",
                params![
                    template.name.trim(),
                    template.content,
                    ts(Utc::now()),
                    template.id,
                    template.user_id
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(CrmError::not_found("template", template.id));
        }
        find_template(&conn, template.user_id, template.id)
    }

    pub fn delete_template(&self, user_id: i64, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM message_templates WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .map_err(db_err)?;
        if removed == 0 {
            return Err(CrmError::not_found("template", id));
        }
        Ok(())
    }
}
