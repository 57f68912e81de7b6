use anyhow::Result;
use rusqlite::Connection;

use retro_types::models::UserId;

use crate::models::UserRow;
use crate::time::{now_text, parse_time_lossy};
use crate::{Database, OptionalExt};

impl Database {
    /// Accounts are owned by the account subsystem; this exists so the
    /// realtime core has identities to work with.
    pub fn create_user(&self, username: &str, display_name: &str, avatar_url: &str) -> Result<UserId> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (username, display_name, avatar_url, created_at) VALUES (?1, ?2, ?3, ?4)",
                (username, display_name, avatar_url, now_text()),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user(&self, id: UserId) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, id))
    }
}

fn query_user(conn: &Connection, id: UserId) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, display_name, avatar_url, created_at FROM users WHERE id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            let created_at: String = row.get(4)?;
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                display_name: row.get(2)?,
                avatar_url: row.get(3)?,
                created_at: parse_time_lossy(&created_at, "user"),
            })
        })
        .optional()?;

    Ok(row)
}

pub(crate) fn user_exists(conn: &Connection, id: UserId) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM users WHERE id = ?1", [id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}
