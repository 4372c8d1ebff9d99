use chrono::Utc;
use rusqlite::{params, Row};

use pastel_core::User;

use super::super::{not_found_or, SqliteDatabase, SqliteResultExt};
use crate::DbError;

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        created_at: row.get("created_at")?,
    })
}

impl SqliteDatabase {
    /// Create a user. A taken username is `DbError::Conflict`.
    pub fn create_user(&self, username: &str) -> Result<User, DbError> {
        self.with_conn(|conn| {
            let id = pastel_core::ids::generate_id();
            conn.execute(
                "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
                params![id, username, Utc::now()],
            )
            .to_db()?;
            conn.query_row("SELECT * FROM users WHERE id = ?1", params![id], row_to_user)
                .to_db()
        })
    }

    pub fn get_user(&self, id: &str) -> Result<User, DbError> {
        self.with_reader(|conn| {
            conn.query_row("SELECT * FROM users WHERE id = ?1", params![id], row_to_user)
                .map_err(not_found_or(|| format!("user {id}")))
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<User, DbError> {
        self.with_reader(|conn| {
            conn.query_row(
                "SELECT * FROM users WHERE username = ?1",
                params![username],
                row_to_user,
            )
            .map_err(not_found_or(|| format!("user '{username}'")))
        })
    }
}
