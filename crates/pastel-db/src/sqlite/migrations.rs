use chrono::Utc;
use rusqlite::{params, Connection};

use pastel_core::{ANONYMOUS_USERNAME, ANONYMOUS_USER_ID};

use super::SqliteResultExt;
use crate::DbError;

pub fn run(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )
    .to_db()?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |r| r.get(0),
        )
        .to_db()?;

    if current_version < 1 {
        // v1: users, pastes, attachments
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pastes (
                id              TEXT PRIMARY KEY,
                owner_id        TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                slug            TEXT NOT NULL,
                content         TEXT NOT NULL,
                content_format  TEXT NOT NULL,
                visibility      TEXT NOT NULL
                                    CHECK(visibility IN ('public', 'unlisted', 'private')),
                created_at      TEXT NOT NULL,
                expires_at      TEXT,
                UNIQUE (owner_id, slug)
            );
            CREATE INDEX IF NOT EXISTS idx_pastes_visibility
                ON pastes(visibility, created_at);

            CREATE TABLE IF NOT EXISTS attachments (
                id          TEXT PRIMARY KEY,
                paste_id    TEXT NOT NULL REFERENCES pastes(id) ON DELETE CASCADE,
                slug        TEXT NOT NULL,
                mime_type   TEXT NOT NULL,
                size        INTEGER NOT NULL,
                checksum    TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                UNIQUE (paste_id, slug)
            );",
        )
        .to_db()?;

        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (1, datetime('now'))",
            [],
        )
        .to_db()?;
    }

    if current_version < 2 {
        // v2: lookup by expiry for purges
        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_pastes_expires
                ON pastes(expires_at) WHERE expires_at IS NOT NULL;",
        )
        .to_db()?;

        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (2, datetime('now'))",
            [],
        )
        .to_db()?;
    }

    conn.execute(
        "INSERT OR IGNORE INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
        params![ANONYMOUS_USER_ID, ANONYMOUS_USERNAME, Utc::now()],
    )
    .to_db()?;

    Ok(())
}
