use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};

use pastel_core::{Paste, Visibility};

use super::super::{not_found_or, SqliteDatabase, SqliteResultExt};
use super::attachments;
use crate::DbError;

const NOT_EXPIRED: &str = "(p.expires_at IS NULL OR p.expires_at > :now)";

pub(crate) fn row_to_paste(row: &Row) -> rusqlite::Result<Paste> {
    let visibility_str: String = row.get("visibility")?;
    let visibility = Visibility::parse_str(&visibility_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            Type::Text,
            format!("unknown visibility '{visibility_str}'").into(),
        )
    })?;
    Ok(Paste {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        slug: row.get("slug")?,
        content: row.get("content")?,
        content_format: row.get("content_format")?,
        visibility,
        created_at: row.get("created_at")?,
        expires_at: row.get("expires_at")?,
    })
}

pub(crate) fn insert(conn: &Connection, paste: &Paste) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO pastes
            (id, owner_id, slug, content, content_format, visibility, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            paste.id,
            paste.owner_id,
            paste.slug,
            paste.content,
            paste.content_format,
            paste.visibility.as_str(),
            paste.created_at,
            paste.expires_at,
        ],
    )
    .to_db()?;
    Ok(())
}

pub(crate) fn delete(conn: &Connection, id: &str) -> Result<(), DbError> {
    let changed = conn
        .execute("DELETE FROM pastes WHERE id = ?1", params![id])
        .to_db()?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("paste {id}")));
    }
    Ok(())
}

pub(crate) fn owner_of(conn: &Connection, id: &str) -> Result<String, DbError> {
    conn.query_row(
        "SELECT owner_id FROM pastes WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )
    .map_err(not_found_or(|| format!("paste {id}")))
}

/// Result of [`SqliteDatabase::purge_expired`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Purged {
    pub pastes: usize,
    /// Attachments whose rows went with their pastes; their blobs still need
    /// deleting.
    pub attachment_ids: Vec<String>,
}

impl SqliteDatabase {
    /// Fetch an unexpired paste by id. Visibility is the caller's concern.
    pub fn get_paste(&self, id: &str, now: DateTime<Utc>) -> Result<Paste, DbError> {
        self.get_paste_with_owner(id, now).map(|(paste, _)| paste)
    }

    /// Fetch an unexpired paste by id together with its owner's username.
    pub fn get_paste_with_owner(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Paste, String), DbError> {
        self.with_reader(|conn| {
            conn.query_row(
                &format!(
                    "SELECT p.*, u.username AS owner_username
                     FROM pastes p JOIN users u ON u.id = p.owner_id
                     WHERE p.id = :id AND {NOT_EXPIRED}"
                ),
                rusqlite::named_params! { ":id": id, ":now": now },
                |row| Ok((row_to_paste(row)?, row.get("owner_username")?)),
            )
            .map_err(not_found_or(|| format!("paste {id}")))
        })
    }

    /// Fetch an unexpired paste by owner username and slug.
    pub fn get_paste_by_slug(
        &self,
        username: &str,
        slug: &str,
        now: DateTime<Utc>,
    ) -> Result<Paste, DbError> {
        self.with_reader(|conn| {
            conn.query_row(
                &format!(
                    "SELECT p.* FROM pastes p JOIN users u ON u.id = p.owner_id
                     WHERE u.username = :username AND p.slug = :slug AND {NOT_EXPIRED}"
                ),
                rusqlite::named_params! { ":username": username, ":slug": slug, ":now": now },
                row_to_paste,
            )
            .map_err(not_found_or(|| format!("paste {username}/{slug}")))
        })
    }

    /// Most recent unexpired public pastes, newest first.
    pub fn list_latest_public_pastes(
        &self,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Paste>, DbError> {
        self.with_reader(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT p.* FROM pastes p
                     WHERE p.visibility = 'public' AND {NOT_EXPIRED}
                     ORDER BY p.created_at DESC, p.id DESC
                     LIMIT :limit"
                ))
                .to_db()?;
            let pastes = stmt
                .query_map(
                    rusqlite::named_params! { ":now": now, ":limit": limit },
                    row_to_paste,
                )
                .to_db()?
                .collect::<Result<Vec<_>, _>>()
                .to_db()?;
            Ok(pastes)
        })
    }

    /// Unexpired pastes of the user `owner_id`, newest first. Only public
    /// ones unless `include_non_public` is set.
    pub fn list_pastes_by_owner(
        &self,
        owner_id: &str,
        include_non_public: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<Paste>, DbError> {
        self.with_reader(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT p.* FROM pastes p
                     WHERE p.owner_id = :owner_id
                       AND (:all OR p.visibility = 'public')
                       AND {NOT_EXPIRED}
                     ORDER BY p.created_at DESC, p.id DESC"
                ))
                .to_db()?;
            let pastes = stmt
                .query_map(
                    rusqlite::named_params! {
                        ":owner_id": owner_id,
                        ":all": include_non_public,
                        ":now": now,
                    },
                    row_to_paste,
                )
                .to_db()?
                .collect::<Result<Vec<_>, _>>()
                .to_db()?;
            Ok(pastes)
        })
    }

    /// Delete every paste that expired at or before `now`.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<Purged, DbError> {
        self.in_transaction(|tx| {
            let conn = tx.conn();
            let mut stmt = conn
                .prepare("SELECT id FROM pastes WHERE expires_at IS NOT NULL AND expires_at <= ?1")
                .to_db()?;
            let ids = stmt
                .query_map(params![now], |row| row.get::<_, String>(0))
                .to_db()?
                .collect::<Result<Vec<_>, _>>()
                .to_db()?;

            let mut purged = Purged::default();
            for id in ids {
                purged
                    .attachment_ids
                    .extend(attachments::ids_for_paste(conn, &id)?);
                delete(conn, &id)?;
                purged.pastes += 1;
            }
            Ok(purged)
        })
    }
}
