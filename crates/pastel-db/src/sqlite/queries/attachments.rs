use rusqlite::{params, Connection, Row};

use pastel_core::Attachment;

use super::super::{not_found_or, SqliteDatabase, SqliteResultExt};
use crate::DbError;

fn row_to_attachment(row: &Row) -> rusqlite::Result<Attachment> {
    Ok(Attachment {
        id: row.get("id")?,
        paste_id: row.get("paste_id")?,
        slug: row.get("slug")?,
        mime_type: row.get("mime_type")?,
        size: row.get("size")?,
        checksum: row.get("checksum")?,
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn insert(conn: &Connection, attachment: &Attachment) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO attachments (id, paste_id, slug, mime_type, size, checksum, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            attachment.id,
            attachment.paste_id,
            attachment.slug,
            attachment.mime_type,
            attachment.size,
            attachment.checksum,
            attachment.created_at,
        ],
    )
    .to_db()?;
    Ok(())
}

pub(crate) fn ids_for_paste(conn: &Connection, paste_id: &str) -> Result<Vec<String>, DbError> {
    let mut stmt = conn
        .prepare("SELECT id FROM attachments WHERE paste_id = ?1 ORDER BY id")
        .to_db()?;
    let ids = stmt
        .query_map(params![paste_id], |row| row.get(0))
        .to_db()?
        .collect::<Result<Vec<String>, _>>()
        .to_db()?;
    Ok(ids)
}

impl SqliteDatabase {
    pub fn get_attachment_by_slug(
        &self,
        paste_id: &str,
        slug: &str,
    ) -> Result<Attachment, DbError> {
        self.with_reader(|conn| {
            conn.query_row(
                "SELECT * FROM attachments WHERE paste_id = ?1 AND slug = ?2",
                params![paste_id, slug],
                row_to_attachment,
            )
            .map_err(not_found_or(|| format!("attachment {paste_id}/{slug}")))
        })
    }

    /// Attachments of a paste, in upload order.
    pub fn list_attachments(&self, paste_id: &str) -> Result<Vec<Attachment>, DbError> {
        self.with_reader(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM attachments WHERE paste_id = ?1 ORDER BY id")
                .to_db()?;
            let attachments = stmt
                .query_map(params![paste_id], row_to_attachment)
                .to_db()?
                .collect::<Result<Vec<_>, _>>()
                .to_db()?;
            Ok(attachments)
        })
    }

    /// Checked on the writer, so a row being inserted by an open transaction
    /// is reported once that transaction has finished.
    pub fn attachment_exists(&self, id: &str) -> Result<bool, DbError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM attachments WHERE id = ?1)",
                params![id],
                |row| row.get(0),
            )
            .to_db()
        })
    }

    pub fn count_attachments(&self) -> Result<i64, DbError> {
        self.with_reader(|conn| {
            conn.query_row("SELECT count(*) FROM attachments", [], |row| row.get(0))
                .to_db()
        })
    }
}
