use rusqlite::Connection;

use pastel_core::{Attachment, Paste};

use super::queries::{attachments, pastes};
use crate::DbError;

/// Statements available inside [`SqliteDatabase::in_transaction`].
///
/// [`SqliteDatabase::in_transaction`]: super::SqliteDatabase::in_transaction
pub struct PasteTx<'a> {
    conn: &'a Connection,
}

impl<'a> PasteTx<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub(crate) fn conn(&self) -> &'a Connection {
        self.conn
    }

    /// Insert a paste row. A duplicate `(owner_id, slug)` is `DbError::Conflict`.
    pub fn insert_paste(&self, paste: &Paste) -> Result<(), DbError> {
        pastes::insert(self.conn, paste)
    }

    /// Insert an attachment row. A duplicate `(paste_id, slug)` is
    /// `DbError::Conflict`.
    pub fn insert_attachment(&self, attachment: &Attachment) -> Result<(), DbError> {
        attachments::insert(self.conn, attachment)
    }

    /// Owner id of a paste, expired or not.
    pub fn paste_owner(&self, paste_id: &str) -> Result<String, DbError> {
        pastes::owner_of(self.conn, paste_id)
    }

    /// Delete a paste and its attachment rows, returning the ids of the
    /// removed attachments.
    pub fn delete_paste(&self, paste_id: &str) -> Result<Vec<String>, DbError> {
        let attachment_ids = attachments::ids_for_paste(self.conn, paste_id)?;
        pastes::delete(self.conn, paste_id)?;
        Ok(attachment_ids)
    }
}
