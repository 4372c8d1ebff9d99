use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

use chrono::Utc;

use pastel_core::user::is_anonymous_id;
use pastel_core::{Attachment, Paste, PasteError};
use pastel_db::SqliteDatabase;
use pastel_store::BlobStore;

use crate::storage_err;

/// An attachment's metadata together with an open stream over its bytes.
///
/// The stream is released when the download is dropped.
pub struct AttachmentDownload {
    pub attachment: Attachment,
    pub reader: Box<dyn Read + Send>,
}

impl AttachmentDownload {
    pub fn mime_type(&self) -> &str {
        &self.attachment.mime_type
    }

    /// Cache validation token for the attachment bytes.
    pub fn etag(&self) -> &str {
        &self.attachment.checksum
    }
}

impl Read for AttachmentDownload {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl fmt::Debug for AttachmentDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentDownload")
            .field("attachment", &self.attachment)
            .finish_non_exhaustive()
    }
}

/// Visibility-checked lookups over pastes and attachments.
///
/// Every lookup that the viewer may not see fails with the same `NotFound`
/// as a lookup of something that does not exist.
#[derive(Clone)]
pub struct PasteReader {
    db: SqliteDatabase,
    store: Arc<dyn BlobStore>,
}

impl PasteReader {
    pub fn new(db: SqliteDatabase, store: Arc<dyn BlobStore>) -> Self {
        Self { db, store }
    }

    pub fn get_paste_by_slug(
        &self,
        viewer_id: &str,
        owner_username: &str,
        slug: &str,
    ) -> Result<Paste, PasteError> {
        let paste = self.db.get_paste_by_slug(owner_username, slug, Utc::now())?;
        if !paste.is_visible_to(viewer_id) {
            return Err(PasteError::NotFound(format!("paste {owner_username}/{slug}")));
        }
        Ok(paste)
    }

    /// Look a paste up by id, returning it with its owner's username.
    pub fn get_paste_by_id(
        &self,
        viewer_id: &str,
        paste_id: &str,
    ) -> Result<(Paste, String), PasteError> {
        let (paste, owner) = self.db.get_paste_with_owner(paste_id, Utc::now())?;
        if !paste.is_visible_to(viewer_id) {
            return Err(PasteError::NotFound(format!("paste {paste_id}")));
        }
        Ok((paste, owner))
    }

    pub fn get_latest_public_pastes(&self, limit: u32) -> Result<Vec<Paste>, PasteError> {
        Ok(self.db.list_latest_public_pastes(limit, Utc::now())?)
    }

    /// Pastes of `username`: all of them for the owner, public ones for
    /// everyone else.
    pub fn list_user_pastes(
        &self,
        viewer_id: &str,
        username: &str,
    ) -> Result<Vec<Paste>, PasteError> {
        let owner = self.db.get_user_by_username(username)?;
        let is_owner = owner.id == viewer_id && !is_anonymous_id(viewer_id);
        Ok(self.db.list_pastes_by_owner(&owner.id, is_owner, Utc::now())?)
    }

    pub fn list_paste_attachments(
        &self,
        viewer_id: &str,
        owner_username: &str,
        slug: &str,
    ) -> Result<Vec<Attachment>, PasteError> {
        let paste = self.get_paste_by_slug(viewer_id, owner_username, slug)?;
        Ok(self.db.list_attachments(&paste.id)?)
    }

    /// Open an attachment for download after checking the parent paste is
    /// visible to `viewer_id`.
    pub fn get_attachment(
        &self,
        viewer_id: &str,
        owner_username: &str,
        paste_slug: &str,
        attachment_slug: &str,
    ) -> Result<AttachmentDownload, PasteError> {
        let paste = self.get_paste_by_slug(viewer_id, owner_username, paste_slug)?;
        let attachment = self.db.get_attachment_by_slug(&paste.id, attachment_slug)?;
        let reader = self.store.read(&attachment.id).map_err(storage_err)?;
        Ok(AttachmentDownload { attachment, reader })
    }
}
