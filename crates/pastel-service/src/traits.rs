use async_trait::async_trait;

use pastel_core::{Attachment, CreatePaste, Paste, PasteError, User};
use pastel_db::Purged;

use crate::AttachmentDownload;

/// Paste storage operations for request handlers and tools.
///
/// `LocalService` runs them against a local SQLite database and blob
/// directory.
#[async_trait]
pub trait PasteService: Send + Sync {
    // -- Users --
    async fn create_user(&self, username: &str) -> Result<User, PasteError>;
    async fn resolve_user(&self, username: &str) -> Result<User, PasteError>;

    // -- Writes --
    /// Persist a paste owned by `owner_id` and return its id. A slug is
    /// generated when `req.slug` is `None`.
    async fn create_paste(&self, owner_id: &str, req: CreatePaste) -> Result<String, PasteError>;
    async fn delete_paste(&self, owner_id: &str, paste_id: &str) -> Result<(), PasteError>;

    // -- Reads --
    async fn get_paste_by_slug(
        &self,
        viewer_id: &str,
        owner_username: &str,
        slug: &str,
    ) -> Result<Paste, PasteError>;
    async fn get_paste_by_id(
        &self,
        viewer_id: &str,
        paste_id: &str,
    ) -> Result<(Paste, String), PasteError>;
    async fn get_latest_public_pastes(&self, limit: u32) -> Result<Vec<Paste>, PasteError>;
    async fn list_user_pastes(
        &self,
        viewer_id: &str,
        username: &str,
    ) -> Result<Vec<Paste>, PasteError>;
    async fn list_paste_attachments(
        &self,
        viewer_id: &str,
        owner_username: &str,
        slug: &str,
    ) -> Result<Vec<Attachment>, PasteError>;
    async fn get_attachment(
        &self,
        viewer_id: &str,
        owner_username: &str,
        paste_slug: &str,
        attachment_slug: &str,
    ) -> Result<AttachmentDownload, PasteError>;

    // -- Maintenance --
    async fn purge_expired(&self) -> Result<Purged, PasteError>;
    async fn sweep_orphan_blobs(&self) -> Result<usize, PasteError>;
    async fn is_healthy(&self) -> bool;
}
