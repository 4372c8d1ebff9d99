use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use pastel_core::user::is_anonymous_id;
use pastel_core::{Attachment, CreatePaste, Paste, PasteError, User, Visibility};
use pastel_db::{Purged, SqliteDatabase};
use pastel_store::BlobStore;

use crate::{AttachmentDownload, CoordinatorConfig, PasteCoordinator, PasteReader, PasteService};

/// `PasteService` over a local SQLite database and blob store.
///
/// The storage layer is blocking, so every call runs on tokio's blocking
/// pool.
#[derive(Clone)]
pub struct LocalService {
    coordinator: PasteCoordinator,
    reader: PasteReader,
    config: CoordinatorConfig,
}

impl LocalService {
    pub fn new(db: SqliteDatabase, store: Arc<dyn BlobStore>, config: CoordinatorConfig) -> Self {
        Self {
            coordinator: PasteCoordinator::new(db.clone(), Arc::clone(&store)),
            reader: PasteReader::new(db, store),
            config,
        }
    }

    pub fn coordinator(&self) -> &PasteCoordinator {
        &self.coordinator
    }

    pub fn reader(&self) -> &PasteReader {
        &self.reader
    }
}

async fn blocking<F, T>(f: F) -> Result<T, PasteError>
where
    F: FnOnce() -> Result<T, PasteError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PasteError::Persistence(format!("blocking task failed: {e}")))?
}

#[async_trait]
impl PasteService for LocalService {
    async fn create_user(&self, username: &str) -> Result<User, PasteError> {
        let db = self.coordinator.db().clone();
        let username = username.to_string();
        blocking(move || Ok(db.create_user(&username)?)).await
    }

    async fn resolve_user(&self, username: &str) -> Result<User, PasteError> {
        let db = self.coordinator.db().clone();
        let username = username.to_string();
        blocking(move || Ok(db.get_user_by_username(&username)?)).await
    }

    async fn create_paste(
        &self,
        owner_id: &str,
        mut req: CreatePaste,
    ) -> Result<String, PasteError> {
        if is_anonymous_id(owner_id) && req.visibility != Visibility::Public {
            debug!("anonymous paste requested as {}, storing as public", req.visibility);
            req.visibility = Visibility::Public;
        }
        let coordinator = self.coordinator.clone();
        let owner_id = owner_id.to_string();
        let config = self.config;
        blocking(move || {
            coordinator.create_paste_with_random_slug(
                &owner_id,
                &req,
                config.slug_length,
                config.slug_attempts,
            )
        })
        .await
    }

    async fn delete_paste(&self, owner_id: &str, paste_id: &str) -> Result<(), PasteError> {
        let coordinator = self.coordinator.clone();
        let (owner_id, paste_id) = (owner_id.to_string(), paste_id.to_string());
        blocking(move || coordinator.delete_paste(&owner_id, &paste_id)).await
    }

    async fn get_paste_by_slug(
        &self,
        viewer_id: &str,
        owner_username: &str,
        slug: &str,
    ) -> Result<Paste, PasteError> {
        let reader = self.reader.clone();
        let (viewer_id, owner_username, slug) = (
            viewer_id.to_string(),
            owner_username.to_string(),
            slug.to_string(),
        );
        blocking(move || reader.get_paste_by_slug(&viewer_id, &owner_username, &slug)).await
    }

    async fn get_paste_by_id(
        &self,
        viewer_id: &str,
        paste_id: &str,
    ) -> Result<(Paste, String), PasteError> {
        let reader = self.reader.clone();
        let (viewer_id, paste_id) = (viewer_id.to_string(), paste_id.to_string());
        blocking(move || reader.get_paste_by_id(&viewer_id, &paste_id)).await
    }

    async fn get_latest_public_pastes(&self, limit: u32) -> Result<Vec<Paste>, PasteError> {
        let reader = self.reader.clone();
        blocking(move || reader.get_latest_public_pastes(limit)).await
    }

    async fn list_user_pastes(
        &self,
        viewer_id: &str,
        username: &str,
    ) -> Result<Vec<Paste>, PasteError> {
        let reader = self.reader.clone();
        let (viewer_id, username) = (viewer_id.to_string(), username.to_string());
        blocking(move || reader.list_user_pastes(&viewer_id, &username)).await
    }

    async fn list_paste_attachments(
        &self,
        viewer_id: &str,
        owner_username: &str,
        slug: &str,
    ) -> Result<Vec<Attachment>, PasteError> {
        let reader = self.reader.clone();
        let (viewer_id, owner_username, slug) = (
            viewer_id.to_string(),
            owner_username.to_string(),
            slug.to_string(),
        );
        blocking(move || reader.list_paste_attachments(&viewer_id, &owner_username, &slug)).await
    }

    async fn get_attachment(
        &self,
        viewer_id: &str,
        owner_username: &str,
        paste_slug: &str,
        attachment_slug: &str,
    ) -> Result<AttachmentDownload, PasteError> {
        let reader = self.reader.clone();
        let (viewer_id, owner_username, paste_slug, attachment_slug) = (
            viewer_id.to_string(),
            owner_username.to_string(),
            paste_slug.to_string(),
            attachment_slug.to_string(),
        );
        blocking(move || {
            reader.get_attachment(&viewer_id, &owner_username, &paste_slug, &attachment_slug)
        })
        .await
    }

    async fn purge_expired(&self) -> Result<Purged, PasteError> {
        let coordinator = self.coordinator.clone();
        blocking(move || coordinator.purge_expired(Utc::now())).await
    }

    async fn sweep_orphan_blobs(&self) -> Result<usize, PasteError> {
        let coordinator = self.coordinator.clone();
        blocking(move || coordinator.sweep_orphan_blobs()).await
    }

    async fn is_healthy(&self) -> bool {
        let db = self.coordinator.db().clone();
        blocking(move || Ok(db.ping()?)).await.is_ok()
    }
}
