use std::collections::HashSet;
use std::io::{Seek, SeekFrom};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use pastel_core::checksum::{self, ChecksumReader};
use pastel_core::{ids, Attachment, CreatePaste, NewAttachment, Paste, PasteError};
use pastel_db::{DbError, PasteTx, Purged, SqliteDatabase};
use pastel_store::BlobStore;

use crate::storage_err;

/// Partial blob files untouched this long belong to writes that will never
/// finish.
pub const STALE_PARTIAL_AGE: Duration = Duration::from_secs(60 * 60);

/// Slug generation settings for submissions without a slug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub slug_length: usize,
    pub slug_attempts: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            slug_length: ids::DEFAULT_SLUG_LENGTH,
            slug_attempts: 5,
        }
    }
}

/// Writes pastes and their attachments across the metadata database and the
/// blob store.
///
/// A paste becomes visible only once its row, every attachment row and every
/// attachment blob exist. Failures roll the metadata back and remove any
/// blobs this operation already wrote.
#[derive(Clone)]
pub struct PasteCoordinator {
    db: SqliteDatabase,
    store: Arc<dyn BlobStore>,
}

impl PasteCoordinator {
    pub fn new(db: SqliteDatabase, store: Arc<dyn BlobStore>) -> Self {
        Self { db, store }
    }

    pub fn db(&self) -> &SqliteDatabase {
        &self.db
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Persist a paste under the slug given in `req`, returning its id.
    pub fn create_paste(&self, owner_id: &str, req: &CreatePaste) -> Result<String, PasteError> {
        let slug = req
            .slug
            .as_deref()
            .ok_or_else(|| PasteError::ValidationFailed("paste slug is required".into()))?;
        self.create_with_slug(owner_id, slug, req)
    }

    /// Persist a paste, generating a slug unless `req` carries one.
    ///
    /// A generated slug that collides with an existing paste of the same
    /// owner is replaced and retried, up to `attempts` tries in total.
    pub fn create_paste_with_random_slug(
        &self,
        owner_id: &str,
        req: &CreatePaste,
        slug_length: usize,
        attempts: u32,
    ) -> Result<String, PasteError> {
        if req.slug.is_some() {
            return self.create_paste(owner_id, req);
        }
        if slug_length == 0 {
            return Err(PasteError::ValidationFailed(
                "generated slug length must be at least 1".into(),
            ));
        }
        // With distinct attachment slugs the only possible conflict is the
        // paste slug itself.
        check_attachment_slugs(&req.attachments)?;

        let mut last_err = None;
        for attempt in 1..=attempts.max(1) {
            let slug = ids::generate_slug(slug_length);
            match self.create_with_slug(owner_id, &slug, req) {
                Err(e) if e.is_conflict() => {
                    debug!("generated slug {slug} taken (attempt {attempt})");
                    last_err = Some(e);
                }
                other => return other,
            }
        }
        Err(last_err.unwrap_or_else(|| PasteError::Conflict("no free slug".into())))
    }

    fn create_with_slug(
        &self,
        owner_id: &str,
        slug: &str,
        req: &CreatePaste,
    ) -> Result<String, PasteError> {
        let now = Utc::now();
        let paste = Paste {
            id: ids::generate_id(),
            owner_id: owner_id.to_string(),
            slug: slug.to_string(),
            content: req.content.clone(),
            content_format: req.content_format.clone(),
            visibility: req.visibility,
            created_at: now,
            expires_at: req.expires_at,
        };

        let mut written = Vec::new();
        let result = self.db.in_transaction(|tx| {
            tx.insert_paste(&paste).map_err(|e| match e {
                DbError::Conflict(_) => {
                    PasteError::Conflict(format!("paste slug '{slug}' is already taken"))
                }
                other => other.into(),
            })?;
            for new in &req.attachments {
                let attachment_id = self.store_attachment(tx, &paste.id, new, now)?;
                written.push(attachment_id);
            }
            Ok::<_, PasteError>(paste.id.clone())
        });

        match result {
            Ok(id) => {
                info!(
                    "created paste {id} ({slug}) with {} attachment(s)",
                    written.len()
                );
                Ok(id)
            }
            Err(e) => {
                self.discard_blobs(&written);
                Err(e)
            }
        }
    }

    /// Checksum, record and store one attachment inside the creating
    /// transaction. Returns the new attachment id once its blob is written.
    fn store_attachment(
        &self,
        tx: &PasteTx<'_>,
        paste_id: &str,
        new: &NewAttachment,
        now: DateTime<Utc>,
    ) -> Result<String, PasteError> {
        let source_err =
            |e: std::io::Error| PasteError::Storage(format!("attachment '{}': {e}", new.slug));

        let mut reader = new.source.open().map_err(source_err)?;
        let checksum = checksum::checksum(&mut reader).map_err(source_err)?;
        reader.seek(SeekFrom::Start(0)).map_err(source_err)?;

        let attachment = Attachment {
            id: ids::generate_id(),
            paste_id: paste_id.to_string(),
            slug: new.slug.clone(),
            mime_type: new.mime_type.clone(),
            size: new.size,
            checksum,
            created_at: now,
        };
        tx.insert_attachment(&attachment).map_err(|e| match e {
            DbError::Conflict(_) => PasteError::Conflict(format!(
                "attachment slug '{}' is used more than once",
                new.slug
            )),
            other => other.into(),
        })?;

        let mut hashing = ChecksumReader::new(reader);
        let stored = self
            .store
            .write(&attachment.id, &mut hashing)
            .map_err(storage_err)?;
        if hashing.finish() != attachment.checksum {
            // The row is rolled back with the transaction; the blob is not.
            self.discard_blobs(std::slice::from_ref(&attachment.id));
            return Err(PasteError::Storage(format!(
                "attachment '{}' changed while being stored",
                new.slug
            )));
        }
        debug!(
            "stored attachment {} ({stored} bytes, declared {})",
            attachment.id, attachment.size
        );
        Ok(attachment.id)
    }

    /// Delete a paste owned by `owner_id`, along with its attachments.
    ///
    /// Pastes of other owners, and all pastes when called as the anonymous
    /// user, are reported as `NotFound`.
    pub fn delete_paste(&self, owner_id: &str, paste_id: &str) -> Result<(), PasteError> {
        let not_found = || PasteError::NotFound(format!("paste {paste_id}"));
        if pastel_core::user::is_anonymous_id(owner_id) {
            return Err(not_found());
        }
        let attachment_ids = self.db.in_transaction(|tx| {
            if tx.paste_owner(paste_id)? != owner_id {
                return Err(not_found());
            }
            Ok(tx.delete_paste(paste_id)?)
        })?;
        self.discard_blobs(&attachment_ids);
        info!(
            "deleted paste {paste_id} and {} attachment(s)",
            attachment_ids.len()
        );
        Ok(())
    }

    /// Delete every paste that has expired by `now`, then their blobs.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<Purged, PasteError> {
        let purged = self.db.purge_expired(now)?;
        self.discard_blobs(&purged.attachment_ids);
        if purged.pastes > 0 {
            info!(
                "purged {} expired paste(s), {} attachment(s)",
                purged.pastes,
                purged.attachment_ids.len()
            );
        }
        Ok(purged)
    }

    /// Remove blobs that no attachment row refers to, and partial blob files
    /// left by interrupted writes. Returns how many files were removed.
    ///
    /// Blobs are written while the creating transaction holds the database,
    /// so an existence check for a blob still being committed waits for that
    /// transaction to finish.
    pub fn sweep_orphan_blobs(&self) -> Result<usize, PasteError> {
        let mut removed = 0;
        for id in self.store.list().map_err(storage_err)? {
            if self.db.attachment_exists(&id)? {
                continue;
            }
            self.store.delete(&id).map_err(storage_err)?;
            debug!("removed orphaned blob {id}");
            removed += 1;
        }
        removed += self
            .store
            .sweep_partials(STALE_PARTIAL_AGE)
            .map_err(storage_err)?;
        if removed > 0 {
            info!("swept {removed} orphaned blob file(s)");
        }
        Ok(removed)
    }

    fn discard_blobs(&self, ids: &[String]) {
        for id in ids {
            if let Err(e) = self.store.delete(id) {
                warn!("failed to remove blob {id}: {e}");
            }
        }
    }
}

fn check_attachment_slugs(attachments: &[NewAttachment]) -> Result<(), PasteError> {
    let mut seen = HashSet::new();
    for attachment in attachments {
        if !seen.insert(attachment.slug.as_str()) {
            return Err(PasteError::Conflict(format!(
                "attachment slug '{}' is used more than once",
                attachment.slug
            )));
        }
    }
    Ok(())
}
