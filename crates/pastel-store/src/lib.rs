mod local;

pub use local::LocalBlobStore;

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid blob key: {0:?}")]
    InvalidKey(String),

    #[error("store error: {0}")]
    Internal(String),
}

/// Storage for attachment bytes, keyed by attachment id.
pub trait BlobStore: Send + Sync {
    /// Write (create or overwrite) a blob from `reader`, returning the number
    /// of bytes stored. A failed write leaves no blob behind.
    fn write(&self, id: &str, reader: &mut dyn Read) -> Result<u64, StoreError>;

    /// Open a blob for reading. Returns `StoreError::NotFound` if absent.
    fn read(&self, id: &str) -> Result<Box<dyn Read + Send>, StoreError>;

    /// Delete a blob. No-op if absent.
    fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Check if a blob exists.
    fn exists(&self, id: &str) -> Result<bool, StoreError> {
        match self.read(id) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Ids of every complete blob, sorted.
    fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Remove leftovers of interrupted writes untouched for at least
    /// `older_than`, returning how many were removed. Stores that never
    /// leave partial data have nothing to do.
    fn sweep_partials(&self, _older_than: Duration) -> Result<usize, StoreError> {
        Ok(0)
    }
}

/// Reject keys that could escape the store root.
pub(crate) fn check_key(id: &str) -> Result<(), StoreError> {
    if id.is_empty()
        || id == "."
        || id.contains("..")
        || id.contains('/')
        || id.contains('\\')
        || id.contains('\0')
    {
        return Err(StoreError::InvalidKey(id.to_string()));
    }
    Ok(())
}

// -- Configuration --

/// Configuration for the blob store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Absolute directory holding attachment blobs.
    pub root: PathBuf,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Build from `PASTEL_ATTACHMENTS_PATH`, falling back to
    /// `<data dir>/attachments`.
    pub fn from_env() -> Self {
        let root = std::env::var_os("PASTEL_ATTACHMENTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| pastel_core::paths::data_dir().join("attachments"));
        Self { root }
    }
}

// -- Factory --

/// Create a `BlobStore` from configuration.
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn BlobStore>, StoreError> {
    Ok(Arc::new(LocalBlobStore::new(config)?))
}
