mod coordinator;
mod local;
mod reader;
mod traits;

pub use coordinator::{CoordinatorConfig, PasteCoordinator, STALE_PARTIAL_AGE};
pub use local::LocalService;
pub use pastel_db::Purged;
pub use reader::{AttachmentDownload, PasteReader};
pub use traits::PasteService;

use pastel_core::PasteError;
use pastel_store::StoreError;

/// Blob store failures surface as `PasteError::Storage`, including a
/// missing blob behind an existing attachment row.
pub(crate) fn storage_err(e: StoreError) -> PasteError {
    PasteError::Storage(e.to_string())
}
