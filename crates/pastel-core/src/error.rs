use thiserror::Error;

/// Errors surfaced by paste operations.
///
/// `NotFound` covers both absent records and records the viewer may not see;
/// callers cannot tell the two apart.
#[derive(Debug, Error)]
pub enum PasteError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl PasteError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, PasteError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PasteError::NotFound(_))
    }
}
