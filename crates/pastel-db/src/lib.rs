pub mod sqlite;

pub use sqlite::queries::Purged;
pub use sqlite::{PasteTx, SqliteDatabase};

pub use pastel_core::paths::data_dir;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DbError> for pastel_core::PasteError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(msg) => pastel_core::PasteError::NotFound(msg),
            DbError::Conflict(msg) => pastel_core::PasteError::Conflict(msg),
            other => pastel_core::PasteError::Persistence(other.to_string()),
        }
    }
}

/// Configuration for the metadata database.
#[derive(Debug, Clone, Default)]
pub struct DbConfig {
    /// Path to the SQLite file. `None` uses `<data dir>/pastel.db`.
    pub sqlite_path: Option<String>,
}

impl DbConfig {
    /// Build from `PASTEL_DB_PATH`.
    pub fn from_env() -> Self {
        Self {
            sqlite_path: std::env::var("PASTEL_DB_PATH").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pastel_core::PasteError;

    #[test]
    fn db_errors_map_onto_paste_errors() {
        assert!(matches!(
            PasteError::from(DbError::NotFound("paste x".into())),
            PasteError::NotFound(_)
        ));
        assert!(matches!(
            PasteError::from(DbError::Conflict("slug".into())),
            PasteError::Conflict(_)
        ));
        assert!(matches!(
            PasteError::from(DbError::Internal("disk I/O error".into())),
            PasteError::Persistence(_)
        ));
    }
}
