pub(crate) mod migrations;
pub mod queries;
mod tx;

pub use tx::PasteTx;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use rusqlite::{Connection, TransactionBehavior};
use tracing::debug;

use crate::{DbConfig, DbError};

/// Extension trait that converts `rusqlite::Result<T>` into `Result<T, DbError>`.
///
/// Calling `.to_db()?` is the shortest way to map rusqlite errors inside the
/// query modules.
pub(crate) trait SqliteResultExt<T> {
    fn to_db(self) -> Result<T, DbError>;
}

impl<T> SqliteResultExt<T> for rusqlite::Result<T> {
    fn to_db(self) -> Result<T, DbError> {
        self.map_err(map_sqlite_err)
    }
}

/// Map a `rusqlite::Error` into a `DbError`, singling out uniqueness
/// violations as `DbError::Conflict`.
pub(crate) fn map_sqlite_err(e: rusqlite::Error) -> DbError {
    if let rusqlite::Error::SqliteFailure(err, msg) = &e {
        if err.code == rusqlite::ErrorCode::ConstraintViolation
            && matches!(
                err.extended_code,
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            )
        {
            return DbError::Conflict(msg.clone().unwrap_or_else(|| err.to_string()));
        }
    }
    DbError::Internal(e.to_string())
}

/// Map a single-row lookup error, turning "no rows" into `DbError::NotFound`.
pub(crate) fn not_found_or(entity: impl FnOnce() -> String) -> impl FnOnce(rusqlite::Error) -> DbError {
    move |e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(entity()),
        other => map_sqlite_err(other),
    }
}

/// Read connections opened next to the writer on file-backed databases.
const READ_CONNECTIONS: usize = 4;

/// Connections used only for reads. In WAL mode they see the last
/// committed state and never wait for the writer.
struct ReadPool {
    conns: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ReadPool {
    fn open(path: &Path, size: usize) -> Result<Self, DbError> {
        let mut conns = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open(path).to_db()?;
            conn.execute_batch(
                "PRAGMA query_only=ON;
                 PRAGMA busy_timeout=5000;",
            )
            .to_db()?;
            conns.push(Mutex::new(conn));
        }
        Ok(Self {
            conns,
            next: AtomicUsize::new(0),
        })
    }

    fn get(&self) -> Option<MutexGuard<'_, Connection>> {
        for conn in &self.conns {
            match conn.try_lock() {
                Ok(guard) => return Some(guard),
                Err(TryLockError::Poisoned(e)) => return Some(e.into_inner()),
                Err(TryLockError::WouldBlock) => {}
            }
        }
        let len = self.conns.len();
        if len == 0 {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % len;
        Some(self.conns[i].lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// SQLite metadata store: one writer connection plus a small pool of
/// readers.
///
/// In-memory databases cannot share state across connections, so they
/// read through the writer.
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
    readers: Arc<ReadPool>,
}

impl SqliteDatabase {
    pub fn open(config: &DbConfig) -> Result<Self, DbError> {
        let path = config
            .sqlite_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| crate::data_dir().join("pastel.db"));
        std::fs::create_dir_all(path.parent().unwrap_or(Path::new(".")))?;
        Self::open_path(&path)
    }

    pub fn open_path(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path).to_db()?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )
        .to_db()?;
        debug!("opened metadata database at {}", path.display());
        let mut db = Self::from_connection(conn)?;
        // Readers open after migrations so they see the schema.
        db.readers = Arc::new(ReadPool::open(path, READ_CONNECTIONS)?);
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory().to_db()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;").to_db()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            readers: Arc::new(ReadPool {
                conns: Vec::new(),
                next: AtomicUsize::new(0),
            }),
        };
        db.with_conn(|conn| migrations::run(conn))?;
        Ok(db)
    }

    // Every transaction rolls back when dropped, so a connection whose lock
    // was poisoned mid-transaction is still consistent.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the writer connection. Waits for any open transaction.
    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Connection) -> Result<T, DbError>,
    {
        let conn = self.lock();
        f(&conn)
    }

    /// Run a read-only `f` on a reader connection, falling back to the
    /// writer when there are none.
    pub(crate) fn with_reader<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Connection) -> Result<T, DbError>,
    {
        match self.readers.get() {
            Some(conn) => f(&conn),
            None => self.with_conn(f),
        }
    }

    /// Run `f` inside an immediate transaction.
    ///
    /// Commits when `f` returns `Ok`. Any error from `f`, a failed commit, or
    /// a panic rolls the transaction back.
    pub fn in_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&PasteTx<'_>) -> Result<T, E>,
        E: From<DbError>,
    {
        let mut conn = self.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .to_db()?;
        let value = f(&PasteTx::new(&tx))?;
        tx.commit().to_db()?;
        Ok(value)
    }

    /// Cheap liveness check. Does not wait for an open write transaction.
    pub fn ping(&self) -> Result<(), DbError> {
        self.with_reader(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .to_db()?;
            Ok(())
        })
    }
}
