use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::{check_key, BlobStore, StoreConfig, StoreError};

const BLOB_EXT: &str = "bin";
const PART_EXT: &str = "part";

/// Blobs as flat files under a root directory: `<root>/<id>.bin`.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Fails unless `config.root` is absolute and can be created.
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let root = config.root.clone();
        if !root.is_absolute() {
            return Err(StoreError::Internal(format!(
                "blob root must be an absolute path: {}",
                root.display()
            )));
        }
        fs::create_dir_all(&root)
            .map_err(|e| StoreError::Internal(format!("mkdir {}: {e}", root.display())))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, id: &str) -> Result<PathBuf, StoreError> {
        check_key(id)?;
        Ok(self.root.join(format!("{id}.{BLOB_EXT}")))
    }
}

/// Copy `reader` into a fresh file at `path` and flush it to disk.
fn write_file(path: &Path, reader: &mut dyn Read) -> io::Result<u64> {
    let mut file = File::options().write(true).create_new(true).open(path)?;
    let written = io::copy(reader, &mut file)?;
    file.flush()?;
    file.sync_all()?;
    Ok(written)
}

impl BlobStore for LocalBlobStore {
    fn write(&self, id: &str, reader: &mut dyn Read) -> Result<u64, StoreError> {
        let path = self.resolve(id)?;
        let tmp = self
            .root
            .join(format!("{id}.{}.{PART_EXT}", Uuid::new_v4().simple()));

        let result = write_file(&tmp, reader).and_then(|n| fs::rename(&tmp, &path).map(|()| n));
        match result {
            Ok(n) => {
                debug!("wrote blob {id} ({n} bytes)");
                Ok(n)
            }
            Err(e) => {
                match fs::remove_file(&tmp) {
                    Ok(()) => {}
                    Err(rm) if rm.kind() == io::ErrorKind::NotFound => {}
                    Err(rm) => warn!("failed to remove partial blob {}: {rm}", tmp.display()),
                }
                Err(StoreError::Internal(format!("write {}: {e}", path.display())))
            }
        }
    }

    fn read(&self, id: &str) -> Result<Box<dyn Read + Send>, StoreError> {
        let path = self.resolve(id)?;
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(id.to_string())),
            Err(e) => Err(StoreError::Internal(format!("read {}: {e}", path.display()))),
        }
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let path = self.resolve(id)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("deleted blob {id}");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Internal(format!(
                "delete {}: {e}",
                path.display()
            ))),
        }
    }

    fn exists(&self, id: &str) -> Result<bool, StoreError> {
        let path = self.resolve(id)?;
        path.try_exists()
            .map_err(|e| StoreError::Internal(format!("exists {}: {e}", path.display())))
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| StoreError::Internal(format!("list {}: {e}", self.root.display())))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Internal(format!("read_dir entry: {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(BLOB_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    // A write in progress keeps bumping its file's mtime, so only files
    // abandoned for `older_than` are removed.
    fn sweep_partials(&self, older_than: Duration) -> Result<usize, StoreError> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| StoreError::Internal(format!("list {}: {e}", self.root.display())))?;
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Internal(format!("read_dir entry: {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(PART_EXT) {
                continue;
            }
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!("cannot stat {}: {e}", path.display());
                    continue;
                }
            };
            if now.duration_since(modified).unwrap_or_default() < older_than {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("removed partial blob {}", path.display());
                    removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StoreError::Internal(format!(
                        "delete {}: {e}",
                        path.display()
                    )))
                }
            }
        }
        Ok(removed)
    }
}
