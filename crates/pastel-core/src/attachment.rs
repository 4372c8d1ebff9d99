use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek};
use std::path::PathBuf;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub paste_id: String,
    pub slug: String,
    pub mime_type: String,
    /// Size declared by the uploader. Not re-derived from the stored bytes.
    pub size: i64,
    /// `"<algorithm>-<hex>"` digest of the stored bytes.
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

/// A readable, rewindable attachment stream.
pub trait AttachmentReader: Read + Seek + Send {}

impl<T: Read + Seek + Send> AttachmentReader for T {}

/// Opens a fresh byte stream for an attachment on demand.
///
/// `open` may be called more than once and must return a stream positioned
/// at the start each time.
pub trait AttachmentSource: Send + Sync {
    fn open(&self) -> io::Result<Box<dyn AttachmentReader>>;
}

/// In-memory attachment bytes.
#[derive(Debug, Clone)]
pub struct BytesSource(pub Bytes);

impl AttachmentSource for BytesSource {
    fn open(&self) -> io::Result<Box<dyn AttachmentReader>> {
        Ok(Box::new(Cursor::new(self.0.clone())))
    }
}

/// Attachment bytes read from a file on disk.
#[derive(Debug, Clone)]
pub struct FileSource(pub PathBuf);

impl AttachmentSource for FileSource {
    fn open(&self) -> io::Result<Box<dyn AttachmentReader>> {
        Ok(Box::new(File::open(&self.0)?))
    }
}

pub struct NewAttachment {
    pub slug: String,
    pub mime_type: String,
    pub size: i64,
    pub source: Box<dyn AttachmentSource>,
}

impl NewAttachment {
    pub fn new(
        slug: impl Into<String>,
        mime_type: impl Into<String>,
        size: i64,
        source: impl AttachmentSource + 'static,
    ) -> Self {
        Self {
            slug: slug.into(),
            mime_type: mime_type.into(),
            size,
            source: Box::new(source),
        }
    }

    /// Attachment backed by in-memory bytes, declaring their real length.
    pub fn from_bytes(
        slug: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        let data = data.into();
        let size = data.len() as i64;
        Self::new(slug, mime_type, size, BytesSource(data))
    }
}

impl fmt::Debug for NewAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewAttachment")
            .field("slug", &self.slug)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
