// Integration tests for paste creation across the database and blob store.

use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use chrono::{Duration, Utc};

use pastel_core::attachment::AttachmentSource;
use pastel_core::checksum::checksum_bytes;
use pastel_core::{CreatePaste, NewAttachment, PasteError, Visibility, ANONYMOUS_USER_ID};
use pastel_db::SqliteDatabase;
use pastel_service::{PasteCoordinator, PasteReader};
use pastel_store::{BlobStore, LocalBlobStore, StoreConfig, StoreError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    _tmp: tempfile::TempDir,
    db: SqliteDatabase,
    store: Arc<LocalBlobStore>,
}

impl Harness {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let db = SqliteDatabase::open_path(&tmp.path().join("pastel.db")).unwrap();
        let store =
            Arc::new(LocalBlobStore::new(&StoreConfig::new(tmp.path().join("blobs"))).unwrap());
        Self {
            _tmp: tmp,
            db,
            store,
        }
    }

    fn coordinator(&self) -> PasteCoordinator {
        PasteCoordinator::new(self.db.clone(), self.store.clone())
    }

    fn reader(&self) -> PasteReader {
        PasteReader::new(self.db.clone(), self.store.clone())
    }

    fn blob_count(&self) -> usize {
        self.store.list().unwrap().len()
    }
}

/// Delegates to a local store but fails the `fail_on`-th write (1-based)
/// after consuming part of its input. With `fail_deletes`, every delete
/// errors too.
struct FailingStore {
    inner: Arc<LocalBlobStore>,
    writes: AtomicUsize,
    fail_on: usize,
    fail_deletes: bool,
}

impl BlobStore for FailingStore {
    fn write(&self, id: &str, reader: &mut dyn Read) -> Result<u64, StoreError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            let mut buf = [0u8; 4];
            let _ = reader.read(&mut buf);
            return Err(StoreError::Internal("disk full".into()));
        }
        self.inner.write(id, reader)
    }

    fn read(&self, id: &str) -> Result<Box<dyn Read + Send>, StoreError> {
        self.inner.read(id)
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        if self.fail_deletes {
            return Err(StoreError::Internal("read-only filesystem".into()));
        }
        self.inner.delete(id)
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list()
    }
}

/// Yields different bytes after being rewound.
struct Shifty {
    data: Cursor<Vec<u8>>,
}

impl Read for Shifty {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }
}

impl Seek for Shifty {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        for b in self.data.get_mut().iter_mut() {
            *b = b.wrapping_add(1);
        }
        self.data.seek(pos)
    }
}

struct ShiftySource;

impl AttachmentSource for ShiftySource {
    fn open(&self) -> io::Result<Box<dyn pastel_core::attachment::AttachmentReader>> {
        Ok(Box::new(Shifty {
            data: Cursor::new(b"moving target".to_vec()),
        }))
    }
}

/// Hands out a few bytes at a time, pausing before each read.
struct SlowSource {
    data: Vec<u8>,
    pause: std::time::Duration,
}

struct SlowReader {
    data: Cursor<Vec<u8>>,
    pause: std::time::Duration,
}

impl Read for SlowReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        std::thread::sleep(self.pause);
        let n = buf.len().min(4);
        self.data.read(&mut buf[..n])
    }
}

impl Seek for SlowReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.data.seek(pos)
    }
}

impl AttachmentSource for SlowSource {
    fn open(&self) -> io::Result<Box<dyn pastel_core::attachment::AttachmentReader>> {
        Ok(Box::new(SlowReader {
            data: Cursor::new(self.data.clone()),
            pause: self.pause,
        }))
    }
}

struct UnreadableSource;

impl AttachmentSource for UnreadableSource {
    fn open(&self) -> io::Result<Box<dyn pastel_core::attachment::AttachmentReader>> {
        Err(io::Error::new(io::ErrorKind::NotFound, "upload vanished"))
    }
}

fn request(slug: &str) -> CreatePaste {
    CreatePaste::new("fn main() {}", "rust").with_slug(slug)
}

fn read_all(mut reader: impl Read) -> Vec<u8> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).unwrap();
    buf
}

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

#[test]
fn create_then_read_back_with_attachments() {
    let h = Harness::new();
    let req = request("abc123")
        .with_attachment(NewAttachment::from_bytes("a.txt", "text/plain", "first"))
        .with_attachment(NewAttachment::from_bytes("b.bin", "application/octet-stream", vec![0u8, 1, 2]));

    let id = h.coordinator().create_paste(ANONYMOUS_USER_ID, &req).unwrap();

    let reader = h.reader();
    let paste = reader
        .get_paste_by_slug(ANONYMOUS_USER_ID, "anonymous", "abc123")
        .unwrap();
    assert_eq!(paste.id, id);
    assert_eq!(paste.content, "fn main() {}");
    assert_eq!(paste.content_format, "rust");

    let attachments = reader
        .list_paste_attachments(ANONYMOUS_USER_ID, "anonymous", "abc123")
        .unwrap();
    let slugs: Vec<_> = attachments.iter().map(|a| a.slug.as_str()).collect();
    assert_eq!(slugs, vec!["a.txt", "b.bin"]);

    // Every committed attachment row has its blob.
    for a in &attachments {
        assert!(h.store.exists(&a.id).unwrap());
    }

    let download = reader
        .get_attachment(ANONYMOUS_USER_ID, "anonymous", "abc123", "a.txt")
        .unwrap();
    assert_eq!(download.mime_type(), "text/plain");
    assert_eq!(download.etag(), checksum_bytes(b"first"));
    assert_eq!(read_all(download), b"first");
}

#[test]
fn duplicate_slug_for_same_owner_is_conflict() {
    let h = Harness::new();
    let coordinator = h.coordinator();
    coordinator.create_paste(ANONYMOUS_USER_ID, &request("abc123")).unwrap();

    let err = coordinator
        .create_paste(
            ANONYMOUS_USER_ID,
            &request("abc123")
                .with_attachment(NewAttachment::from_bytes("x", "text/plain", "x")),
        )
        .unwrap_err();
    assert!(err.is_conflict(), "got {err:?}");
    assert_eq!(h.blob_count(), 0);
    assert_eq!(h.db.count_attachments().unwrap(), 0);
}

#[test]
fn latest_public_lists_new_paste_first() {
    let h = Harness::new();
    let coordinator = h.coordinator();
    coordinator.create_paste(ANONYMOUS_USER_ID, &request("older")).unwrap();
    coordinator.create_paste(ANONYMOUS_USER_ID, &request("abc123")).unwrap();

    let latest = h.reader().get_latest_public_pastes(10).unwrap();
    assert_eq!(latest[0].slug, "abc123");
    assert_eq!(latest.len(), 2);
}

#[test]
fn declared_size_is_stored_as_given() {
    let h = Harness::new();
    let data = b"8 bytes!".to_vec();
    let req = request("sized").with_attachment(NewAttachment::new(
        "f.bin",
        "application/octet-stream",
        10,
        pastel_core::attachment::BytesSource(data.clone().into()),
    ));
    h.coordinator().create_paste(ANONYMOUS_USER_ID, &req).unwrap();

    let download = h
        .reader()
        .get_attachment(ANONYMOUS_USER_ID, "anonymous", "sized", "f.bin")
        .unwrap();
    assert_eq!(download.attachment.size, 10);
    assert_eq!(download.attachment.checksum, checksum_bytes(&data));
    assert_eq!(read_all(download), data);
}

#[test]
fn create_without_slug_is_rejected() {
    let h = Harness::new();
    let err = h
        .coordinator()
        .create_paste(ANONYMOUS_USER_ID, &CreatePaste::new("x", "text"))
        .unwrap_err();
    assert!(matches!(err, PasteError::ValidationFailed(_)));
}

#[test]
fn random_slug_is_generated_when_missing() {
    let h = Harness::new();
    let id = h
        .coordinator()
        .create_paste_with_random_slug(ANONYMOUS_USER_ID, &CreatePaste::new("x", "text"), 12, 3)
        .unwrap();
    let (paste, owner) = h.reader().get_paste_by_id(ANONYMOUS_USER_ID, &id).unwrap();
    assert_eq!(owner, "anonymous");
    assert_eq!(paste.slug.len(), 12);
    assert!(paste.slug.chars().all(|c| c.is_ascii_alphanumeric()));
}

#[test]
fn random_slug_with_duplicate_attachment_slugs_fails_fast() {
    let h = Harness::new();
    let req = CreatePaste::new("x", "text")
        .with_attachment(NewAttachment::from_bytes("same", "text/plain", "1"))
        .with_attachment(NewAttachment::from_bytes("same", "text/plain", "2"));
    let err = h
        .coordinator()
        .create_paste_with_random_slug(ANONYMOUS_USER_ID, &req, 10, 5)
        .unwrap_err();
    assert!(err.is_conflict());
    assert!(h.reader().get_latest_public_pastes(10).unwrap().is_empty());
}

#[test]
fn concurrent_creates_with_same_slug_yield_exactly_one_conflict() {
    let h = Harness::new();
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|i| {
            let coordinator = h.coordinator();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let req = request("race")
                    .with_attachment(NewAttachment::from_bytes("f", "text/plain", format!("{i}")));
                barrier.wait();
                coordinator.create_paste(ANONYMOUS_USER_ID, &req)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_conflict()))
        .count();
    assert_eq!(conflicts, 1);
    assert_eq!(h.blob_count(), 1);
    assert_eq!(h.db.count_attachments().unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Atomicity
// ---------------------------------------------------------------------------

#[test]
fn blob_write_failure_rolls_back_everything() {
    let h = Harness::new();
    let failing = Arc::new(FailingStore {
        inner: h.store.clone(),
        writes: AtomicUsize::new(0),
        fail_on: 2,
        fail_deletes: false,
    });
    let coordinator = PasteCoordinator::new(h.db.clone(), failing);

    let req = request("doomed")
        .with_attachment(NewAttachment::from_bytes("one", "text/plain", "first blob"))
        .with_attachment(NewAttachment::from_bytes("two", "text/plain", "second blob"));
    let err = coordinator.create_paste(ANONYMOUS_USER_ID, &req).unwrap_err();
    assert!(matches!(err, PasteError::Storage(_)), "got {err:?}");

    assert!(h
        .reader()
        .get_paste_by_slug(ANONYMOUS_USER_ID, "anonymous", "doomed")
        .unwrap_err()
        .is_not_found());
    assert_eq!(h.db.count_attachments().unwrap(), 0);
    // The first blob was written and then cleaned up.
    assert_eq!(h.blob_count(), 0);

    // The slug is free again.
    h.coordinator()
        .create_paste(ANONYMOUS_USER_ID, &request("doomed"))
        .unwrap();
}

#[test]
fn unreadable_source_aborts_creation() {
    let h = Harness::new();
    let req = request("missing-upload")
        .with_attachment(NewAttachment::from_bytes("ok", "text/plain", "fine"))
        .with_attachment(NewAttachment::new("gone", "text/plain", 4, UnreadableSource));

    let err = h.coordinator().create_paste(ANONYMOUS_USER_ID, &req).unwrap_err();
    assert!(matches!(err, PasteError::Storage(_)));
    assert_eq!(h.blob_count(), 0);
    assert_eq!(h.db.count_attachments().unwrap(), 0);
}

#[test]
fn source_that_changes_between_passes_is_rejected() {
    let h = Harness::new();
    let req = request("shifty").with_attachment(NewAttachment::new("s", "text/plain", 13, ShiftySource));

    let err = h.coordinator().create_paste(ANONYMOUS_USER_ID, &req).unwrap_err();
    assert!(matches!(err, PasteError::Storage(_)));
    assert_eq!(h.blob_count(), 0);
    assert!(h.reader().get_latest_public_pastes(10).unwrap().is_empty());
}

#[test]
fn duplicate_attachment_slug_rolls_back_written_blobs() {
    let h = Harness::new();
    let req = request("dupes")
        .with_attachment(NewAttachment::from_bytes("same", "text/plain", "1"))
        .with_attachment(NewAttachment::from_bytes("same", "text/plain", "2"));

    let err = h.coordinator().create_paste(ANONYMOUS_USER_ID, &req).unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(h.blob_count(), 0);
}

// ---------------------------------------------------------------------------
// Visibility and expiry
// ---------------------------------------------------------------------------

#[test]
fn private_paste_hidden_from_everyone_but_owner() {
    let h = Harness::new();
    let alice = h.db.create_user("alice").unwrap();
    let bob = h.db.create_user("bob").unwrap();
    h.coordinator()
        .create_paste(
            &alice.id,
            &request("secret")
                .with_visibility(Visibility::Private)
                .with_attachment(NewAttachment::from_bytes("key", "text/plain", "hunter2")),
        )
        .unwrap();

    let reader = h.reader();
    assert!(reader.get_paste_by_slug(&alice.id, "alice", "secret").is_ok());
    for viewer in [bob.id.as_str(), ANONYMOUS_USER_ID] {
        let hidden = reader.get_paste_by_slug(viewer, "alice", "secret").unwrap_err();
        assert_eq!(hidden.to_string(), "not found: paste alice/secret");
        assert!(reader
            .get_attachment(viewer, "alice", "secret", "key")
            .unwrap_err()
            .is_not_found());
        assert!(reader
            .list_paste_attachments(viewer, "alice", "secret")
            .unwrap_err()
            .is_not_found());
    }

    assert_eq!(reader.list_user_pastes(&alice.id, "alice").unwrap().len(), 1);
    assert!(reader.list_user_pastes(&bob.id, "alice").unwrap().is_empty());
}

#[test]
fn unlisted_paste_readable_but_not_listed() {
    let h = Harness::new();
    h.coordinator()
        .create_paste(
            ANONYMOUS_USER_ID,
            &request("quiet").with_visibility(Visibility::Unlisted),
        )
        .unwrap();
    let reader = h.reader();
    assert!(reader
        .get_paste_by_slug(ANONYMOUS_USER_ID, "anonymous", "quiet")
        .is_ok());
    assert!(reader.get_latest_public_pastes(10).unwrap().is_empty());
}

#[test]
fn expired_paste_is_not_found_and_purged_with_blobs() {
    let h = Harness::new();
    let coordinator = h.coordinator();
    coordinator
        .create_paste(
            ANONYMOUS_USER_ID,
            &request("brief")
                .with_expiry(Utc::now() + Duration::milliseconds(50))
                .with_attachment(NewAttachment::from_bytes("f", "text/plain", "soon gone")),
        )
        .unwrap();
    assert_eq!(h.blob_count(), 1);

    std::thread::sleep(std::time::Duration::from_millis(100));
    assert!(h
        .reader()
        .get_paste_by_slug(ANONYMOUS_USER_ID, "anonymous", "brief")
        .unwrap_err()
        .is_not_found());

    let purged = coordinator.purge_expired(Utc::now()).unwrap();
    assert_eq!(purged.pastes, 1);
    assert_eq!(purged.attachment_ids.len(), 1);
    assert_eq!(h.blob_count(), 0);
}

// ---------------------------------------------------------------------------
// Deletion and maintenance
// ---------------------------------------------------------------------------

#[test]
fn owner_can_delete_paste_and_blobs() {
    let h = Harness::new();
    let alice = h.db.create_user("alice").unwrap();
    let bob = h.db.create_user("bob").unwrap();
    let coordinator = h.coordinator();
    let id = coordinator
        .create_paste(
            &alice.id,
            &request("mine").with_attachment(NewAttachment::from_bytes("f", "text/plain", "data")),
        )
        .unwrap();

    assert!(coordinator.delete_paste(&bob.id, &id).unwrap_err().is_not_found());
    assert!(coordinator
        .delete_paste(ANONYMOUS_USER_ID, &id)
        .unwrap_err()
        .is_not_found());
    assert_eq!(h.blob_count(), 1);

    coordinator.delete_paste(&alice.id, &id).unwrap();
    assert_eq!(h.blob_count(), 0);
    assert_eq!(h.db.count_attachments().unwrap(), 0);
    assert!(coordinator.delete_paste(&alice.id, &id).unwrap_err().is_not_found());
}

#[test]
fn sweep_removes_only_orphaned_blobs() {
    let h = Harness::new();
    let coordinator = h.coordinator();
    coordinator
        .create_paste(
            ANONYMOUS_USER_ID,
            &request("kept").with_attachment(NewAttachment::from_bytes("f", "text/plain", "keep me")),
        )
        .unwrap();
    h.store
        .write("leftover", &mut Cursor::new(b"orphan".to_vec()))
        .unwrap();
    assert_eq!(h.blob_count(), 2);

    assert_eq!(coordinator.sweep_orphan_blobs().unwrap(), 1);
    assert_eq!(h.blob_count(), 1);
    assert!(!h.store.exists("leftover").unwrap());
    assert!(h
        .reader()
        .get_attachment(ANONYMOUS_USER_ID, "anonymous", "kept", "f")
        .is_ok());
    assert_eq!(coordinator.sweep_orphan_blobs().unwrap(), 0);
}

#[test]
fn missing_blob_behind_row_is_storage_error() {
    let h = Harness::new();
    h.coordinator()
        .create_paste(
            ANONYMOUS_USER_ID,
            &request("broken").with_attachment(NewAttachment::from_bytes("f", "text/plain", "x")),
        )
        .unwrap();
    let attachment = h
        .reader()
        .list_paste_attachments(ANONYMOUS_USER_ID, "anonymous", "broken")
        .unwrap()
        .remove(0);
    h.store.delete(&attachment.id).unwrap();

    let err = h
        .reader()
        .get_attachment(ANONYMOUS_USER_ID, "anonymous", "broken", "f")
        .unwrap_err();
    assert!(matches!(err, PasteError::Storage(_)), "got {err:?}");
}

#[test]
fn failed_cleanup_keeps_original_error() {
    let h = Harness::new();
    let failing = Arc::new(FailingStore {
        inner: h.store.clone(),
        writes: AtomicUsize::new(0),
        fail_on: 2,
        fail_deletes: true,
    });
    let coordinator = PasteCoordinator::new(h.db.clone(), failing);

    let req = request("stuck")
        .with_attachment(NewAttachment::from_bytes("one", "text/plain", "first blob"))
        .with_attachment(NewAttachment::from_bytes("two", "text/plain", "second blob"));
    let err = coordinator.create_paste(ANONYMOUS_USER_ID, &req).unwrap_err();
    match &err {
        PasteError::Storage(msg) => assert!(msg.contains("disk full"), "got {msg}"),
        other => panic!("expected the write failure, got {other:?}"),
    }

    assert!(h
        .reader()
        .get_paste_by_slug(ANONYMOUS_USER_ID, "anonymous", "stuck")
        .unwrap_err()
        .is_not_found());
    assert_eq!(h.db.count_attachments().unwrap(), 0);

    // The first blob could not be removed; the sweep picks it up later.
    assert_eq!(h.blob_count(), 1);
    assert_eq!(h.coordinator().sweep_orphan_blobs().unwrap(), 1);
    assert_eq!(h.blob_count(), 0);
}

#[test]
fn sweep_removes_stale_partial_files() {
    use std::fs::{self, File};
    use std::time::SystemTime;

    let h = Harness::new();
    let stale = h.store.root().join("lost.0123abcd.part");
    let fresh = h.store.root().join("busy.4567ef01.part");
    fs::write(&stale, b"crashed").unwrap();
    fs::write(&fresh, b"in flight").unwrap();
    File::options()
        .write(true)
        .open(&stale)
        .unwrap()
        .set_modified(SystemTime::now() - 2 * pastel_service::STALE_PARTIAL_AGE)
        .unwrap();

    assert_eq!(h.coordinator().sweep_orphan_blobs().unwrap(), 1);
    assert!(!stale.exists());
    assert!(fresh.exists());
}

#[test]
fn zero_slug_length_is_rejected() {
    let h = Harness::new();
    let err = h
        .coordinator()
        .create_paste_with_random_slug(ANONYMOUS_USER_ID, &CreatePaste::new("x", "text"), 0, 3)
        .unwrap_err();
    assert!(matches!(err, PasteError::ValidationFailed(_)), "got {err:?}");
    assert!(h.reader().get_latest_public_pastes(10).unwrap().is_empty());
}

#[test]
fn reads_proceed_while_attachment_upload_is_in_flight() {
    use std::time::{Duration as StdDuration, Instant};

    let h = Harness::new();
    h.coordinator()
        .create_paste(ANONYMOUS_USER_ID, &request("earlier"))
        .unwrap();

    // 16 bytes in 4-byte reads, read twice (checksum, then store): ~1.6s.
    let source = SlowSource {
        data: b"sixteen bytes!!!".to_vec(),
        pause: StdDuration::from_millis(100),
    };
    let req = request("slow").with_attachment(NewAttachment::new(
        "big.bin",
        "application/octet-stream",
        16,
        source,
    ));
    let coordinator = h.coordinator();
    let upload = std::thread::spawn(move || coordinator.create_paste(ANONYMOUS_USER_ID, &req));

    std::thread::sleep(StdDuration::from_millis(200));
    let reader = h.reader();
    let start = Instant::now();
    let latest = reader.get_latest_public_pastes(5).unwrap();
    let found = reader.get_paste_by_slug(ANONYMOUS_USER_ID, "anonymous", "earlier");
    let elapsed = start.elapsed();

    assert!(elapsed < StdDuration::from_millis(500), "reads took {elapsed:?}");
    let slugs: Vec<_> = latest.iter().map(|p| p.slug.as_str()).collect();
    assert_eq!(slugs, vec!["earlier"]);
    assert!(found.is_ok());
    assert!(!upload.is_finished());

    upload.join().unwrap().unwrap();
    assert_eq!(reader.get_latest_public_pastes(5).unwrap()[0].slug, "slow");
}
