use std::io::{self, Read};

use sha2::{Digest, Sha256};

pub const CHECKSUM_ALGORITHM: &str = "sha256";

const CHUNK_SIZE: usize = 8 * 1024;

/// Stream `reader` to exhaustion and return its `"sha256-<hex>"` digest.
///
/// Only consumes the reader; rewinding it afterwards is the caller's job.
pub fn checksum<R: Read + ?Sized>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(format!("{CHECKSUM_ALGORITHM}-{:x}", hasher.finalize()))
}

pub fn checksum_bytes(data: &[u8]) -> String {
    format!("{CHECKSUM_ALGORITHM}-{:x}", Sha256::digest(data))
}

/// Hashes everything read through it.
pub struct ChecksumReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> ChecksumReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    /// Digest of the bytes read so far.
    pub fn finish(self) -> String {
        format!("{CHECKSUM_ALGORITHM}-{:x}", self.hasher.finalize())
    }
}

impl<R: Read> Read for ChecksumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}
