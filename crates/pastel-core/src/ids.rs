//! Slug and identifier generation.
//!
//! Nothing here guarantees uniqueness. Collisions surface as conflicts from
//! the metadata store and callers retry with a fresh slug.

use rand::{CryptoRng, Rng};
use uuid::Uuid;

pub const SLUG_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub const DEFAULT_SLUG_LENGTH: usize = 10;

/// Draw `length` characters uniformly from [`SLUG_ALPHABET`].
pub fn generate_slug_with<R: Rng + CryptoRng + ?Sized>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| SLUG_ALPHABET[rng.gen_range(0..SLUG_ALPHABET.len())] as char)
        .collect()
}

pub fn generate_slug(length: usize) -> String {
    generate_slug_with(&mut rand::thread_rng(), length)
}

/// A new time-ordered identifier (UUIDv7).
pub fn generate_id() -> String {
    Uuid::now_v7().to_string()
}
