//! # Content Hashing
//!
//! SHA-256 is the content address of every chunk: two chunks with identical
//! plaintext bytes produce the same hash and are stored only once. Hashes are
//! canonically **uppercase** 64-char hex everywhere at rest (store filenames,
//! manifests, meta); ingress normalises, so mixed-case input is accepted.

use sha2::{Digest, Sha256};

/// Computes the SHA-256 hash of in-memory data as uppercase hex.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode_upper(Sha256::digest(data))
}

/// True if `s` is a 64-character hex string (either case).
pub fn is_hex_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Normalises a hash to the canonical uppercase form.
pub fn canonical(hash: &str) -> String {
    hash.to_ascii_uppercase()
}

/// Returns the first `n` characters of a hash for display purposes.
pub fn short_hash(hash: &str, n: usize) -> &str {
    &hash[..n.min(hash.len())]
}

/// Splits a hash into two 2-char fan-out prefixes for directory sharding.
///
/// Content-addressable stores use this to avoid placing millions of files in a
/// single directory, which degrades filesystem performance on ext4/NTFS.
///
/// Example: `"A1B2C3..."` → `("A1", "B2")`
pub fn fan_out(hash: &str) -> (&str, &str) {
    (&hash[0..2], &hash[2..4])
}
