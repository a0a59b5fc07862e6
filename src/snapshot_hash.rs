//! # Snapshot Hashing
//!
//! The snapshot hash is the integrity anchor: a canonical SHA-256 over the
//! logical content of a snapshot, independent of chunk boundaries and
//! compression level. Per file (in byte-lexicographic path order) a digest is
//! taken over `rel_path || "\n" || size_text || "\n" || content_bytes`; the
//! raw 32-byte per-file digests are then folded, in the same order, into one
//! final SHA-256.
//!
//! The save pipeline feeds content through a [`FileDigest`] while chunking,
//! so unchanged trees hash without a second read; restore and verify rebuild
//! the same value from materialised bytes and compare.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::ignore::IgnoreEngine;
use crate::planner;

/// `meta.json` algorithm tag for a fully hashed snapshot.
pub const ALGORITHM_SHA256: &str = "sha256";
/// `meta.json` algorithm tag when hashing was skipped.
pub const ALGORITHM_SKIP: &str = "skip";
/// Placeholder hash value recorded by hash-skipping saves.
pub const SKIP_HASH: &str = "SKIP";

/// Whether a save computes the canonical snapshot hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashMode {
    /// Compute and store the canonical hash (default).
    Full,
    /// Skip it; meta records `"skip"` / `"SKIP"`.
    None,
}

impl HashMode {
    pub fn algorithm(&self) -> &'static str {
        match self {
            HashMode::Full => ALGORITHM_SHA256,
            HashMode::None => ALGORITHM_SKIP,
        }
    }
}

/// Incremental per-file digest over `rel || "\n" || size || "\n" || bytes`.
pub struct FileDigest(Sha256);

impl FileDigest {
    pub fn new(rel: &str, size: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(rel.as_bytes());
        hasher.update(b"\n");
        hasher.update(size.to_string().as_bytes());
        hasher.update(b"\n");
        Self(hasher)
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    pub fn finalize(self) -> [u8; 32] {
        self.0.finalize().into()
    }
}

/// Streams a file from disk through a [`FileDigest`].
pub fn digest_file(rel: &str, size: u64, path: &Path) -> std::io::Result<[u8; 32]> {
    let mut digest = FileDigest::new(rel, size);
    let mut file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
    }
    Ok(digest.finalize())
}

/// Parses a stored uppercase-hex per-file digest back into raw bytes.
pub fn digest_from_hex(hex_digest: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(hex_digest).ok()?;
    bytes.try_into().ok()
}

/// Folds per-file digests, already ordered by path, into the snapshot hash.
pub fn fold_digests<'a>(ordered: impl IntoIterator<Item = &'a [u8; 32]>) -> String {
    let mut hasher = Sha256::new();
    for digest in ordered {
        hasher.update(digest);
    }
    hex::encode_upper(hasher.finalize())
}

/// Convenience: folds a path-keyed map (BTreeMap iteration is already in
/// byte-lexicographic key order).
pub fn fold_sorted(digests: &BTreeMap<String, [u8; 32]>) -> String {
    fold_digests(digests.values())
}

/// Result of hashing a materialised tree.
#[derive(Debug)]
pub struct TreeHash {
    pub hash: String,
    pub file_count: u64,
    pub total_bytes: u64,
}

/// Recomputes the snapshot hash over a payload tree on disk.
pub fn hash_payload_tree(root: &Path) -> Result<TreeHash> {
    let plan = planner::plan_tree(root, &IgnoreEngine::empty())?;
    let mut digests = BTreeMap::new();
    let mut total_bytes = 0u64;
    for file in &plan.files {
        digests.insert(
            file.rel.clone(),
            digest_file(&file.rel, file.size, &file.abs)?,
        );
        total_bytes += file.size;
    }
    Ok(TreeHash {
        hash: fold_sorted(&digests),
        file_count: plan.files.len() as u64,
        total_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn digest_covers_path_size_and_content() {
        let a = {
            let mut d = FileDigest::new("a.txt", 3);
            d.update(b"abc");
            d.finalize()
        };
        let same = {
            let mut d = FileDigest::new("a.txt", 3);
            d.update(b"ab");
            d.update(b"c");
            d.finalize()
        };
        let other_path = {
            let mut d = FileDigest::new("b.txt", 3);
            d.update(b"abc");
            d.finalize()
        };
        assert_eq!(a, same, "chunking of updates must not matter");
        assert_ne!(a, other_path);
    }

    #[test]
    fn fold_is_order_sensitive_and_canonical() {
        let d1 = [1u8; 32];
        let d2 = [2u8; 32];
        let forward = fold_digests([&d1, &d2]);
        let backward = fold_digests([&d2, &d1]);
        assert_ne!(forward, backward);
        assert_eq!(forward.len(), 64);
        assert_eq!(forward, forward.to_ascii_uppercase());
    }

    #[test]
    fn payload_tree_hash_matches_manual_fold() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/f.txt"), b"hello").unwrap();
        fs::write(dir.path().join("empty"), b"").unwrap();

        let tree = hash_payload_tree(dir.path()).unwrap();
        assert_eq!(tree.file_count, 2);
        assert_eq!(tree.total_bytes, 5);

        let mut digests = BTreeMap::new();
        digests.insert(
            "empty".to_string(),
            digest_file("empty", 0, &dir.path().join("empty")).unwrap(),
        );
        digests.insert(
            "sub/f.txt".to_string(),
            digest_file("sub/f.txt", 5, &dir.path().join("sub/f.txt")).unwrap(),
        );
        assert_eq!(tree.hash, fold_sorted(&digests));
    }

    #[test]
    fn hex_digest_roundtrip() {
        let digest = [7u8; 32];
        let hex_digest = hex::encode_upper(digest);
        assert_eq!(digest_from_hex(&hex_digest), Some(digest));
        assert_eq!(digest_from_hex("short"), None);
    }
}
