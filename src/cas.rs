//! # Content-Addressable Store
//!
//! Stores zstd-compressed chunks addressed by the SHA-256 of their plaintext
//! bytes. The on-disk shape is `store/<hh>/<hh>/<HEX>.zst` with two levels of
//! 2-character fan-out so no directory grows unbounded.
//!
//! Publication is atomic: a chunk is written to a unique temporary file in
//! its final fan-out directory and renamed into place. Concurrent writers of
//! the same hash race on the rename; the loser observes the winner's file and
//! discards its own bytes — an existing chunk is never overwritten.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::compress;
use crate::error::StoreError;
use crate::hasher;

/// Extension of stored chunk files.
const CHUNK_EXT: &str = "zst";

/// Monotonic discriminator for temp-file names within this process.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Handle to the chunk store rooted at `store/`.
#[derive(Debug)]
pub struct ChunkStore {
    dir: PathBuf,
    level: i32,
}

/// Result of a `put_if_absent` call.
#[derive(Debug)]
pub struct PutOutcome {
    /// Canonical uppercase hash of the plaintext.
    pub hash: String,
    /// True if this call created the chunk file; false if it already existed.
    pub written: bool,
}

impl ChunkStore {
    /// Opens (creating if needed) the store at `dir` with the given
    /// compression level.
    pub fn open(dir: impl Into<PathBuf>, level: i32) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, level })
    }

    pub fn compression_level(&self) -> i32 {
        self.level
    }

    /// Deterministic on-disk location for a chunk hash (any case accepted).
    pub fn path_for(&self, hash: &str) -> PathBuf {
        let canonical = hasher::canonical(hash);
        let (a, b) = hasher::fan_out(&canonical);
        self.dir
            .join(a)
            .join(b)
            .join(format!("{canonical}.{CHUNK_EXT}"))
    }

    /// Cheap membership predicate.
    pub fn exists(&self, hash: &str) -> bool {
        self.path_for(hash).is_file()
    }

    /// Stores `plain` under its SHA-256 unless already present.
    ///
    /// Safe against concurrent callers inserting the same bytes: losers of
    /// the publication race keep the winner's file.
    pub fn put_if_absent(&self, plain: &[u8]) -> Result<PutOutcome, StoreError> {
        let hash = hasher::hash_bytes(plain);
        let path = self.path_for(&hash);

        if path.is_file() {
            return Ok(PutOutcome {
                hash,
                written: false,
            });
        }

        let parent = path.parent().expect("chunk path always has a parent");
        let map_err = |source| StoreError::WriteFailed {
            hash: hash.clone(),
            source,
        };
        fs::create_dir_all(parent).map_err(map_err)?;

        let tmp = parent.join(format!(
            ".{hash}.{}.{}.tmp",
            std::process::id(),
            TMP_SEQ.fetch_add(1, Ordering::Relaxed),
        ));
        let result = (|| {
            let compressed = compress::compress(plain, self.level)?;
            fs::write(&tmp, compressed)?;

            if path.is_file() {
                // Lost the race; the winner's bytes are identical.
                fs::remove_file(&tmp)?;
                return Ok(false);
            }
            fs::rename(&tmp, &path)?;
            Ok(true)
        })();

        match result {
            Ok(written) => Ok(PutOutcome { hash, written }),
            Err(source) => {
                let _ = fs::remove_file(&tmp);
                Err(StoreError::WriteFailed { hash, source })
            }
        }
    }

    /// Opens a decompressing reader over a stored chunk.
    pub fn open_read(
        &self,
        hash: &str,
    ) -> Result<zstd::Decoder<'static, BufReader<File>>, StoreError> {
        let path = self.path_for(hash);
        let file = File::open(&path).map_err(|_| StoreError::ChunkMissing(hasher::canonical(hash)))?;
        compress::reader(file).map_err(|source| StoreError::WriteFailed {
            hash: hasher::canonical(hash),
            source,
        })
    }

    /// Reads and decompresses a stored chunk into memory.
    pub fn read_plain(&self, hash: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(hash);
        let raw =
            fs::read(&path).map_err(|_| StoreError::ChunkMissing(hasher::canonical(hash)))?;
        compress::decompress(&raw).map_err(|source| StoreError::WriteFailed {
            hash: hasher::canonical(hash),
            source,
        })
    }

    /// Deletes a stored chunk if present; returns the compressed size freed.
    pub fn remove(&self, hash: &str) -> std::io::Result<u64> {
        let path = self.path_for(hash);
        match fs::metadata(&path) {
            Ok(meta) => {
                fs::remove_file(&path)?;
                Ok(meta.len())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Enumerates every stored chunk as `(canonical_hash, path)`.
    ///
    /// Only files whose stem is 64 hex characters are reported; temp files
    /// and foreign debris are skipped.
    pub fn list_chunks(&self) -> std::io::Result<Vec<(String, PathBuf)>> {
        let mut chunks = Vec::new();
        for shard1 in read_dir_sorted(&self.dir)? {
            if !shard1.is_dir() || !is_fan_out_dir(&shard1) {
                continue;
            }
            for shard2 in read_dir_sorted(&shard1)? {
                if !shard2.is_dir() {
                    continue;
                }
                for entry in read_dir_sorted(&shard2)? {
                    if let Some(hash) = chunk_hash_of(&entry) {
                        chunks.push((hash, entry));
                    }
                }
            }
        }
        Ok(chunks)
    }
}

fn read_dir_sorted(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();
    Ok(entries)
}

/// A 2-character hex fan-out directory (excludes `manifests/` and friends).
fn is_fan_out_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.len() == 2 && n.bytes().all(|b| b.is_ascii_hexdigit()))
}

fn chunk_hash_of(path: &Path) -> Option<String> {
    if path.extension()?.to_str()? != CHUNK_EXT {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if hasher::is_hex_hash(stem) {
        Some(hasher::canonical(stem))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn store() -> (tempfile::TempDir, ChunkStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path().join("store"), 3).unwrap();
        (dir, store)
    }

    #[test]
    fn put_then_read_roundtrip() {
        let (_dir, store) = store();
        let out = store.put_if_absent(b"chunk payload").unwrap();
        assert!(out.written);
        assert!(store.exists(&out.hash));
        assert!(store.exists(&out.hash.to_ascii_lowercase()));

        let mut plain = Vec::new();
        store
            .open_read(&out.hash)
            .unwrap()
            .read_to_end(&mut plain)
            .unwrap();
        assert_eq!(plain, b"chunk payload");
    }

    #[test]
    fn second_put_is_a_noop() {
        let (_dir, store) = store();
        let first = store.put_if_absent(b"same bytes").unwrap();
        let second = store.put_if_absent(b"same bytes").unwrap();
        assert_eq!(first.hash, second.hash);
        assert!(first.written);
        assert!(!second.written);
    }

    #[test]
    fn concurrent_puts_yield_one_file() {
        let (_dir, store) = store();
        let store = &store;
        let hashes: Vec<String> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(move || store.put_if_absent(&[42u8; 4096]).unwrap().hash))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(hashes.windows(2).all(|w| w[0] == w[1]));
        assert!(store.exists(&hashes[0]));
        assert_eq!(store.list_chunks().unwrap().len(), 1);
    }

    #[test]
    fn fan_out_layout() {
        let (_dir, store) = store();
        let out = store.put_if_absent(b"xyz").unwrap();
        let path = store.path_for(&out.hash);
        let rel: Vec<_> = path
            .components()
            .rev()
            .take(3)
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        assert_eq!(rel[0], format!("{}.zst", out.hash));
        assert_eq!(rel[1], &out.hash[2..4]);
        assert_eq!(rel[2], &out.hash[0..2]);
    }

    #[test]
    fn missing_chunk_reports_missing() {
        let (_dir, store) = store();
        let absent = "0".repeat(64);
        assert!(!store.exists(&absent));
        assert!(matches!(
            store.open_read(&absent),
            Err(StoreError::ChunkMissing(_))
        ));
    }

    #[test]
    fn list_skips_temp_and_foreign_files() {
        let (_dir, store) = store();
        let out = store.put_if_absent(b"real").unwrap();

        // Debris that a crashed writer or a stray tool could leave behind.
        let fan = store.path_for(&out.hash).parent().unwrap().to_path_buf();
        fs::write(fan.join(".deadbeef.1.0.tmp"), b"junk").unwrap();
        fs::create_dir_all(store.dir.join("manifests")).unwrap();
        fs::write(store.dir.join("manifests").join("x.json"), b"{}").unwrap();

        let chunks = store.list_chunks().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].0, out.hash);
    }

    #[test]
    fn remove_frees_bytes() {
        let (_dir, store) = store();
        let out = store.put_if_absent(&[9u8; 10_000]).unwrap();
        let freed = store.remove(&out.hash).unwrap();
        assert!(freed > 0);
        assert!(!store.exists(&out.hash));
        assert_eq!(store.remove(&out.hash).unwrap(), 0);
    }
}
