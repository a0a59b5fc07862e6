//! # File-Metadata Cache
//!
//! Per-space durable cache mapping a workspace-relative path to the last
//! observed `(size, mtime, file hash, chunk hashes, last seen)`. The save
//! pipeline uses it to skip re-chunking unchanged files: a file is *clean*
//! iff its `(size, mtime)` match the cached row **and** every cached chunk
//! hash still exists in the store. The store check closes the race where a
//! GC between two saves would let a manifest reference a deleted chunk.
//!
//! The backing file (`filemeta.db`) is a versioned JSON document, rewritten
//! atomically (temp file + rename) on commit, so a killed save can never
//! leave a torn cache. Writes are staged in memory and published by
//! [`FileMetaCache::commit`]; a failed pipeline simply discards its stage.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

const CACHE_VERSION: u32 = 1;

/// One cached observation of a workspace file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileMetaRow {
    pub size: u64,
    pub mtime_ticks: i64,
    /// SHA-256 of the file content, uppercase hex.
    pub file_hash: String,
    /// Ordered chunk hashes; empty strings are unfilled staging slots and
    /// never survive a commit of a successful save.
    pub chunk_hashes: Vec<String>,
    /// Last time the path was seen in a plan, in millisecond ticks.
    pub last_seen_ticks: i64,
    /// Per-file snapshot digest (path+size+content), uppercase hex, or empty
    /// when the row was written by a hash-skipping save.
    #[serde(default)]
    pub snapshot_file_hash: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    rows: BTreeMap<String, FileMetaRow>,
}

/// In-memory view of one space's `filemeta.db`, with staged pending writes.
#[derive(Debug)]
pub struct FileMetaCache {
    path: PathBuf,
    rows: BTreeMap<String, FileMetaRow>,
    staged: BTreeMap<String, FileMetaRow>,
}

impl FileMetaCache {
    /// Loads the cache file. A missing, unreadable, or version-mismatched
    /// file yields an empty cache — the worst case is a full re-chunk.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let rows = fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str::<CacheFile>(&text).ok())
            .filter(|cache| cache.version == CACHE_VERSION)
            .map(|cache| cache.rows)
            .unwrap_or_default();
        Self {
            path,
            rows,
            staged: BTreeMap::new(),
        }
    }

    /// Committed row for `rel`, if any.
    pub fn try_get(&self, rel: &str) -> Option<&FileMetaRow> {
        self.rows.get(rel)
    }

    /// Stages a full pending row with `chunk_count` unfilled hash slots.
    pub fn stage_update(
        &mut self,
        rel: &str,
        size: u64,
        mtime_ticks: i64,
        file_hash: String,
        chunk_count: usize,
        now_ticks: i64,
        snapshot_file_hash: String,
    ) {
        self.staged.insert(
            rel.to_string(),
            FileMetaRow {
                size,
                mtime_ticks,
                file_hash,
                chunk_hashes: vec![String::new(); chunk_count],
                last_seen_ticks: now_ticks,
                snapshot_file_hash,
            },
        );
    }

    /// Fills one staged chunk slot. Slots for paths that were never staged
    /// are ignored.
    pub fn set_staged_chunk(&mut self, rel: &str, index: usize, chunk_hash: &str) {
        if let Some(row) = self.staged.get_mut(rel) {
            if index >= row.chunk_hashes.len() {
                row.chunk_hashes.resize(index + 1, String::new());
            }
            row.chunk_hashes[index] = chunk_hash.to_string();
        }
    }

    /// Marks a cache-hit row as seen without touching its content columns.
    pub fn touch(&mut self, rel: &str, now_ticks: i64) {
        if let Some(row) = self.rows.get(rel) {
            let mut row = row.clone();
            row.last_seen_ticks = now_ticks;
            self.staged.insert(rel.to_string(), row);
        }
    }

    /// Drops all staged rows without publishing them.
    pub fn discard_staged(&mut self) {
        self.staged.clear();
    }

    /// Publishes staged rows and rewrites the backing file atomically.
    pub fn commit(&mut self) -> Result<(), CacheError> {
        let staged = std::mem::take(&mut self.staged);
        for (rel, row) in staged {
            self.rows.insert(rel, row);
        }
        self.write_atomic().map_err(CacheError::CommitFailed)
    }

    /// Deletes rows whose path is not in `alive` *and* whose `last_seen` is
    /// older than `cutoff_ticks`. Returns the number of rows removed.
    pub fn gc(
        &mut self,
        alive: &HashSet<String>,
        cutoff_ticks: i64,
    ) -> Result<usize, CacheError> {
        let before = self.rows.len();
        self.rows
            .retain(|rel, row| alive.contains(rel) || row.last_seen_ticks >= cutoff_ticks);
        let removed = before - self.rows.len();
        if removed > 0 {
            self.write_atomic().map_err(CacheError::CommitFailed)?;
        }
        Ok(removed)
    }

    fn write_atomic(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let doc = CacheFile {
            version: CACHE_VERSION,
            rows: self.rows.clone(),
        };
        let json = serde_json::to_string(&doc).map_err(std::io::Error::other)?;

        let tmp = self.path.with_extension(format!("db.{}.tmp", std::process::id()));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Default retention for rows whose path left the workspace.
pub const CACHE_TTL_DAYS: i64 = 30;

/// Expires cache rows for paths that vanished from the workspace more than
/// `ttl_days` ago. Runs under the space lock; returns rows removed.
pub fn run_cache_gc(
    layout: &crate::layout::RepoLayout,
    space: Option<&str>,
    ttl_days: i64,
) -> crate::error::Result<usize> {
    let space = crate::space::resolve_space(layout, space)?;
    let _lock = crate::space::SpaceLock::acquire(layout, &space)?;

    let ignore = crate::ignore::IgnoreEngine::load(&layout.ignore_file())?;
    let plan = crate::planner::plan_tree(layout.root(), &ignore)?;
    let alive: HashSet<String> = plan.files.into_iter().map(|f| f.rel).collect();
    let cutoff = chrono::Utc::now().timestamp_millis() - ttl_days * 24 * 60 * 60 * 1000;

    let mut cache = FileMetaCache::load(layout.filemeta_db(&space));
    Ok(cache.gc(&alive, cutoff)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cache_in(dir: &tempfile::TempDir) -> FileMetaCache {
        FileMetaCache::load(dir.path().join("filemeta.db"))
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        assert!(cache.try_get("a").is_none());
    }

    #[test]
    fn stage_fill_commit_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = cache_in(&dir);

        cache.stage_update("a/b.txt", 10, 111, "F".repeat(64), 2, 999, "D".repeat(64));
        cache.set_staged_chunk("a/b.txt", 0, &"1".repeat(64));
        cache.set_staged_chunk("a/b.txt", 1, &"2".repeat(64));
        assert!(cache.try_get("a/b.txt").is_none(), "staged rows are not visible");

        cache.commit().unwrap();
        let row = cache.try_get("a/b.txt").unwrap().clone();
        assert_eq!(row.size, 10);
        assert_eq!(row.chunk_hashes, vec!["1".repeat(64), "2".repeat(64)]);

        let reloaded = cache_in(&dir);
        assert_eq!(reloaded.try_get("a/b.txt"), Some(&row));
    }

    #[test]
    fn discard_drops_staged_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = cache_in(&dir);
        cache.stage_update("x", 1, 1, String::new(), 0, 1, String::new());
        cache.discard_staged();
        cache.commit().unwrap();
        assert!(cache.try_get("x").is_none());
    }

    #[test]
    fn touch_refreshes_last_seen_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = cache_in(&dir);
        cache.stage_update("f", 5, 50, "AB".repeat(32), 1, 100, String::new());
        cache.set_staged_chunk("f", 0, &"3".repeat(64));
        cache.commit().unwrap();

        cache.touch("f", 500);
        cache.commit().unwrap();
        let row = cache.try_get("f").unwrap();
        assert_eq!(row.last_seen_ticks, 500);
        assert_eq!(row.size, 5);
        assert_eq!(row.chunk_hashes, vec!["3".repeat(64)]);
    }

    #[test]
    fn gc_respects_alive_set_and_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = cache_in(&dir);
        for (rel, seen) in [("old-gone", 10), ("old-alive", 10), ("fresh-gone", 90)] {
            cache.stage_update(rel, 1, 1, String::new(), 0, seen, String::new());
        }
        cache.commit().unwrap();

        let alive: HashSet<String> = ["old-alive".to_string()].into();
        let removed = cache.gc(&alive, 50).unwrap();
        assert_eq!(removed, 1);
        assert!(cache.try_get("old-gone").is_none());
        assert!(cache.try_get("old-alive").is_some());
        assert!(cache.try_get("fresh-gone").is_some());
    }

    #[test]
    fn cache_gc_run_expires_departed_paths() {
        let dir = tempfile::tempdir().unwrap();
        let layout = crate::layout::RepoLayout::new(dir.path());
        crate::space::init_repo(&layout).unwrap();
        std::fs::write(dir.path().join("alive.txt"), b"here").unwrap();

        let mut cache = FileMetaCache::load(layout.filemeta_db("main"));
        // `last_seen` of 0 is far beyond any TTL.
        cache.stage_update("alive.txt", 4, 1, String::new(), 0, 0, String::new());
        cache.stage_update("departed.txt", 4, 1, String::new(), 0, 0, String::new());
        cache.commit().unwrap();
        drop(cache);

        let removed = run_cache_gc(&layout, None, CACHE_TTL_DAYS).unwrap();
        assert_eq!(removed, 1);
        let cache = FileMetaCache::load(layout.filemeta_db("main"));
        assert!(cache.try_get("alive.txt").is_some());
        assert!(cache.try_get("departed.txt").is_none());
    }

    #[test]
    fn corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filemeta.db");
        fs::write(&path, b"{ not json").unwrap();
        let cache = FileMetaCache::load(&path);
        assert!(cache.rows.is_empty());
    }
}
