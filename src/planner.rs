//! # Planner
//!
//! Enumerates the working tree into a deterministic snapshot plan: the
//! control directory and ignore-rule hits are excluded, paths are stored
//! `/`-separated and NFC-normalised, and both file and directory lists are
//! sorted byte-lexicographically so that two runs over an unchanged tree
//! produce identical plans.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use unicode_normalization::UnicodeNormalization;
use walkdir::WalkDir;

use crate::error::Result;
use crate::ignore::IgnoreEngine;
use crate::layout::CONTROL_DIR;

/// One regular file scheduled for a snapshot.
#[derive(Clone, Debug)]
pub struct PlanFile {
    /// Workspace-relative path, `/`-separated, NFC-normalised.
    pub rel: String,
    /// Absolute path on disk.
    pub abs: PathBuf,
    /// Size at plan time, in bytes.
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch.
    pub mtime_ticks: i64,
}

/// Deterministic, path-sorted snapshot plan.
#[derive(Debug, Default)]
pub struct Plan {
    pub files: Vec<PlanFile>,
    pub dirs: Vec<String>,
}

impl Plan {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Walks `root` and produces the plan, applying `ignore` and skipping the
/// control directory at the root.
pub fn plan_tree(root: &Path, ignore: &IgnoreEngine) -> Result<Plan> {
    let mut plan = Plan::default();

    let walker = WalkDir::new(root).min_depth(1).into_iter();
    let entries = walker.filter_entry(|entry| {
        if entry.depth() == 1 && entry.file_name() == CONTROL_DIR {
            return false;
        }
        let rel = match relative_path(root, entry.path()) {
            Some(rel) => rel,
            None => return false,
        };
        !ignore.is_ignored(&rel, entry.file_type().is_dir())
    });

    for entry in entries {
        let entry = entry.map_err(|e| std::io::Error::other(e))?;
        let rel = match relative_path(root, entry.path()) {
            Some(rel) => rel,
            None => continue,
        };

        if entry.file_type().is_dir() {
            plan.dirs.push(rel);
        } else if entry.file_type().is_file() {
            let metadata = entry.metadata().map_err(|e| std::io::Error::other(e))?;
            plan.files.push(PlanFile {
                rel,
                abs: entry.path().to_path_buf(),
                size: metadata.len(),
                mtime_ticks: mtime_ticks(&metadata),
            });
        }
        // Symlinks and other special files are not captured.
    }

    plan.files.sort_by(|a, b| a.rel.as_bytes().cmp(b.rel.as_bytes()));
    plan.dirs.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));

    Ok(plan)
}

/// Modification time as millisecond ticks; files older than the epoch (or on
/// filesystems without mtime) report 0.
pub fn mtime_ticks(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Workspace-relative `/`-separated NFC path, or `None` outside the root.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for comp in rel.components() {
        let s = comp.as_os_str().to_str()?;
        parts.push(s.nfc().collect::<String>());
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path, contents: &[u8]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn plan_is_sorted_and_skips_control_dir() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("b.txt"), b"b");
        touch(&root.join("a/x.txt"), b"x");
        touch(&root.join(".rinne/store/junk"), b"j");

        let plan = plan_tree(root, &IgnoreEngine::empty()).unwrap();
        let rels: Vec<_> = plan.files.iter().map(|f| f.rel.as_str()).collect();
        assert_eq!(rels, vec!["a/x.txt", "b.txt"]);
        assert_eq!(plan.dirs, vec!["a"]);
        assert_eq!(plan.total_bytes(), 2);
    }

    #[test]
    fn ignored_directories_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("keep/file"), b"k");
        touch(&root.join("target/debug/app"), b"t");

        let ignore = IgnoreEngine::from_rules(["target"]);
        let plan = plan_tree(root, &ignore).unwrap();
        let rels: Vec<_> = plan.files.iter().map(|f| f.rel.as_str()).collect();
        assert_eq!(rels, vec!["keep/file"]);
        assert!(!plan.dirs.iter().any(|d| d.starts_with("target")));
    }

    #[test]
    fn plan_records_size_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("f.bin"), &[0u8; 123]);

        let plan = plan_tree(root, &IgnoreEngine::empty()).unwrap();
        assert_eq!(plan.files.len(), 1);
        assert_eq!(plan.files[0].size, 123);
        assert!(plan.files[0].mtime_ticks > 0);
    }
}
