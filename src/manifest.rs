//! # Snapshot Manifest
//!
//! A manifest describes one logical snapshot: an ordered list of files, each
//! with its ordered chunk-hash list, plus the captured directory set. It is
//! the single source of truth for restore, verification, and chunk reference
//! counting.
//!
//! Manifests are JSON under `store/manifests/<id>.json`. Readers ignore
//! unknown fields for forward compatibility but reject any manifest whose
//! `version` does not carry the `cas:` prefix. Writers publish atomically
//! (temp file + rename) with pretty indentation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RestoreError, SaveError};

/// Manifest schema version written by this engine.
pub const MANIFEST_VERSION: &str = "cas:2";

/// Version prefix every readable manifest must carry.
pub const MANIFEST_VERSION_PREFIX: &str = "cas:";

/// On-disk description of one logical snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    /// Root label the snapshot was taken from (informational).
    pub root: String,
    /// Canonical snapshot hash (uppercase hex), or `"SKIP"`.
    pub original_sha256: String,
    pub total_bytes: u64,
    pub avg_chunk: u32,
    pub min_chunk: u32,
    pub max_chunk: u32,
    pub compression_level: i32,
    pub file_count: u64,
    pub files: Vec<FileRecord>,
    #[serde(default)]
    pub dirs: Vec<String>,
}

/// One file entry: path, logical size, ordered chunk hashes.
///
/// Empty files carry an empty chunk list.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub bytes: u64,
    pub chunk_hashes: Vec<String>,
}

impl Manifest {
    /// Loads and version-gates a manifest file.
    pub fn load(path: &Path) -> Result<Manifest> {
        let text = fs::read_to_string(path)?;
        let manifest: Manifest =
            serde_json::from_str(&text).map_err(|e| anyhow::anyhow!(
                "failed to parse manifest {}: {e}",
                path.display()
            ))?;
        if !manifest.version.starts_with(MANIFEST_VERSION_PREFIX) {
            return Err(RestoreError::BadManifestVersion(manifest.version).into());
        }
        Ok(manifest)
    }

    /// Writes the manifest atomically: `.tmp` in the same directory, then
    /// rename into the final name.
    pub fn save_atomic(&self, path: &Path) -> Result<()> {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, json)?;
            fs::rename(&tmp, path)?;
            Ok(())
        };
        write().map_err(|e| SaveError::ManifestWrite(e).into())
    }

    /// Looks up a file record by exact path.
    #[cfg(test)]
    pub fn file(&self, rel: &str) -> Option<&FileRecord> {
        self.files.iter().find(|f| f.path == rel)
    }
}

/// Lists `(snapshot_id, path)` for every `.json` manifest in `dir`, sorted by
/// id. A missing directory yields an empty list.
pub fn list_manifests(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                out.push((stem.to_string(), path));
            }
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Manifest {
        Manifest {
            version: MANIFEST_VERSION.to_string(),
            root: "workspace".to_string(),
            original_sha256: "A".repeat(64),
            total_bytes: 8,
            avg_chunk: 4 * 1024 * 1024,
            min_chunk: 1024 * 1024,
            max_chunk: 16 * 1024 * 1024,
            compression_level: 3,
            file_count: 2,
            files: vec![
                FileRecord {
                    path: "a.txt".into(),
                    bytes: 0,
                    chunk_hashes: vec![],
                },
                FileRecord {
                    path: "b.bin".into(),
                    bytes: 8,
                    chunk_hashes: vec!["B".repeat(64)],
                },
            ],
            dirs: vec!["sub".into()],
        }
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        let manifest = sample();
        manifest.save_atomic(&path).unwrap();

        let loaded = Manifest::load(&path).unwrap();
        assert_eq!(loaded.files, manifest.files);
        assert_eq!(loaded.original_sha256, manifest.original_sha256);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.json");
        let mut value = serde_json::to_value(sample()).unwrap();
        value["some_future_field"] = serde_json::json!({"nested": true});
        fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

        let loaded = Manifest::load(&path).unwrap();
        assert_eq!(loaded.file_count, 2);
    }

    #[test]
    fn foreign_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.json");
        let mut manifest = sample();
        manifest.version = "tar:1".to_string();
        let json = serde_json::to_string(&manifest).unwrap();
        fs::write(&path, json).unwrap();

        assert!(Manifest::load(&path).is_err());
    }

    #[test]
    fn list_sorts_by_id() {
        let dir = tempfile::tempdir().unwrap();
        for id in ["20250101T000000Z_b", "20240101T000000Z_a"] {
            sample().save_atomic(&dir.path().join(format!("{id}.json"))).unwrap();
        }
        let ids: Vec<String> = list_manifests(dir.path())
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["20240101T000000Z_a", "20250101T000000Z_b"]);
    }

    #[test]
    fn list_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(list_manifests(&missing).unwrap().is_empty());
    }
}
