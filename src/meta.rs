//! # Snapshot Meta & Notes
//!
//! `meta.json` is the completion marker and integrity anchor of a snapshot:
//! it is written last by the save pipeline, so a directory that exists
//! without it is observable as *staging*. A snapshot is *complete* only once
//! both `meta.json` and `note.md` are on disk; anything less may be swept by
//! a future save.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SaveError};

/// UTF-8 byte-order mark, preferred when writing notes.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// `meta.json` schema version.
pub const META_VERSION: u32 = 1;

/// Integrity record stored beside every snapshot.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    pub version: u32,
    /// `"sha256"` or `"skip"`.
    pub hash_algorithm: String,
    /// Canonical snapshot hash (uppercase hex) or `"SKIP"`.
    pub snapshot_hash: String,
    pub file_count: u64,
    pub total_bytes: u64,
}

impl SnapshotMeta {
    pub fn load(path: &Path) -> Result<SnapshotMeta> {
        let text = fs::read_to_string(path)?;
        let meta = serde_json::from_str(&text).map_err(|e| {
            anyhow::anyhow!("failed to parse snapshot meta {}: {e}", path.display())
        })?;
        Ok(meta)
    }

    /// Writes `meta.json`. A failure here maps to exit code 4.
    pub fn save(&self, path: &Path) -> Result<()> {
        let write = || -> std::io::Result<()> {
            let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
            fs::write(path, json)
        };
        write().map_err(|e| SaveError::MetaWrite(e).into())
    }
}

/// Formatting choices for `note.md`.
#[derive(Clone, Copy, Debug)]
pub struct NoteOptions {
    /// Prefix the file with a UTF-8 BOM (preferred).
    pub bom: bool,
    /// Use CRLF line endings.
    pub crlf: bool,
}

impl Default for NoteOptions {
    fn default() -> Self {
        Self {
            bom: true,
            crlf: false,
        }
    }
}

/// Writes a note file. A failure here maps to exit code 5.
pub fn write_note(path: &Path, text: &str, opts: NoteOptions) -> Result<()> {
    let write = || -> std::io::Result<()> {
        let mut body = text.replace("\r\n", "\n");
        if opts.crlf {
            body = body.replace('\n', "\r\n");
        }
        let mut bytes = Vec::with_capacity(body.len() + UTF8_BOM.len());
        if opts.bom {
            bytes.extend_from_slice(UTF8_BOM);
        }
        bytes.extend_from_slice(body.as_bytes());
        fs::write(path, bytes)
    };
    write().map_err(|e| SaveError::NoteWrite(e).into())
}

/// Creates an empty note if none exists yet.
pub fn ensure_note(path: &Path, opts: NoteOptions) -> Result<()> {
    if path.is_file() {
        return Ok(());
    }
    write_note(path, "", opts)
}

/// Reads a note, stripping a leading BOM.
pub fn read_note(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);
    Ok(String::from_utf8_lossy(body).into_owned())
}

/// Lifecycle of a snapshot directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotState {
    Missing,
    /// Directory exists but `meta.json` or `note.md` is absent.
    Staging,
    Complete,
}

/// Observes the state of a snapshot directory.
pub fn snapshot_state(dir: &Path) -> SnapshotState {
    if !dir.is_dir() {
        return SnapshotState::Missing;
    }
    if dir.join("meta.json").is_file() && dir.join("note.md").is_file() {
        SnapshotState::Complete
    } else {
        SnapshotState::Staging
    }
}
