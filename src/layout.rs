//! # Repository Layout
//!
//! Pure mapping from a repository root to every path the engine reads or
//! writes. No other module hard-codes a location under the control directory.
//!
//! ```text
//! <root>/.rinne/
//! ├── config/
//! │   └── config.toml                      durable settings
//! ├── snapshots/
//! │   ├── current                          one-line pointer to current space
//! │   └── space/<space>/
//! │       ├── filemeta.db                  per-space file-metadata cache
//! │       └── <id>/
//! │           ├── meta.json                completion marker + integrity anchor
//! │           ├── note.md                  free-form note
//! │           └── snapshots/…              (physical only) materialised payload
//! ├── store/
//! │   ├── <hh>/<hh>/<HEX>.zst              compressed chunks
//! │   └── manifests/<id>.json              per-snapshot manifest
//! ├── temp/                                scratch for hydration and recompose
//! └── logs/                                optional file log
//! ```

use std::path::{Path, PathBuf};

/// Name of the control directory created at the repository root.
pub const CONTROL_DIR: &str = ".rinne";

/// Name of the ignore-rule file read from the repository root.
pub const IGNORE_FILE: &str = ".rinneignore";

/// Maps a repository root to the absolute paths of the on-disk layout.
#[derive(Clone, Debug)]
pub struct RepoLayout {
    root: PathBuf,
}

impl RepoLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Walks up from `start` looking for a directory containing `.rinne`.
    pub fn discover(start: &Path) -> Option<Self> {
        let mut dir = Some(start);
        while let Some(d) = dir {
            if d.join(CONTROL_DIR).is_dir() {
                return Some(Self::new(d));
            }
            dir = d.parent();
        }
        None
    }

    /// The working-tree root (parent of the control directory).
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn control_dir(&self) -> PathBuf {
        self.root.join(CONTROL_DIR)
    }

    pub fn is_initialized(&self) -> bool {
        self.control_dir().is_dir()
    }

    pub fn ignore_file(&self) -> PathBuf {
        self.root.join(IGNORE_FILE)
    }

    // ─── Config ─────────────────────────────────────────────────────────────

    pub fn config_dir(&self) -> PathBuf {
        self.control_dir().join("config")
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join("config.toml")
    }

    // ─── Spaces & snapshots ─────────────────────────────────────────────────

    pub fn snapshots_dir(&self) -> PathBuf {
        self.control_dir().join("snapshots")
    }

    /// One-line pointer file naming the current space.
    pub fn current_space_file(&self) -> PathBuf {
        self.snapshots_dir().join("current")
    }

    pub fn spaces_dir(&self) -> PathBuf {
        self.snapshots_dir().join("space")
    }

    pub fn space_dir(&self, space: &str) -> PathBuf {
        self.spaces_dir().join(space)
    }

    pub fn snapshot_dir(&self, space: &str, id: &str) -> PathBuf {
        self.space_dir(space).join(id)
    }

    pub fn meta_file(&self, space: &str, id: &str) -> PathBuf {
        self.snapshot_dir(space, id).join("meta.json")
    }

    pub fn note_file(&self, space: &str, id: &str) -> PathBuf {
        self.snapshot_dir(space, id).join("note.md")
    }

    /// The materialised payload tree of a physical snapshot.
    pub fn payload_dir(&self, space: &str, id: &str) -> PathBuf {
        self.snapshot_dir(space, id).join("snapshots")
    }

    /// Per-space file-metadata cache backing file.
    pub fn filemeta_db(&self, space: &str) -> PathBuf {
        self.space_dir(space).join("filemeta.db")
    }

    // ─── Store ──────────────────────────────────────────────────────────────

    pub fn store_dir(&self) -> PathBuf {
        self.control_dir().join("store")
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.store_dir().join("manifests")
    }

    pub fn manifest_file(&self, id: &str) -> PathBuf {
        self.manifests_dir().join(format!("{id}.json"))
    }

    // ─── Scratch ────────────────────────────────────────────────────────────

    pub fn temp_dir(&self) -> PathBuf {
        self.control_dir().join("temp")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.control_dir().join("logs")
    }
}
