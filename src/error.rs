//! # Error Types
//!
//! Defines a structured error hierarchy for the snapshot engine using `thiserror`.
//! Each error variant carries enough context for meaningful diagnostics without
//! exposing internal implementation details to the caller.
//!
//! Every error maps to one of the stable process exit codes via
//! [`RinneError::exit_code`]: 0 ok, 1 generic failure, 2 input error,
//! 3 file missing, 4 meta write failure, 5 note write failure, 130 cancelled.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type encompassing all failure modes in the snapshot engine.
#[derive(Error, Debug)]
pub enum RinneError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid input: {0}")]
    Input(#[from] InputError),

    #[error("space error: {0}")]
    Space(#[from] SpaceError),

    #[error("save failed: {0}")]
    Save(#[from] SaveError),

    #[error("restore failed: {0}")]
    Restore(#[from] RestoreError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse config: {source}")]
    Parse {
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {message}")]
    Validation { message: String },
}

/// Malformed command-line input: bad selectors, unknown references, bad dates.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("invalid snapshot reference '{0}' (expected an id, a prefix, or @N)")]
    BadSnapshotRef(String),

    #[error("invalid date '{0}' (expected YYYY-MM-DD)")]
    BadDate(String),

    #[error("invalid selector: {0}")]
    BadSelector(String),

    #[error("{0}")]
    Invalid(String),
}

/// Space lifecycle and locking errors.
#[derive(Error, Debug)]
pub enum SpaceError {
    #[error("repository not initialized at {0} (run 'rinne init' first)")]
    NotInitialized(PathBuf),

    #[error("invalid space name '{0}' (letters, digits, '-', '_'; must start with a letter; max 64 chars)")]
    InvalidName(String),

    #[error("unknown space: {0}")]
    Unknown(String),

    #[error("space already exists: {0}")]
    Exists(String),

    #[error("space '{0}' is not empty")]
    NotEmpty(String),

    #[error("space '{0}' is the current space")]
    IsCurrent(String),

    #[error("space '{space}' is locked until {until}")]
    Locked { space: String, until: String },
}

/// Errors during the save pipeline.
#[derive(Error, Debug)]
pub enum SaveError {
    #[error("source directory does not exist: {0}")]
    SourceNotFound(PathBuf),

    #[error("chunker parameters out of bounds: {message}")]
    ChunkerBounds { message: String },

    #[error("file '{path}' has an unfilled chunk slot after pipeline completion")]
    EmptyChunkSlot { path: String },

    #[error("failed to write manifest: {0}")]
    ManifestWrite(#[source] std::io::Error),

    #[error("failed to write snapshot meta: {0}")]
    MetaWrite(#[source] std::io::Error),

    #[error("failed to write snapshot note: {0}")]
    NoteWrite(#[source] std::io::Error),
}

/// Errors during restoration and hydration.
#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("ambiguous snapshot prefix '{prefix}': matched {count} snapshots")]
    AmbiguousSnapshot { prefix: String, count: usize },

    #[error("snapshot '{0}' has no manifest")]
    ManifestMissing(String),

    #[error("manifest version '{0}' is not supported")]
    BadManifestVersion(String),

    #[error("path '{0}' would escape the restore destination")]
    PathEscape(String),

    #[error("selector '{0}' matched nothing in the snapshot")]
    NoSelectorMatch(String),

    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityFailure { expected: String, actual: String },
}

/// Content-addressable store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("chunk missing from store: {0}")]
    ChunkMissing(String),

    #[error("failed to write chunk {hash}: {source}")]
    WriteFailed {
        hash: String,
        #[source]
        source: std::io::Error,
    },
}

/// File-metadata cache errors.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to commit file-meta cache: {0}")]
    CommitFailed(#[source] std::io::Error),
}

impl RinneError {
    /// Maps the error to the stable process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            RinneError::Cancelled => 130,
            RinneError::Config(_) | RinneError::Input(_) => 2,
            RinneError::Space(e) => match e {
                SpaceError::Locked { .. } => 1,
                _ => 2,
            },
            RinneError::Save(e) => match e {
                SaveError::SourceNotFound(_) => 3,
                SaveError::MetaWrite(_) => 4,
                SaveError::NoteWrite(_) => 5,
                SaveError::ChunkerBounds { .. } => 2,
                _ => 1,
            },
            RinneError::Restore(e) => match e {
                RestoreError::SnapshotNotFound(_) | RestoreError::ManifestMissing(_) => 3,
                RestoreError::AmbiguousSnapshot { .. } => 2,
                _ => 1,
            },
            RinneError::Store(e) => match e {
                StoreError::ChunkMissing(_) => 3,
                _ => 1,
            },
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, RinneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(RinneError::Cancelled.exit_code(), 130);
        assert_eq!(
            RinneError::from(SpaceError::Unknown("x".into())).exit_code(),
            2
        );
        assert_eq!(
            RinneError::from(SaveError::SourceNotFound(PathBuf::from("/x"))).exit_code(),
            3
        );
        assert_eq!(
            RinneError::from(SaveError::MetaWrite(std::io::Error::other("boom"))).exit_code(),
            4
        );
        assert_eq!(
            RinneError::from(SaveError::NoteWrite(std::io::Error::other("boom"))).exit_code(),
            5
        );
        assert_eq!(
            RinneError::from(StoreError::ChunkMissing("AB".into())).exit_code(),
            3
        );
    }
}
