//! # Configuration
//!
//! Durable engine settings live in `.rinne/config/config.toml`. Every field
//! has a default, so a repository without a config file behaves sensibly;
//! values are validated after parsing (compression level range, chunker
//! bounds, worker count) before any operation runs.

use serde::{Deserialize, Serialize};
use std::fs;

use crate::chunker::ChunkerParams;
use crate::compress;
use crate::error::{ConfigError, Result};
use crate::layout::RepoLayout;

/// Hard ceiling on configured pipeline parallelism.
const MAX_WORKERS: usize = 64;

/// Engine settings controlling the save pipeline and snapshot texture.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settings {
    /// Pipeline parallelism. 0 selects `clamp(processor_count, 1, 16)`.
    #[serde(default)]
    pub workers: usize,

    /// Zstd level for chunk storage (1-19, default 3).
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Chunker minimum chunk size in bytes.
    #[serde(default = "default_chunk_min")]
    pub chunk_min: u32,

    /// Chunker average (target) chunk size in bytes.
    #[serde(default = "default_chunk_avg")]
    pub chunk_avg: u32,

    /// Chunker maximum chunk size in bytes.
    #[serde(default = "default_chunk_max")]
    pub chunk_max: u32,

    /// Write a UTF-8 BOM at the start of `note.md` files.
    #[serde(default = "default_true")]
    pub note_bom: bool,

    /// Use CRLF line endings in `note.md` files.
    #[serde(default)]
    pub note_crlf: bool,

    /// Append engine events to a plain-text log under `.rinne/logs/`.
    #[serde(default)]
    pub log_to_file: bool,

    /// Space assumed when the `snapshots/current` pointer is absent.
    #[serde(default)]
    pub current_space: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: 0,
            compression_level: default_compression_level(),
            chunk_min: default_chunk_min(),
            chunk_avg: default_chunk_avg(),
            chunk_max: default_chunk_max(),
            note_bom: true,
            note_crlf: false,
            log_to_file: false,
            current_space: None,
        }
    }
}

fn default_compression_level() -> i32 {
    compress::DEFAULT_LEVEL
}
fn default_chunk_min() -> u32 {
    ChunkerParams::DEFAULT.min
}
fn default_chunk_avg() -> u32 {
    ChunkerParams::DEFAULT.avg
}
fn default_chunk_max() -> u32 {
    ChunkerParams::DEFAULT.max
}
fn default_true() -> bool {
    true
}

impl Settings {
    /// Effective pipeline parallelism for this machine.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            num_cpus::get().clamp(1, 16)
        }
    }

    pub fn chunker_params(&self) -> ChunkerParams {
        ChunkerParams {
            min: self.chunk_min,
            avg: self.chunk_avg,
            max: self.chunk_max,
        }
    }

    pub fn note_options(&self) -> crate::meta::NoteOptions {
        crate::meta::NoteOptions {
            bom: self.note_bom,
            crlf: self.note_crlf,
        }
    }
}

/// Loads settings from the repository config file; absent file = defaults.
pub fn load(layout: &RepoLayout) -> Result<Settings> {
    let path = layout.config_file();
    let settings: Settings = match fs::read_to_string(&path) {
        Ok(text) => toml::from_str(&text).map_err(|source| ConfigError::Parse { source })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
        Err(e) => return Err(e.into()),
    };
    validate(&settings)?;
    Ok(settings)
}

/// Writes a default config file during `init` (skipped if one exists).
pub fn write_default(layout: &RepoLayout) -> Result<()> {
    let path = layout.config_file();
    if path.exists() {
        return Ok(());
    }
    fs::create_dir_all(layout.config_dir())?;
    let toml_str = toml::to_string_pretty(&Settings::default())
        .map_err(|e| anyhow::anyhow!("failed to serialize config: {e}"))?;
    fs::write(&path, toml_str)?;
    Ok(())
}

fn validate(settings: &Settings) -> std::result::Result<(), ConfigError> {
    if settings.compression_level < compress::MIN_LEVEL
        || settings.compression_level > compress::MAX_LEVEL
    {
        return Err(ConfigError::Validation {
            message: format!(
                "compression_level must be between {} and {}, got {}",
                compress::MIN_LEVEL,
                compress::MAX_LEVEL,
                settings.compression_level
            ),
        });
    }

    if settings.workers > MAX_WORKERS {
        return Err(ConfigError::Validation {
            message: format!("workers must be at most {MAX_WORKERS}, got {}", settings.workers),
        });
    }

    settings
        .chunker_params()
        .validate()
        .map_err(|e| ConfigError::Validation {
            message: e.to_string(),
        })?;

    if let Some(space) = &settings.current_space {
        crate::space::validate_name(space).map_err(|e| ConfigError::Validation {
            message: e.to_string(),
        })?;
    }

    Ok(())
}
