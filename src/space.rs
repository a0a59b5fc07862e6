//! # Spaces, Snapshot Ids, and Locking
//!
//! A *space* is a named namespace of snapshots inside one repository. Space
//! names are `[A-Za-z][A-Za-z0-9_-]*`, at most 64 characters. The current
//! space is a one-line pointer file; `init` creates the skeleton with the
//! default space `main`.
//!
//! Snapshot ids are `YYYYMMDD'T'HHMMSS'Z'_<uuidv7>`: both halves are
//! time-ordered, so lexicographic order equals creation order.
//!
//! Locking is cooperative and expiry-stamped: `<space>.lock.<utc_expiry_ms>`
//! files inside the space directory, created with an exclusive create as the
//! atomicity primitive. Stale locks (expiry in the past) are deleted by the
//! next acquirer. Locks only coordinate this tool's own mutating operations.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use crate::error::{InputError, Result, RestoreError, SpaceError};
use crate::layout::RepoLayout;
use crate::meta::{self, SnapshotState};

/// Space created by `init` and assumed when no pointer exists.
pub const DEFAULT_SPACE: &str = "main";

/// How long a freshly acquired space lock is honoured by other invocations.
pub const LOCK_TTL: Duration = Duration::from_secs(10 * 60);

/// Validates a space name: letters, digits, hyphen, underscore; starts with
/// a letter; at most 64 characters.
pub fn validate_name(name: &str) -> std::result::Result<(), SpaceError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => chars
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
        _ => false,
    };
    if valid && name.len() <= 64 {
        Ok(())
    } else {
        Err(SpaceError::InvalidName(name.to_string()))
    }
}

/// Creates the repository skeleton and the default space. Returns `false`
/// if the repository was already initialized.
pub fn init_repo(layout: &RepoLayout) -> Result<bool> {
    if layout.is_initialized() {
        return Ok(false);
    }
    fs::create_dir_all(layout.config_dir())?;
    fs::create_dir_all(layout.space_dir(DEFAULT_SPACE))?;
    fs::create_dir_all(layout.store_dir())?;
    fs::create_dir_all(layout.manifests_dir())?;
    fs::create_dir_all(layout.temp_dir())?;
    fs::create_dir_all(layout.logs_dir())?;
    set_current_space(layout, DEFAULT_SPACE)?;
    Ok(true)
}

/// Fails unless the control directory exists.
pub fn require_initialized(layout: &RepoLayout) -> Result<()> {
    if layout.is_initialized() {
        Ok(())
    } else {
        Err(SpaceError::NotInitialized(layout.root().to_path_buf()).into())
    }
}

pub fn space_exists(layout: &RepoLayout, name: &str) -> bool {
    layout.space_dir(name).is_dir()
}

pub fn create_space(layout: &RepoLayout, name: &str) -> Result<()> {
    validate_name(name)?;
    if space_exists(layout, name) {
        return Err(SpaceError::Exists(name.to_string()).into());
    }
    fs::create_dir_all(layout.space_dir(name))?;
    Ok(())
}

/// Lists all spaces, sorted by name.
pub fn list_spaces(layout: &RepoLayout) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let dir = layout.spaces_dir();
    if dir.is_dir() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Ok(name) = entry.file_name().into_string() {
                    names.push(name);
                }
            }
        }
    }
    names.sort();
    Ok(names)
}

pub fn rename_space(layout: &RepoLayout, old: &str, new: &str) -> Result<()> {
    validate_name(new)?;
    if !space_exists(layout, old) {
        return Err(SpaceError::Unknown(old.to_string()).into());
    }
    if space_exists(layout, new) {
        return Err(SpaceError::Exists(new.to_string()).into());
    }
    fs::rename(layout.space_dir(old), layout.space_dir(new))?;
    if current_space(layout)? == old {
        set_current_space(layout, new)?;
    }
    Ok(())
}

/// Deletes a space. Refused while it still holds snapshots or is current.
pub fn delete_space(layout: &RepoLayout, name: &str) -> Result<()> {
    if !space_exists(layout, name) {
        return Err(SpaceError::Unknown(name.to_string()).into());
    }
    if current_space(layout)? == name {
        return Err(SpaceError::IsCurrent(name.to_string()).into());
    }
    if !list_snapshot_ids(layout, name)?.is_empty() {
        return Err(SpaceError::NotEmpty(name.to_string()).into());
    }
    fs::remove_dir_all(layout.space_dir(name))?;
    Ok(())
}

/// Reads the current-space pointer. A missing or blank pointer falls back to
/// the config's `current_space`, then to the default space.
pub fn current_space(layout: &RepoLayout) -> Result<String> {
    match fs::read_to_string(layout.current_space_file()) {
        Ok(text) => {
            let name = text.trim().to_string();
            if name.is_empty() {
                Ok(configured_default(layout))
            } else {
                Ok(name)
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(configured_default(layout)),
        Err(e) => Err(e.into()),
    }
}

fn configured_default(layout: &RepoLayout) -> String {
    crate::config::load(layout)
        .ok()
        .and_then(|settings| settings.current_space)
        .unwrap_or_else(|| DEFAULT_SPACE.to_string())
}

pub fn set_current_space(layout: &RepoLayout, name: &str) -> Result<()> {
    validate_name(name)?;
    fs::create_dir_all(layout.snapshots_dir())?;
    fs::write(layout.current_space_file(), format!("{name}\n"))?;
    Ok(())
}

/// Resolves the space for an operation: an explicit name must exist; no name
/// falls back to the current space, which must exist too.
pub fn resolve_space(layout: &RepoLayout, requested: Option<&str>) -> Result<String> {
    require_initialized(layout)?;
    let name = match requested {
        Some(name) => {
            validate_name(name)?;
            name.to_string()
        }
        None => current_space(layout)?,
    };
    if !space_exists(layout, &name) {
        return Err(SpaceError::Unknown(name).into());
    }
    Ok(name)
}

// ─── Snapshot Ids ───────────────────────────────────────────────────────────

/// Mints a fresh monotone-lexicographic snapshot id.
pub fn new_snapshot_id() -> String {
    format!("{}_{}", Utc::now().format("%Y%m%dT%H%M%SZ"), Uuid::now_v7())
}

/// Lists snapshot directories of a space, ascending by id (= by creation).
pub fn list_snapshot_ids(layout: &RepoLayout, space: &str) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    let dir = layout.space_dir(space);
    if dir.is_dir() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Ok(name) = entry.file_name().into_string() {
                    ids.push(name);
                }
            }
        }
    }
    ids.sort();
    Ok(ids)
}

/// Lists only snapshots that reached the `Complete` state.
pub fn list_complete_snapshot_ids(layout: &RepoLayout, space: &str) -> Result<Vec<String>> {
    Ok(list_snapshot_ids(layout, space)?
        .into_iter()
        .filter(|id| {
            meta::snapshot_state(&layout.snapshot_dir(space, id)) == SnapshotState::Complete
        })
        .collect())
}

/// How a snapshot is addressed on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotRef {
    /// The most recent complete snapshot.
    Latest,
    /// N snapshots before the latest (0 = latest).
    Back(usize),
    /// An id or unique id prefix.
    Id(String),
}

impl SnapshotRef {
    /// Parses `@N` into [`SnapshotRef::Back`], anything else into an id.
    pub fn parse(s: &str) -> std::result::Result<SnapshotRef, InputError> {
        if let Some(n) = s.strip_prefix('@') {
            let n: usize = n
                .parse()
                .map_err(|_| InputError::BadSnapshotRef(s.to_string()))?;
            Ok(SnapshotRef::Back(n))
        } else if s.is_empty() {
            Err(InputError::BadSnapshotRef(s.to_string()))
        } else {
            Ok(SnapshotRef::Id(s.to_string()))
        }
    }
}

/// Resolves a snapshot reference within a space to a concrete id.
pub fn resolve_snapshot(
    layout: &RepoLayout,
    space: &str,
    reference: &SnapshotRef,
) -> Result<String> {
    let ids = list_complete_snapshot_ids(layout, space)?;
    match reference {
        SnapshotRef::Latest => ids
            .last()
            .cloned()
            .ok_or_else(|| RestoreError::SnapshotNotFound("<latest>".to_string()).into()),
        SnapshotRef::Back(n) => {
            if *n < ids.len() {
                Ok(ids[ids.len() - 1 - n].clone())
            } else {
                Err(RestoreError::SnapshotNotFound(format!("@{n}")).into())
            }
        }
        SnapshotRef::Id(prefix) => {
            let matches: Vec<&String> = ids.iter().filter(|id| id.starts_with(prefix)).collect();
            match matches.len() {
                0 => Err(RestoreError::SnapshotNotFound(prefix.clone()).into()),
                1 => Ok(matches[0].clone()),
                n => Err(RestoreError::AmbiguousSnapshot {
                    prefix: prefix.clone(),
                    count: n,
                }
                .into()),
            }
        }
    }
}

// ─── Locking ────────────────────────────────────────────────────────────────

/// A held cooperative lock; released (best-effort) on drop.
#[derive(Debug)]
pub struct SpaceLock {
    path: PathBuf,
}

impl SpaceLock {
    /// Acquires the lock for `space`, deleting any expired lock files first.
    pub fn acquire(layout: &RepoLayout, space: &str) -> Result<SpaceLock> {
        let dir = layout.space_dir(space);
        fs::create_dir_all(&dir)?;
        let now_ms = Utc::now().timestamp_millis();
        let prefix = format!("{space}.lock.");

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stamp) = name.strip_prefix(&prefix) else {
                continue;
            };
            match stamp.parse::<i64>() {
                Ok(expiry_ms) if expiry_ms > now_ms => {
                    let until = Utc
                        .timestamp_millis_opt(expiry_ms)
                        .single()
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| expiry_ms.to_string());
                    return Err(SpaceError::Locked {
                        space: space.to_string(),
                        until,
                    }
                    .into());
                }
                // Expired or unparsable stamps are stale debris.
                _ => {
                    let _ = fs::remove_file(entry.path());
                }
            }
        }

        let expiry = now_ms + LOCK_TTL.as_millis() as i64;
        let path = dir.join(format!("{prefix}{expiry}"));
        // Exclusive create is the atomicity primitive; a concurrent acquirer
        // that wins leaves us with an AlreadyExists conflict.
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(SpaceLock { path }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let until = Utc
                    .timestamp_millis_opt(expiry)
                    .single()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| expiry.to_string());
                Err(SpaceError::Locked {
                    space: space.to_string(),
                    until,
                }
                .into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Acquires every space's lock (used by GC, which spans all spaces).
    /// Either all locks are taken or none remain held.
    pub fn acquire_all(layout: &RepoLayout) -> Result<Vec<SpaceLock>> {
        let mut locks = Vec::new();
        for space in list_spaces(layout)? {
            locks.push(SpaceLock::acquire(layout, &space)?);
        }
        Ok(locks)
    }
}

impl Drop for SpaceLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> (tempfile::TempDir, RepoLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = RepoLayout::new(dir.path());
        init_repo(&layout).unwrap();
        (dir, layout)
    }

    #[test]
    fn name_validation() {
        validate_name("main").unwrap();
        validate_name("a-b_c9").unwrap();
        assert!(validate_name("9lives").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn init_creates_default_space() {
        let (_dir, layout) = repo();
        assert!(space_exists(&layout, DEFAULT_SPACE));
        assert_eq!(current_space(&layout).unwrap(), DEFAULT_SPACE);
        assert!(!init_repo(&layout).unwrap(), "second init is a no-op");
    }

    #[test]
    fn missing_pointer_falls_back_to_config() {
        let (_dir, layout) = repo();
        create_space(&layout, "work").unwrap();
        fs::remove_file(layout.current_space_file()).unwrap();

        fs::create_dir_all(layout.config_dir()).unwrap();
        fs::write(layout.config_file(), "current_space = \"work\"\n").unwrap();
        assert_eq!(current_space(&layout).unwrap(), "work");

        fs::remove_file(layout.config_file()).unwrap();
        assert_eq!(current_space(&layout).unwrap(), DEFAULT_SPACE);
    }

    #[test]
    fn space_lifecycle() {
        let (_dir, layout) = repo();
        create_space(&layout, "feature").unwrap();
        assert!(matches!(
            create_space(&layout, "feature"),
            Err(crate::error::RinneError::Space(SpaceError::Exists(_)))
        ));
        assert_eq!(list_spaces(&layout).unwrap(), vec!["feature", "main"]);

        rename_space(&layout, "feature", "renamed").unwrap();
        assert!(space_exists(&layout, "renamed"));

        delete_space(&layout, "renamed").unwrap();
        assert!(!space_exists(&layout, "renamed"));

        assert!(matches!(
            delete_space(&layout, DEFAULT_SPACE),
            Err(crate::error::RinneError::Space(SpaceError::IsCurrent(_)))
        ));
    }

    #[test]
    fn delete_refuses_non_empty_space() {
        let (_dir, layout) = repo();
        create_space(&layout, "busy").unwrap();
        fs::create_dir_all(layout.snapshot_dir("busy", "20240101T000000Z_x")).unwrap();
        assert!(matches!(
            delete_space(&layout, "busy"),
            Err(crate::error::RinneError::Space(SpaceError::NotEmpty(_)))
        ));
    }

    #[test]
    fn snapshot_ids_sort_by_creation() {
        let a = new_snapshot_id();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = new_snapshot_id();
        assert!(a < b);
    }

    #[test]
    fn snapshot_resolution() {
        let (_dir, layout) = repo();
        for id in ["20240101T000000Z_a", "20240201T000000Z_b"] {
            let snap = layout.snapshot_dir(DEFAULT_SPACE, id);
            fs::create_dir_all(&snap).unwrap();
            fs::write(snap.join("meta.json"), b"{}").unwrap();
            fs::write(snap.join("note.md"), b"").unwrap();
        }
        // A staging directory must not resolve.
        fs::create_dir_all(layout.snapshot_dir(DEFAULT_SPACE, "20240301T000000Z_c")).unwrap();

        let latest = resolve_snapshot(&layout, DEFAULT_SPACE, &SnapshotRef::Latest).unwrap();
        assert_eq!(latest, "20240201T000000Z_b");
        let back = resolve_snapshot(&layout, DEFAULT_SPACE, &SnapshotRef::Back(1)).unwrap();
        assert_eq!(back, "20240101T000000Z_a");
        let by_prefix =
            resolve_snapshot(&layout, DEFAULT_SPACE, &SnapshotRef::parse("202401").unwrap())
                .unwrap();
        assert_eq!(by_prefix, "20240101T000000Z_a");
        assert!(
            resolve_snapshot(&layout, DEFAULT_SPACE, &SnapshotRef::parse("2024").unwrap())
                .is_err(),
            "ambiguous prefix"
        );
    }

    #[test]
    fn lock_excludes_second_acquirer_until_released() {
        let (_dir, layout) = repo();
        let lock = SpaceLock::acquire(&layout, DEFAULT_SPACE).unwrap();
        assert!(matches!(
            SpaceLock::acquire(&layout, DEFAULT_SPACE),
            Err(crate::error::RinneError::Space(SpaceError::Locked { .. }))
        ));
        drop(lock);
        SpaceLock::acquire(&layout, DEFAULT_SPACE).unwrap();
    }

    #[test]
    fn expired_lock_is_swept() {
        let (_dir, layout) = repo();
        let dir = layout.space_dir(DEFAULT_SPACE);
        let stale = dir.join(format!("{DEFAULT_SPACE}.lock.1000"));
        fs::write(&stale, b"").unwrap();

        let _lock = SpaceLock::acquire(&layout, DEFAULT_SPACE).unwrap();
        assert!(!stale.exists());
    }
}
