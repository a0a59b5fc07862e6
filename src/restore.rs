//! # Restore Engine
//!
//! Materialises a manifest into a destination tree by streaming chunks out of
//! the content-addressable store, decompressing, and appending in chunk
//! order. Parallelism is over files; within one file chunks are strictly
//! sequential.
//!
//! Every output path is validated *before* any byte is written: a manifest
//! path that would escape the destination root fails the whole operation.
//! The check is two-layered — manifest paths are rejected lexically up
//! front (absolute, `.`/`..`, empty components), and each resolved parent
//! directory is canonicalised at write time and must stay under the
//! canonicalised destination root, so a symlink inside the destination
//! cannot redirect a write outside it. "Pick" is the same algorithm
//! restricted to a selector (a file path or a directory prefix); hydration
//! restores into the snapshot's own payload directory, turning a logical
//! snapshot into a physical one.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};

use crate::cancel::CancelToken;
use crate::cas::ChunkStore;
use crate::error::{Result, RestoreError, RinneError};
use crate::hasher;
use crate::layout::{RepoLayout, CONTROL_DIR};
use crate::manifest::{FileRecord, Manifest};
use crate::snapshot_hash::{self, FileDigest};

/// Options controlling a restore operation.
pub struct RestoreOptions {
    /// Destination directory (created if absent).
    pub dest: PathBuf,
    /// Restrict to a file or directory prefix inside the snapshot.
    pub selector: Option<String>,
    /// Strip the matched selector prefix from output paths ("pick").
    pub strip_selector: bool,
    /// Recompute the snapshot hash from written bytes and compare.
    pub verify: bool,
    /// Worker count for per-file parallelism.
    pub workers: usize,
    pub verbose: bool,
}

impl RestoreOptions {
    pub fn new(dest: PathBuf, workers: usize) -> Self {
        Self {
            dest,
            selector: None,
            strip_selector: false,
            verify: true,
            workers,
            verbose: false,
        }
    }
}

/// Statistics from a restore operation.
#[derive(Debug, Default)]
pub struct RestoreStats {
    pub files_restored: u64,
    pub bytes_restored: u64,
}

/// Restores (part of) a manifest into `opts.dest`.
pub fn restore_manifest(
    store: &ChunkStore,
    manifest: &Manifest,
    opts: &RestoreOptions,
    cancel: &CancelToken,
) -> Result<RestoreStats> {
    let selected = select_entries(manifest, opts)?;

    // Validate every output path before touching the destination.
    for (record, out_rel) in &selected.files {
        validate_rel_path(out_rel).map_err(|_| RestoreError::PathEscape(record.path.clone()))?;
    }
    for dir in &selected.dirs {
        validate_rel_path(dir).map_err(|_| RestoreError::PathEscape(dir.clone()))?;
    }

    fs::create_dir_all(&opts.dest)?;
    let dest_root = opts.dest.canonicalize()?;
    for dir in &selected.dirs {
        fs::create_dir_all(opts.dest.join(Path::new(dir)))?;
    }

    let progress = restore_progress(selected.files.len() as u64, opts.verbose);
    let stats = write_files(store, &selected.files, &dest_root, opts, cancel, &progress)?;
    progress.finish_and_clear();
    cancel.check()?;

    if opts.verify && opts.selector.is_none() && hasher::is_hex_hash(&manifest.original_sha256) {
        let recomputed = snapshot_hash::fold_sorted(&stats.digests);
        if recomputed != manifest.original_sha256 {
            return Err(RestoreError::IntegrityFailure {
                expected: manifest.original_sha256.clone(),
                actual: recomputed,
            }
            .into());
        }
    }

    Ok(RestoreStats {
        files_restored: stats.files_restored,
        bytes_restored: stats.bytes_restored,
    })
}

/// Restores a single sub-path of a snapshot ("pick").
pub fn pick(
    store: &ChunkStore,
    manifest: &Manifest,
    selector: &str,
    out: &Path,
    workers: usize,
    cancel: &CancelToken,
) -> Result<RestoreStats> {
    restore_manifest(
        store,
        manifest,
        &RestoreOptions {
            dest: out.to_path_buf(),
            selector: Some(selector.to_string()),
            strip_selector: true,
            verify: false,
            workers,
            verbose: false,
        },
        cancel,
    )
}

/// Restores multiple selectors into one destination, full paths preserved.
pub fn export(
    store: &ChunkStore,
    manifest: &Manifest,
    selectors: &[String],
    dest: &Path,
    workers: usize,
    cancel: &CancelToken,
) -> Result<RestoreStats> {
    let mut total = RestoreStats::default();
    if selectors.is_empty() {
        return restore_manifest(
            store,
            manifest,
            &RestoreOptions {
                verify: false,
                ..RestoreOptions::new(dest.to_path_buf(), workers)
            },
            cancel,
        );
    }
    for selector in selectors {
        let stats = restore_manifest(
            store,
            manifest,
            &RestoreOptions {
                dest: dest.to_path_buf(),
                selector: Some(selector.clone()),
                strip_selector: false,
                verify: false,
                workers,
                verbose: false,
            },
            cancel,
        )?;
        total.files_restored += stats.files_restored;
        total.bytes_restored += stats.bytes_restored;
    }
    Ok(total)
}

/// Materialises a snapshot's payload from its manifest.
///
/// `ephemeral` hydrates into `temp/<id>/` and returns that path; otherwise
/// the payload lands in the snapshot's own `snapshots/` directory.
pub fn hydrate(
    layout: &RepoLayout,
    store: &ChunkStore,
    space: &str,
    id: &str,
    ephemeral: bool,
    workers: usize,
    cancel: &CancelToken,
) -> Result<PathBuf> {
    let manifest = load_snapshot_manifest(layout, id)?;
    let dest = if ephemeral {
        layout.temp_dir().join(id)
    } else {
        layout.payload_dir(space, id)
    };
    restore_manifest(
        store,
        &manifest,
        &RestoreOptions::new(dest.clone(), workers),
        cancel,
    )?;
    Ok(dest)
}

/// Loads the manifest backing a snapshot id.
pub fn load_snapshot_manifest(layout: &RepoLayout, id: &str) -> Result<Manifest> {
    let path = layout.manifest_file(id);
    if !path.is_file() {
        return Err(RestoreError::ManifestMissing(id.to_string()).into());
    }
    Manifest::load(&path)
}

/// Clears a restore destination of everything except the control directory.
pub fn purge_destination(dest: &Path) -> Result<()> {
    if !dest.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dest)? {
        let entry = entry?;
        if entry.file_name() == CONTROL_DIR {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

// ─── Internals ──────────────────────────────────────────────────────────────

struct Selected<'a> {
    /// `(record, output-relative path)` pairs.
    files: Vec<(&'a FileRecord, String)>,
    dirs: Vec<String>,
}

fn select_entries<'a>(manifest: &'a Manifest, opts: &RestoreOptions) -> Result<Selected<'a>> {
    let selector = opts.selector.as_deref().map(|s| s.trim_end_matches('/'));

    let matches = |rel: &str, is_dir: bool| -> Option<String> {
        match selector {
            None => Some(rel.to_string()),
            Some(sel) => {
                if rel == sel {
                    if !opts.strip_selector {
                        Some(rel.to_string())
                    } else if is_dir {
                        // The selected directory maps onto the output root.
                        Some(String::new())
                    } else {
                        Some(rel.rsplit('/').next().unwrap_or(rel).to_string())
                    }
                } else if let Some(rest) = rel.strip_prefix(sel).and_then(|r| r.strip_prefix('/')) {
                    let out = if opts.strip_selector {
                        rest.to_string()
                    } else {
                        rel.to_string()
                    };
                    Some(out)
                } else {
                    None
                }
            }
        }
    };

    let files: Vec<(&FileRecord, String)> = manifest
        .files
        .iter()
        .filter_map(|record| matches(&record.path, false).map(|out| (record, out)))
        .collect();

    let dir_hits: Vec<String> = manifest
        .dirs
        .iter()
        .filter_map(|dir| matches(dir, true))
        .collect();
    let matched_dirs = !dir_hits.is_empty();
    let dirs: Vec<String> = dir_hits.into_iter().filter(|d| !d.is_empty()).collect();

    if files.is_empty() && !matched_dirs {
        if let Some(sel) = selector {
            return Err(RestoreError::NoSelectorMatch(sel.to_string()).into());
        }
    }

    Ok(Selected { files, dirs })
}

/// Rejects relative paths that are empty, absolute, or contain `.`/`..`
/// components — anything that could resolve outside the destination root.
fn validate_rel_path(rel: &str) -> std::result::Result<(), ()> {
    if rel.is_empty() || rel.starts_with('/') || rel.contains('\\') {
        return Err(());
    }
    for comp in rel.split('/') {
        if comp.is_empty() || comp == "." || comp == ".." {
            return Err(());
        }
    }
    Ok(())
}

struct WriteResult {
    files_restored: u64,
    bytes_restored: u64,
    digests: BTreeMap<String, [u8; 32]>,
}

fn write_files(
    store: &ChunkStore,
    files: &[(&FileRecord, String)],
    dest_root: &Path,
    opts: &RestoreOptions,
    cancel: &CancelToken,
    progress: &ProgressBar,
) -> Result<WriteResult> {
    let workers = opts.workers.max(1);
    let next = AtomicUsize::new(0);
    let bytes_restored = AtomicU64::new(0);
    let failure: Mutex<Option<RinneError>> = Mutex::new(None);
    let digests: Mutex<BTreeMap<String, [u8; 32]>> = Mutex::new(BTreeMap::new());

    std::thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| loop {
                if cancel.is_cancelled() || failure.lock().unwrap().is_some() {
                    return;
                }
                let i = next.fetch_add(1, Ordering::Relaxed);
                let Some((record, out_rel)) = files.get(i) else {
                    return;
                };
                match write_one(store, record, out_rel, dest_root, opts, cancel) {
                    Ok(digest) => {
                        bytes_restored.fetch_add(record.bytes, Ordering::Relaxed);
                        if opts.verify {
                            digests.lock().unwrap().insert(record.path.clone(), digest);
                        }
                        progress.inc(1);
                    }
                    Err(e) => {
                        failure.lock().unwrap().get_or_insert(e);
                        return;
                    }
                }
            });
        }
    });

    cancel.check()?;
    if let Some(err) = failure.lock().unwrap().take() {
        return Err(err);
    }

    Ok(WriteResult {
        files_restored: files.len() as u64,
        bytes_restored: bytes_restored.load(Ordering::Relaxed),
        digests: digests.into_inner().unwrap(),
    })
}

/// Writes one file from its chunk list; returns the per-file digest keyed by
/// the *manifest* path so verification matches the original fold order.
fn write_one(
    store: &ChunkStore,
    record: &FileRecord,
    out_rel: &str,
    dest_root: &Path,
    opts: &RestoreOptions,
    cancel: &CancelToken,
) -> Result<[u8; 32]> {
    let target = opts.dest.join(Path::new(out_rel));
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
        // The lexical check cannot see symlinks already sitting inside the
        // destination; the canonicalised parent must still be under the root.
        let resolved = parent.canonicalize()?;
        if !resolved.starts_with(dest_root) {
            return Err(RestoreError::PathEscape(record.path.clone()).into());
        }
    }
    // Never write through a pre-existing symlink; the restore owns the
    // destination entry and replaces it with a regular file.
    if target
        .symlink_metadata()
        .is_ok_and(|m| m.file_type().is_symlink())
    {
        fs::remove_file(&target)?;
    }

    let mut digest = FileDigest::new(&record.path, record.bytes);
    let mut out = std::io::BufWriter::new(fs::File::create(&target)?);
    let mut buf = vec![0u8; 64 * 1024];

    for hash in &record.chunk_hashes {
        cancel.check()?;
        let mut reader = store.open_read(hash)?;
        loop {
            let n = std::io::Read::read(&mut reader, &mut buf)?;
            if n == 0 {
                break;
            }
            std::io::Write::write_all(&mut out, &buf[..n])?;
            digest.update(&buf[..n]);
        }
    }
    std::io::Write::flush(&mut out)?;

    Ok(digest.finalize())
}

fn restore_progress(total: u64, verbose: bool) -> ProgressBar {
    if verbose || total == 0 {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.green} Restoring [{bar:30.cyan/dim}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─"),
    );
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{FileRecord, MANIFEST_VERSION};
    use pretty_assertions::assert_eq;

    fn store() -> (tempfile::TempDir, ChunkStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::open(dir.path().join("store"), 3).unwrap();
        (dir, store)
    }

    /// Builds a manifest over literal file contents, inserting chunks.
    fn manifest_of(store: &ChunkStore, files: &[(&str, &[u8])], dirs: &[&str]) -> Manifest {
        let mut digests = BTreeMap::new();
        let mut records: Vec<FileRecord> = files
            .iter()
            .map(|(rel, contents)| {
                let chunk_hashes = if contents.is_empty() {
                    vec![]
                } else {
                    vec![store.put_if_absent(contents).unwrap().hash]
                };
                let mut digest = FileDigest::new(rel, contents.len() as u64);
                digest.update(contents);
                digests.insert(rel.to_string(), digest.finalize());
                FileRecord {
                    path: rel.to_string(),
                    bytes: contents.len() as u64,
                    chunk_hashes,
                }
            })
            .collect();
        records.sort_by(|a, b| a.path.as_bytes().cmp(b.path.as_bytes()));

        Manifest {
            version: MANIFEST_VERSION.to_string(),
            root: "test".into(),
            original_sha256: snapshot_hash::fold_sorted(&digests),
            total_bytes: files.iter().map(|(_, c)| c.len() as u64).sum(),
            avg_chunk: 4 * 1024 * 1024,
            min_chunk: 1024 * 1024,
            max_chunk: 16 * 1024 * 1024,
            compression_level: 3,
            file_count: records.len() as u64,
            files: records,
            dirs: dirs.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn full_restore_with_verify() {
        let (dir, store) = store();
        let manifest = manifest_of(
            &store,
            &[("a.txt", b""), ("sub/b.bin", b"payload")],
            &["sub"],
        );
        let dest = dir.path().join("out");

        let stats = restore_manifest(
            &store,
            &manifest,
            &RestoreOptions::new(dest.clone(), 2),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(stats.files_restored, 2);
        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"");
        assert_eq!(fs::read(dest.join("sub/b.bin")).unwrap(), b"payload");
    }

    #[test]
    fn verify_catches_corruption() {
        let (dir, store) = store();
        let mut manifest = manifest_of(&store, &[("f", b"data")], &[]);
        manifest.original_sha256 = "0".repeat(64).to_ascii_uppercase();

        let err = restore_manifest(
            &store,
            &manifest,
            &RestoreOptions::new(dir.path().join("out"), 1),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RinneError::Restore(RestoreError::IntegrityFailure { .. })
        ));
    }

    #[test]
    fn escaping_paths_write_nothing() {
        let (dir, store) = store();
        let mut manifest = manifest_of(&store, &[("ok.txt", b"fine")], &[]);
        manifest.files.push(FileRecord {
            path: "../escape.txt".into(),
            bytes: 4,
            chunk_hashes: vec![store.put_if_absent(b"evil").unwrap().hash],
        });

        let dest = dir.path().join("out");
        let err = restore_manifest(
            &store,
            &manifest,
            &RestoreOptions::new(dest.clone(), 1),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RinneError::Restore(RestoreError::PathEscape(_))
        ));
        assert!(!dest.exists(), "no bytes written under dest");
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_parent_cannot_escape() {
        let (dir, store) = store();
        let manifest = manifest_of(&store, &[("sub/leak.txt", b"secret")], &["sub"]);

        let dest = dir.path().join("out");
        let outside = dir.path().join("outside");
        fs::create_dir_all(&dest).unwrap();
        fs::create_dir_all(&outside).unwrap();
        // A hostile or stale symlink already inside the destination.
        std::os::unix::fs::symlink(&outside, dest.join("sub")).unwrap();

        let err = restore_manifest(
            &store,
            &manifest,
            &RestoreOptions::new(dest, 1),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RinneError::Restore(RestoreError::PathEscape(_))
        ));
        assert!(!outside.join("leak.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_file_is_replaced_not_followed() {
        let (dir, store) = store();
        let manifest = manifest_of(&store, &[("f.txt", b"fresh")], &[]);

        let dest = dir.path().join("out");
        let outside = dir.path().join("victim.txt");
        fs::create_dir_all(&dest).unwrap();
        fs::write(&outside, b"old").unwrap();
        std::os::unix::fs::symlink(&outside, dest.join("f.txt")).unwrap();

        restore_manifest(
            &store,
            &manifest,
            &RestoreOptions::new(dest.clone(), 1),
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(fs::read(&outside).unwrap(), b"old");
        let meta = fs::symlink_metadata(dest.join("f.txt")).unwrap();
        assert!(meta.file_type().is_file());
        assert_eq!(fs::read(dest.join("f.txt")).unwrap(), b"fresh");
    }

    #[test]
    fn absolute_and_dot_paths_rejected() {
        for bad in ["/abs", "a/../b", "./x", "a//b", ""] {
            assert!(validate_rel_path(bad).is_err(), "{bad:?} must be rejected");
        }
        validate_rel_path("a/b.txt").unwrap();
    }

    #[test]
    fn pick_strips_directory_prefix() {
        let (dir, store) = store();
        let manifest = manifest_of(
            &store,
            &[
                ("src/lib/x.rs", b"x"),
                ("src/lib/deep/y.rs", b"y"),
                ("src/main.rs", b"m"),
            ],
            &["src", "src/lib", "src/lib/deep"],
        );
        let out = dir.path().join("out");

        let stats = pick(
            &store,
            &manifest,
            "src/lib/",
            &out,
            1,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(stats.files_restored, 2);
        assert_eq!(fs::read(out.join("x.rs")).unwrap(), b"x");
        assert_eq!(fs::read(out.join("deep/y.rs")).unwrap(), b"y");
        assert!(!out.join("main.rs").exists());
        assert!(!out.join("src").exists());
    }

    #[test]
    fn pick_single_file() {
        let (dir, store) = store();
        let manifest = manifest_of(&store, &[("src/lib/x.rs", b"x")], &[]);
        let out = dir.path().join("out");

        pick(&store, &manifest, "src/lib/x.rs", &out, 1, &CancelToken::new()).unwrap();
        assert_eq!(fs::read(out.join("x.rs")).unwrap(), b"x");
    }

    #[test]
    fn unmatched_selector_fails() {
        let (dir, store) = store();
        let manifest = manifest_of(&store, &[("a", b"a")], &[]);
        let err = pick(
            &store,
            &manifest,
            "nope",
            &dir.path().join("out"),
            1,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            RinneError::Restore(RestoreError::NoSelectorMatch(_))
        ));
    }

    #[test]
    fn export_keeps_full_paths() {
        let (dir, store) = store();
        let manifest = manifest_of(
            &store,
            &[("src/a.rs", b"a"), ("docs/b.md", b"b")],
            &["src", "docs"],
        );
        let dest = dir.path().join("exported");

        let stats = export(
            &store,
            &manifest,
            &["src".to_string(), "docs/b.md".to_string()],
            &dest,
            1,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(stats.files_restored, 2);
        assert!(dest.join("src/a.rs").is_file());
        assert!(dest.join("docs/b.md").is_file());
    }

    #[test]
    fn missing_chunk_is_fatal() {
        let (dir, store) = store();
        let mut manifest = manifest_of(&store, &[("f", b"data")], &[]);
        manifest.files[0].chunk_hashes = vec!["A".repeat(64)];

        let err = restore_manifest(
            &store,
            &manifest,
            &RestoreOptions::new(dir.path().join("out"), 1),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn purge_spares_control_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(CONTROL_DIR).join("store")).unwrap();
        fs::create_dir_all(dir.path().join("junk")).unwrap();
        fs::write(dir.path().join("file.txt"), b"x").unwrap();

        purge_destination(dir.path()).unwrap();
        assert!(dir.path().join(CONTROL_DIR).is_dir());
        assert!(!dir.path().join("junk").exists());
        assert!(!dir.path().join("file.txt").exists());
    }
}
