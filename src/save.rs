//! # Save Pipeline
//!
//! Turns a working tree into a compact snapshot: manifest + content-addressed
//! chunks, with `meta.json` written last as the completion marker.
//!
//! ## Algorithm
//!
//! 1. Plan the tree (Planner + ignore rules), acquire the space lock, and
//!    sweep any incomplete snapshot directories left by earlier runs.
//! 2. Run W file producers and W chunk consumers over one bounded channel.
//!    Producers consult the file-metadata cache; a *clean* file (size+mtime
//!    match and every cached chunk still stored) reuses its cached chunk
//!    list without touching its bytes. Dirty files stream through the
//!    FastCDC chunker; each chunk is pushed into the channel while the
//!    per-file content hash and snapshot digest accumulate.
//! 3. Consumers insert chunks into the store (`put_if_absent`) and back-fill
//!    the per-file hash slots by chunk index.
//! 4. Validate that no slot is empty, commit the cache, write the manifest
//!    atomically, compute the snapshot hash, write `meta.json`, and ensure
//!    `note.md`.
//!
//! Any failure or cancellation deletes the staging snapshot directory and
//! its manifest; chunks already inserted stay behind as orphans until the
//! next GC.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};

use crate::cancel::CancelToken;
use crate::cas::ChunkStore;
use crate::chunker::{ChunkStream, ChunkerParams};
use crate::compress;
use crate::config::Settings;
use crate::error::{Result, RinneError, SaveError};
use crate::filemeta::FileMetaCache;
use crate::ignore::IgnoreEngine;
use crate::layout::{RepoLayout, IGNORE_FILE};
use crate::manifest::{FileRecord, Manifest, MANIFEST_VERSION};
use crate::meta::{self, SnapshotMeta, SnapshotState, META_VERSION};
use crate::planner::{self, Plan};
use crate::snapshot_hash::{self, FileDigest, HashMode, SKIP_HASH};
use crate::space::{self, SpaceLock};

/// Compression/speed trade-off selected on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompactProfile {
    /// Configured compression level.
    Balanced,
    /// Highest-ratio profile (`--compact-full`).
    Full,
    /// Fastest profile (`--compact-speed`).
    Speed,
}

impl CompactProfile {
    fn level(&self, settings: &Settings) -> i32 {
        match self {
            CompactProfile::Balanced => settings.compression_level,
            CompactProfile::Full => compress::FULL_LEVEL,
            CompactProfile::Speed => compress::DEFAULT_LEVEL,
        }
    }
}

/// Options for one save invocation.
pub struct SaveOptions {
    /// Target space; `None` means the current space.
    pub space: Option<String>,
    /// Note text written beside the snapshot.
    pub message: Option<String>,
    pub hash_mode: HashMode,
    pub profile: CompactProfile,
    /// Alternate source root (used by `import`); `None` = the working tree.
    pub source: Option<PathBuf>,
    pub verbose: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            space: None,
            message: None,
            hash_mode: HashMode::Full,
            profile: CompactProfile::Balanced,
            source: None,
            verbose: false,
        }
    }
}

/// Summary of a committed snapshot.
#[derive(Debug)]
pub struct SaveOutcome {
    pub id: String,
    pub space: String,
    pub file_count: u64,
    pub total_bytes: u64,
    /// Files satisfied from the file-metadata cache without re-reading.
    pub reused_files: u64,
    /// Bytes streamed through the chunker (cache misses only).
    pub bytes_chunked: u64,
    /// Chunks newly written to the store.
    pub chunks_written: u64,
    pub snapshot_hash: String,
    pub duration_ms: u64,
}

/// Executes a save, returning the committed snapshot.
pub fn save_snapshot(
    layout: &RepoLayout,
    settings: &Settings,
    opts: &SaveOptions,
    cancel: &CancelToken,
) -> Result<SaveOutcome> {
    let start = Instant::now();
    let space = space::resolve_space(layout, opts.space.as_deref())?;

    let source_root = opts
        .source
        .clone()
        .unwrap_or_else(|| layout.root().to_path_buf());
    if !source_root.is_dir() {
        return Err(SaveError::SourceNotFound(source_root).into());
    }

    let params = settings.chunker_params();
    params.validate()?;
    let level = opts.profile.level(settings);

    let ignore = IgnoreEngine::load(&source_root.join(IGNORE_FILE))?;
    let plan = planner::plan_tree(&source_root, &ignore)?;
    cancel.check()?;

    let _lock = SpaceLock::acquire(layout, &space)?;
    sweep_incomplete(layout, &space)?;

    let id = space::new_snapshot_id();
    let snap_dir = layout.snapshot_dir(&space, &id);
    fs::create_dir_all(&snap_dir)?;

    let result = build_snapshot(
        layout, settings, opts, cancel, &space, &id, &source_root, &plan, params, level,
    );

    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            // Roll the staging snapshot back; orphan chunks wait for GC.
            let _ = fs::remove_dir_all(&snap_dir);
            let _ = fs::remove_file(layout.manifest_file(&id));
            Err(e)
        }
    }
    .map(|mut outcome| {
        outcome.duration_ms = start.elapsed().as_millis() as u64;
        outcome
    })
}

#[allow(clippy::too_many_arguments)]
fn build_snapshot(
    layout: &RepoLayout,
    settings: &Settings,
    opts: &SaveOptions,
    cancel: &CancelToken,
    space: &str,
    id: &str,
    source_root: &std::path::Path,
    plan: &Plan,
    params: ChunkerParams,
    level: i32,
) -> Result<SaveOutcome> {
    let store = ChunkStore::open(layout.store_dir(), level)?;
    let cache = FileMetaCache::load(layout.filemeta_db(space));

    let pipeline = Pipeline {
        plan,
        builds: plan.files.iter().map(|_| FileBuild::default()).collect(),
        cache: Mutex::new(cache),
        store: &store,
        cancel,
        abort: AtomicBool::new(false),
        failure: Mutex::new(None),
        reused_files: AtomicU64::new(0),
        bytes_chunked: AtomicU64::new(0),
        chunks_written: AtomicU64::new(0),
        hash_mode: opts.hash_mode,
        params,
        now_ticks: Utc::now().timestamp_millis(),
        progress: file_progress(plan.files.len() as u64, opts.verbose),
    };

    let workers = settings.effective_workers();
    let depth = std::cmp::max(256, num_cpus::get() * 16);
    let next = AtomicUsize::new(0);

    {
        let (tx, rx) = crossbeam_channel::bounded::<ChunkJob>(depth);
        let pipeline = &pipeline;
        let next = &next;
        std::thread::scope(|s| {
            for _ in 0..workers {
                let tx = tx.clone();
                s.spawn(move || pipeline.produce(next, &tx));
            }
            drop(tx);
            for _ in 0..workers {
                let rx = rx.clone();
                s.spawn(move || pipeline.consume(&rx));
            }
        });
    }
    pipeline.progress.finish_and_clear();

    if cancel.is_cancelled() {
        pipeline.cache.lock().unwrap().discard_staged();
        return Err(RinneError::Cancelled);
    }
    if let Some(err) = pipeline.failure.lock().unwrap().take() {
        pipeline.cache.lock().unwrap().discard_staged();
        return Err(err);
    }

    // Every non-empty file must have a fully back-filled chunk list.
    let mut records = Vec::with_capacity(plan.files.len());
    let mut digests = BTreeMap::new();
    for (pf, build) in plan.files.iter().zip(&pipeline.builds) {
        let expected = *build
            .expected
            .get()
            .ok_or_else(|| SaveError::EmptyChunkSlot {
                path: pf.rel.clone(),
            })?;
        let chunks = build.chunks.lock().unwrap();
        if chunks.len() != expected
            || chunks.iter().any(|c| c.is_none())
            || (pf.size > 0 && expected == 0)
        {
            return Err(SaveError::EmptyChunkSlot {
                path: pf.rel.clone(),
            }
            .into());
        }
        records.push(FileRecord {
            path: pf.rel.clone(),
            bytes: pf.size,
            chunk_hashes: chunks.iter().map(|c| c.clone().unwrap()).collect(),
        });
        if opts.hash_mode == HashMode::Full {
            if let Some(digest) = build.digest.get() {
                digests.insert(pf.rel.clone(), *digest);
            }
        }
    }

    // A cache-commit failure must not sink the snapshot: the worst case is
    // re-chunking those files on the next save.
    if let Err(e) = pipeline.cache.lock().unwrap().commit() {
        eprintln!(
            "{} file-meta cache commit failed: {e}",
            colored::Colorize::yellow("warning:")
        );
    }

    let snapshot_hash = match opts.hash_mode {
        HashMode::Full => snapshot_hash::fold_sorted(&digests),
        HashMode::None => SKIP_HASH.to_string(),
    };
    let total_bytes = plan.total_bytes();
    let file_count = plan.files.len() as u64;

    let manifest = Manifest {
        version: MANIFEST_VERSION.to_string(),
        root: source_root.display().to_string(),
        original_sha256: snapshot_hash.clone(),
        total_bytes,
        avg_chunk: params.avg,
        min_chunk: params.min,
        max_chunk: params.max,
        compression_level: level,
        file_count,
        files: records,
        dirs: plan.dirs.clone(),
    };
    manifest.save_atomic(&layout.manifest_file(id))?;

    let snapshot_meta = SnapshotMeta {
        version: META_VERSION,
        hash_algorithm: opts.hash_mode.algorithm().to_string(),
        snapshot_hash: snapshot_hash.clone(),
        file_count,
        total_bytes,
    };
    snapshot_meta.save(&layout.meta_file(space, id))?;

    let note_opts = settings.note_options();
    match &opts.message {
        Some(text) => meta::write_note(&layout.note_file(space, id), text, note_opts)?,
        None => meta::ensure_note(&layout.note_file(space, id), note_opts)?,
    }

    Ok(SaveOutcome {
        id: id.to_string(),
        space: space.to_string(),
        file_count,
        total_bytes,
        reused_files: pipeline.reused_files.load(Ordering::Relaxed),
        bytes_chunked: pipeline.bytes_chunked.load(Ordering::Relaxed),
        chunks_written: pipeline.chunks_written.load(Ordering::Relaxed),
        snapshot_hash,
        duration_ms: 0,
    })
}

/// Deletes leftover snapshot directories that never reached `Complete`.
///
/// Runs under the space lock, so any staging directory seen here belongs to
/// a dead invocation.
fn sweep_incomplete(layout: &RepoLayout, space: &str) -> Result<()> {
    for id in space::list_snapshot_ids(layout, space)? {
        let dir = layout.snapshot_dir(space, &id);
        if meta::snapshot_state(&dir) == SnapshotState::Staging {
            fs::remove_dir_all(&dir)?;
            let _ = fs::remove_file(layout.manifest_file(&id));
        }
    }
    Ok(())
}

// ─── Pipeline ───────────────────────────────────────────────────────────────

/// One chunk travelling from a producer to a consumer.
struct ChunkJob {
    file_idx: usize,
    chunk_idx: usize,
    data: Vec<u8>,
}

/// Per-file result slots, back-filled as the pipeline runs.
#[derive(Default)]
struct FileBuild {
    /// Chunk hashes by index; grows as consumers report in.
    chunks: Mutex<Vec<Option<String>>>,
    /// Chunk count, known once the producer finishes the file.
    expected: OnceLock<usize>,
    /// Per-file snapshot digest (Full hash mode only).
    digest: OnceLock<[u8; 32]>,
}

struct Pipeline<'a> {
    plan: &'a Plan,
    builds: Vec<FileBuild>,
    cache: Mutex<FileMetaCache>,
    store: &'a ChunkStore,
    cancel: &'a CancelToken,
    abort: AtomicBool,
    failure: Mutex<Option<RinneError>>,
    reused_files: AtomicU64,
    bytes_chunked: AtomicU64,
    chunks_written: AtomicU64,
    hash_mode: HashMode,
    params: ChunkerParams,
    now_ticks: i64,
    progress: ProgressBar,
}

impl Pipeline<'_> {
    fn stopped(&self) -> bool {
        self.abort.load(Ordering::Relaxed) || self.cancel.is_cancelled()
    }

    /// Records the first failure and stops the pipeline.
    fn fail(&self, err: RinneError) {
        self.abort.store(true, Ordering::Relaxed);
        self.failure.lock().unwrap().get_or_insert(err);
    }

    /// Producer loop: claim files by index until the plan is exhausted.
    fn produce(&self, next: &AtomicUsize, tx: &Sender<ChunkJob>) {
        loop {
            if self.stopped() {
                return;
            }
            let i = next.fetch_add(1, Ordering::Relaxed);
            let Some(file) = self.plan.files.get(i) else {
                return;
            };
            self.progress.set_message(file.rel.clone());
            if let Err(e) = self.produce_file(i, tx) {
                self.fail(e);
                return;
            }
            self.progress.inc(1);
        }
    }

    fn produce_file(&self, i: usize, tx: &Sender<ChunkJob>) -> Result<()> {
        let pf = &self.plan.files[i];
        let build = &self.builds[i];

        // Fast path: reuse the cached chunk list when the file is clean.
        let cached = {
            let cache = self.cache.lock().unwrap();
            cache
                .try_get(&pf.rel)
                .filter(|row| row.size == pf.size && row.mtime_ticks == pf.mtime_ticks)
                .cloned()
        };
        if let Some(row) = cached {
            let all_stored = row
                .chunk_hashes
                .iter()
                .all(|h| !h.is_empty() && self.store.exists(h));
            if all_stored {
                let digest = match self.hash_mode {
                    HashMode::Full => {
                        match snapshot_hash::digest_from_hex(&row.snapshot_file_hash) {
                            Some(d) => Some(d),
                            // Row predates the digest column: hash the bytes
                            // once, then back-fill the column.
                            None => Some(snapshot_hash::digest_file(&pf.rel, pf.size, &pf.abs)?),
                        }
                    }
                    HashMode::None => None,
                };

                *build.chunks.lock().unwrap() =
                    row.chunk_hashes.iter().map(|h| Some(h.clone())).collect();
                let _ = build.expected.set(row.chunk_hashes.len());
                if let Some(d) = digest {
                    let _ = build.digest.set(d);
                }
                self.reused_files.fetch_add(1, Ordering::Relaxed);

                let mut cache = self.cache.lock().unwrap();
                if row.snapshot_file_hash.is_empty() && digest.is_some() {
                    cache.stage_update(
                        &pf.rel,
                        pf.size,
                        pf.mtime_ticks,
                        row.file_hash.clone(),
                        row.chunk_hashes.len(),
                        self.now_ticks,
                        hex::encode_upper(digest.unwrap()),
                    );
                    for (idx, hash) in row.chunk_hashes.iter().enumerate() {
                        cache.set_staged_chunk(&pf.rel, idx, hash);
                    }
                } else {
                    cache.touch(&pf.rel, self.now_ticks);
                }
                return Ok(());
            }
            // Stale row (a chunk vanished): fall through and re-chunk.
        }

        let file = fs::File::open(&pf.abs)?;
        let reader = std::io::BufReader::with_capacity(256 * 1024, file);
        let mut content_hash = Sha256::new();
        let mut digest = match self.hash_mode {
            HashMode::Full => Some(FileDigest::new(&pf.rel, pf.size)),
            HashMode::None => None,
        };

        let mut count = 0usize;
        for chunk in ChunkStream::new(reader, self.params) {
            self.cancel.check()?;
            if self.stopped() {
                return Ok(());
            }
            let chunk = chunk?;
            content_hash.update(&chunk.data);
            if let Some(d) = digest.as_mut() {
                d.update(&chunk.data);
            }
            self.bytes_chunked
                .fetch_add(chunk.data.len() as u64, Ordering::Relaxed);
            count = chunk.index + 1;
            tx.send(ChunkJob {
                file_idx: i,
                chunk_idx: chunk.index,
                data: chunk.data,
            })
            .map_err(|_| anyhow::anyhow!("chunk channel closed before producers finished"))?;
        }

        let _ = build.expected.set(count);
        let file_hash = hex::encode_upper(content_hash.finalize());
        let digest = digest.map(FileDigest::finalize);
        if let Some(d) = digest {
            let _ = build.digest.set(d);
        }

        self.cache.lock().unwrap().stage_update(
            &pf.rel,
            pf.size,
            pf.mtime_ticks,
            file_hash,
            count,
            self.now_ticks,
            digest.map(hex::encode_upper).unwrap_or_default(),
        );
        Ok(())
    }

    /// Consumer loop: insert chunks and back-fill hash slots until the
    /// channel disconnects. After an abort the channel is drained without
    /// further store writes so blocked producers can exit.
    fn consume(&self, rx: &Receiver<ChunkJob>) {
        while let Ok(job) = rx.recv() {
            if self.stopped() {
                continue;
            }
            match self.store.put_if_absent(&job.data) {
                Ok(out) => {
                    if out.written {
                        self.chunks_written.fetch_add(1, Ordering::Relaxed);
                    }
                    {
                        let mut chunks = self.builds[job.file_idx].chunks.lock().unwrap();
                        if chunks.len() <= job.chunk_idx {
                            chunks.resize(job.chunk_idx + 1, None);
                        }
                        chunks[job.chunk_idx] = Some(out.hash.clone());
                    }
                    let rel = &self.plan.files[job.file_idx].rel;
                    self.cache
                        .lock()
                        .unwrap()
                        .set_staged_chunk(rel, job.chunk_idx, &out.hash);
                }
                Err(e) => self.fail(e.into()),
            }
        }
    }
}

fn file_progress(total: u64, verbose: bool) -> ProgressBar {
    if verbose || total == 0 {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner:.green} Saving [{bar:30.cyan/dim}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─"),
    );
    pb
}

// ─── Recompose ──────────────────────────────────────────────────────────────

/// Options for synthesising a snapshot from existing manifests.
pub struct RecomposeOptions {
    pub space: Option<String>,
    /// Source snapshots as `[space:]<id|@N>`, highest precedence first.
    pub sources: Vec<String>,
    pub message: Option<String>,
    pub hash_mode: HashMode,
}

/// Builds a new snapshot by merging source manifests; for a path present in
/// several sources, the left-most source wins. Chunks are shared, not
/// copied; file digests are recomputed by streaming chunk plaintext out of
/// the store.
pub fn recompose(
    layout: &RepoLayout,
    settings: &Settings,
    opts: &RecomposeOptions,
    cancel: &CancelToken,
) -> Result<SaveOutcome> {
    let start = Instant::now();
    let space = space::resolve_space(layout, opts.space.as_deref())?;
    if opts.sources.is_empty() {
        return Err(crate::error::InputError::Invalid(
            "recompose needs at least one --src".to_string(),
        )
        .into());
    }

    let mut merged: BTreeMap<String, FileRecord> = BTreeMap::new();
    let mut dirs: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    for source in &opts.sources {
        let (src_space, reference) = parse_source_spec(layout, &space, source)?;
        let src_id = space::resolve_snapshot(layout, &src_space, &reference)?;
        let manifest = Manifest::load(&layout.manifest_file(&src_id))?;
        for record in manifest.files {
            merged.entry(record.path.clone()).or_insert(record);
        }
        dirs.extend(manifest.dirs);
    }

    let _lock = SpaceLock::acquire(layout, &space)?;
    let id = space::new_snapshot_id();
    let snap_dir = layout.snapshot_dir(&space, &id);
    fs::create_dir_all(&snap_dir)?;

    let result = (|| -> Result<SaveOutcome> {
        let store = ChunkStore::open(layout.store_dir(), settings.compression_level)?;
        let params = settings.chunker_params();

        let mut digests = BTreeMap::new();
        let mut total_bytes = 0u64;
        for record in merged.values() {
            cancel.check()?;
            total_bytes += record.bytes;
            if opts.hash_mode == HashMode::Full {
                let mut digest = FileDigest::new(&record.path, record.bytes);
                for hash in &record.chunk_hashes {
                    digest.update(&store.read_plain(hash)?);
                }
                digests.insert(record.path.clone(), digest.finalize());
            }
        }

        let snapshot_hash = match opts.hash_mode {
            HashMode::Full => snapshot_hash::fold_sorted(&digests),
            HashMode::None => SKIP_HASH.to_string(),
        };
        let file_count = merged.len() as u64;

        let manifest = Manifest {
            version: MANIFEST_VERSION.to_string(),
            root: format!("recompose:{}", opts.sources.join(",")),
            original_sha256: snapshot_hash.clone(),
            total_bytes,
            avg_chunk: params.avg,
            min_chunk: params.min,
            max_chunk: params.max,
            compression_level: settings.compression_level,
            file_count,
            files: merged.values().cloned().collect(),
            dirs: dirs.into_iter().collect(),
        };
        manifest.save_atomic(&layout.manifest_file(&id))?;

        SnapshotMeta {
            version: META_VERSION,
            hash_algorithm: opts.hash_mode.algorithm().to_string(),
            snapshot_hash: snapshot_hash.clone(),
            file_count,
            total_bytes,
        }
        .save(&layout.meta_file(&space, &id))?;

        let note_opts = settings.note_options();
        match &opts.message {
            Some(text) => meta::write_note(&layout.note_file(&space, &id), text, note_opts)?,
            None => meta::ensure_note(&layout.note_file(&space, &id), note_opts)?,
        }

        Ok(SaveOutcome {
            id: id.clone(),
            space: space.clone(),
            file_count,
            total_bytes,
            reused_files: file_count,
            bytes_chunked: 0,
            chunks_written: 0,
            snapshot_hash,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    })();

    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            let _ = fs::remove_dir_all(&snap_dir);
            let _ = fs::remove_file(layout.manifest_file(&id));
            Err(e)
        }
    }
}

/// Splits `[space:]<id|@N>` into a space and a snapshot reference.
fn parse_source_spec(
    layout: &RepoLayout,
    default_space: &str,
    spec: &str,
) -> Result<(String, space::SnapshotRef)> {
    let (space_part, ref_part) = match spec.split_once(':') {
        Some((s, r)) => (s.to_string(), r),
        None => (default_space.to_string(), spec),
    };
    space::validate_name(&space_part)?;
    if !space::space_exists(layout, &space_part) {
        return Err(crate::error::SpaceError::Unknown(space_part).into());
    }
    let reference = space::SnapshotRef::parse(ref_part)?;
    Ok((space_part, reference))
}

// ─── Reporting helpers ──────────────────────────────────────────────────────

/// Prints a summary of the completed snapshot.
pub fn print_save_summary(outcome: &SaveOutcome) {
    eprintln!();
    eprintln!(
        "  {} Snapshot: {}",
        colored::Colorize::green("✓"),
        colored::Colorize::bold(outcome.id.as_str()),
    );
    eprintln!(
        "    Space:   {} ({} files, {})",
        outcome.space,
        outcome.file_count,
        format_size(outcome.total_bytes),
    );
    eprintln!(
        "    Work:    {} reused, {} chunked, {} new chunks",
        outcome.reused_files,
        format_size(outcome.bytes_chunked),
        outcome.chunks_written,
    );
    if outcome.snapshot_hash != SKIP_HASH {
        eprintln!(
            "    Hash:    {}…",
            crate::hasher::short_hash(&outcome.snapshot_hash, 16)
        );
    }
    eprintln!(
        "    Duration: {:.2}s",
        outcome.duration_ms as f64 / 1000.0
    );
}

/// Formats a byte count as a human-readable size string.
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} PiB")
}
