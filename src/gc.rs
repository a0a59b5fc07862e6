//! # Garbage Collection
//!
//! Two phases, analyse-then-sweep. Analyse reads every manifest under
//! `store/manifests/` and builds a reference count per chunk hash
//! (normalised to uppercase). Sweep walks the store and deletes every chunk
//! whose refcount is zero or absent. The GC runs with every space locked,
//! so no save can be mid-flight; an aborted sweep leaves the store correct,
//! only less collected.

use std::collections::HashMap;

use crate::cancel::CancelToken;
use crate::cas::ChunkStore;
use crate::error::{Result, RestoreError, RinneError};
use crate::hasher;
use crate::layout::RepoLayout;
use crate::manifest::{self, Manifest};
use crate::space::SpaceLock;

/// Outcome of one GC run.
#[derive(Debug, Default)]
pub struct GcStats {
    /// Manifests analysed.
    pub manifests: usize,
    /// Distinct chunk hashes referenced by at least one manifest.
    pub referenced: usize,
    /// Chunks kept in the store.
    pub kept: usize,
    /// Chunks deleted (or, in dry-run, that would be deleted).
    pub swept: usize,
    /// Compressed bytes freed (0 in dry-run).
    pub freed_bytes: u64,
    pub dry_run: bool,
}

/// Builds the chunk reference-count map from every `cas:` manifest.
///
/// Foreign-version manifests are skipped with a warning; an *unreadable*
/// manifest aborts the GC, since its chunk references cannot be counted and
/// the sweep would delete everything it holds.
pub fn analyze(layout: &RepoLayout) -> Result<(HashMap<String, u64>, usize)> {
    let mut refcounts: HashMap<String, u64> = HashMap::new();
    let mut analysed = 0usize;

    for (id, path) in manifest::list_manifests(&layout.manifests_dir())? {
        let manifest = match Manifest::load(&path) {
            Ok(m) => m,
            Err(RinneError::Restore(RestoreError::BadManifestVersion(version))) => {
                eprintln!(
                    "{} skipping foreign manifest {id} (version '{version}')",
                    colored::Colorize::yellow("warning:")
                );
                continue;
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "manifest {id} is unreadable, refusing to sweep: {e}"
                )
                .into())
            }
        };
        analysed += 1;
        for record in &manifest.files {
            for hash in &record.chunk_hashes {
                *refcounts.entry(hasher::canonical(hash)).or_insert(0) += 1;
            }
        }
    }

    Ok((refcounts, analysed))
}

/// Runs a full GC across the repository.
pub fn run_gc(layout: &RepoLayout, dry_run: bool, cancel: &CancelToken) -> Result<GcStats> {
    let _locks = SpaceLock::acquire_all(layout)?;
    run_gc_locked(layout, dry_run, cancel)
}

/// GC body for callers that already hold the relevant locks (tidy).
pub fn run_gc_locked(layout: &RepoLayout, dry_run: bool, cancel: &CancelToken) -> Result<GcStats> {
    let (refcounts, manifests) = analyze(layout)?;
    cancel.check()?;

    let store = ChunkStore::open(layout.store_dir(), crate::compress::DEFAULT_LEVEL)?;
    let mut stats = GcStats {
        manifests,
        referenced: refcounts.len(),
        dry_run,
        ..GcStats::default()
    };

    for (hash, path) in store.list_chunks()? {
        cancel.check()?;
        if refcounts.get(&hash).copied().unwrap_or(0) > 0 {
            stats.kept += 1;
            continue;
        }
        stats.swept += 1;
        if !dry_run {
            match std::fs::metadata(&path) {
                Ok(meta) => {
                    std::fs::remove_file(&path)?;
                    stats.freed_bytes += meta.len();
                }
                // Already gone: a parallel cleanup beat us to it.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(stats)
}
