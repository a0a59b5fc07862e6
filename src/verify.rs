//! # Verify
//!
//! Cross-checks a snapshot's stored `meta.json` against reality. With a
//! payload present, the tree is re-hashed and compared against the recorded
//! snapshot hash and counts. For logical snapshots (manifest only) the
//! behaviour is selectable: report, skip, hydrate in place, or hydrate into
//! scratch space and discard. Each target yields one structured result row;
//! the command exits non-zero if any row is not OK.

use crate::cancel::CancelToken;
use crate::cas::ChunkStore;
use crate::compress;
use crate::config::Settings;
use crate::error::Result;
use crate::layout::RepoLayout;
use crate::meta::SnapshotMeta;
use crate::restore;
use crate::snapshot_hash::{self, ALGORITHM_SKIP};
use crate::space::{self, SnapshotRef};

/// What to do with a snapshot whose payload is absent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissingPayloadMode {
    /// Report the missing payload as a failure.
    Error,
    /// Acknowledge and move on.
    Skip,
    /// Restore the payload beside the snapshot, then verify it.
    Hydrate,
    /// Restore into scratch space, verify, discard.
    TempHydrate,
}

impl MissingPayloadMode {
    pub fn parse(s: &str) -> Option<MissingPayloadMode> {
        match s {
            "error" => Some(MissingPayloadMode::Error),
            "skip" => Some(MissingPayloadMode::Skip),
            "hydrate" => Some(MissingPayloadMode::Hydrate),
            "temp-hydrate" => Some(MissingPayloadMode::TempHydrate),
            _ => None,
        }
    }
}

/// Verdict for one snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyStatus {
    /// Hash and counts match.
    Ok,
    /// Snapshot was saved with hashing skipped; nothing to compare.
    SkippedHash,
    /// Payload absent and the caller chose to skip.
    SkippedPayload,
    /// Payload absent and the caller chose to treat that as failure.
    MissingPayload,
    /// Neither payload nor manifest exists, or meta is unreadable.
    Broken,
    /// Hash or count mismatch.
    Mismatch,
}

impl VerifyStatus {
    /// Whether this row counts as success for the aggregate exit code.
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            VerifyStatus::Ok | VerifyStatus::SkippedHash | VerifyStatus::SkippedPayload
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            VerifyStatus::Ok => "ok",
            VerifyStatus::SkippedHash => "ok (hash skipped)",
            VerifyStatus::SkippedPayload => "skipped (no payload)",
            VerifyStatus::MissingPayload => "missing payload",
            VerifyStatus::Broken => "broken",
            VerifyStatus::Mismatch => "mismatch",
        }
    }
}

/// One structured result row.
#[derive(Debug)]
pub struct VerifyRow {
    pub id: String,
    pub status: VerifyStatus,
    pub detail: String,
}

/// Aggregated verification outcome.
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub rows: Vec<VerifyRow>,
}

impl VerifyReport {
    pub fn all_ok(&self) -> bool {
        self.rows.iter().all(|r| r.status.is_ok())
    }

    pub fn ok_count(&self) -> usize {
        self.rows.iter().filter(|r| r.status.is_ok()).count()
    }
}

/// Verifies the given snapshot references (or every complete snapshot of the
/// space when `targets` is empty).
pub fn verify_space(
    layout: &RepoLayout,
    settings: &Settings,
    space: Option<&str>,
    targets: &[String],
    mode: MissingPayloadMode,
    cancel: &CancelToken,
) -> Result<VerifyReport> {
    let space = space::resolve_space(layout, space)?;

    let ids: Vec<String> = if targets.is_empty() {
        space::list_complete_snapshot_ids(layout, &space)?
    } else {
        let mut ids = Vec::with_capacity(targets.len());
        for target in targets {
            let reference = SnapshotRef::parse(target)?;
            ids.push(space::resolve_snapshot(layout, &space, &reference)?);
        }
        ids
    };

    let mut report = VerifyReport::default();
    for id in ids {
        cancel.check()?;
        let row = verify_one(layout, settings, &space, &id, mode, cancel)?;
        report.rows.push(row);
    }
    Ok(report)
}

fn verify_one(
    layout: &RepoLayout,
    settings: &Settings,
    space: &str,
    id: &str,
    mode: MissingPayloadMode,
    cancel: &CancelToken,
) -> Result<VerifyRow> {
    let meta = match SnapshotMeta::load(&layout.meta_file(space, id)) {
        Ok(meta) => meta,
        Err(e) => {
            return Ok(VerifyRow {
                id: id.to_string(),
                status: VerifyStatus::Broken,
                detail: format!("unreadable meta: {e}"),
            })
        }
    };

    if meta.hash_algorithm == ALGORITHM_SKIP {
        return Ok(VerifyRow {
            id: id.to_string(),
            status: VerifyStatus::SkippedHash,
            detail: String::new(),
        });
    }

    let payload = layout.payload_dir(space, id);
    if payload.is_dir() {
        return Ok(compare_tree(id, &meta, &payload)?);
    }

    let has_manifest = layout.manifest_file(id).is_file();
    if !has_manifest {
        return Ok(VerifyRow {
            id: id.to_string(),
            status: VerifyStatus::Broken,
            detail: "no payload and no manifest".to_string(),
        });
    }

    match mode {
        MissingPayloadMode::Error => Ok(VerifyRow {
            id: id.to_string(),
            status: VerifyStatus::MissingPayload,
            detail: "payload absent (logical snapshot)".to_string(),
        }),
        MissingPayloadMode::Skip => Ok(VerifyRow {
            id: id.to_string(),
            status: VerifyStatus::SkippedPayload,
            detail: String::new(),
        }),
        MissingPayloadMode::Hydrate => {
            let store = ChunkStore::open(layout.store_dir(), compress::DEFAULT_LEVEL)?;
            let dest = restore::hydrate(
                layout,
                &store,
                space,
                id,
                false,
                settings.effective_workers(),
                cancel,
            )?;
            compare_tree(id, &meta, &dest)
        }
        MissingPayloadMode::TempHydrate => {
            let store = ChunkStore::open(layout.store_dir(), compress::DEFAULT_LEVEL)?;
            let dest = restore::hydrate(
                layout,
                &store,
                space,
                id,
                true,
                settings.effective_workers(),
                cancel,
            )?;
            let row = compare_tree(id, &meta, &dest);
            let _ = std::fs::remove_dir_all(&dest);
            row
        }
    }
}

fn compare_tree(id: &str, meta: &SnapshotMeta, root: &std::path::Path) -> Result<VerifyRow> {
    let tree = snapshot_hash::hash_payload_tree(root)?;
    let status = if tree.hash == meta.snapshot_hash
        && tree.file_count == meta.file_count
        && tree.total_bytes == meta.total_bytes
    {
        VerifyStatus::Ok
    } else {
        VerifyStatus::Mismatch
    };
    let detail = if status == VerifyStatus::Ok {
        String::new()
    } else {
        format!(
            "expected {} files / {} bytes / {}…, found {} files / {} bytes / {}…",
            meta.file_count,
            meta.total_bytes,
            crate::hasher::short_hash(&meta.snapshot_hash, 12),
            tree.file_count,
            tree.total_bytes,
            crate::hasher::short_hash(&tree.hash, 12),
        )
    };
    Ok(VerifyRow {
        id: id.to_string(),
        status,
        detail,
    })
}
