//! # Tidy
//!
//! Deletes snapshots of a space by selector, then optionally garbage-collects
//! the chunk store. Exactly one selector must be supplied; deleting a
//! snapshot removes both its directory and its store manifest.

use chrono::NaiveDate;

use crate::cancel::CancelToken;
use crate::error::{InputError, Result};
use crate::gc::{self, GcStats};
use crate::layout::RepoLayout;
use crate::space::{self, SpaceLock};

/// Which snapshots a tidy run deletes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TidySelector {
    /// Keep the N most recent snapshots, delete the rest.
    KeepLatest(usize),
    /// Delete the N most recent snapshots.
    Latest(usize),
    /// Delete snapshots created strictly before the given date (UTC).
    Before(NaiveDate),
    /// Delete snapshots whose id matches a glob (`*`, `?`).
    Match(String),
}

impl TidySelector {
    /// Parses the `--before` date argument.
    pub fn before(date: &str) -> Result<TidySelector> {
        let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| InputError::BadDate(date.to_string()))?;
        Ok(TidySelector::Before(parsed))
    }

    /// Applies the selector to an ascending id list, returning ids to delete.
    fn select(&self, ids: &[String]) -> Vec<String> {
        match self {
            TidySelector::KeepLatest(keep) => {
                let cut = ids.len().saturating_sub(*keep);
                ids[..cut].to_vec()
            }
            TidySelector::Latest(n) => {
                let start = ids.len().saturating_sub(*n);
                ids[start..].to_vec()
            }
            TidySelector::Before(date) => {
                // Ids start with YYYYMMDD'T'…; lexicographic comparison
                // against the cutoff prefix is creation-order comparison.
                let cutoff = format!("{}T000000Z", date.format("%Y%m%d"));
                ids.iter().filter(|id| id.as_str() < cutoff.as_str()).cloned().collect()
            }
            TidySelector::Match(glob) => ids
                .iter()
                .filter(|id| glob_match(glob, id))
                .cloned()
                .collect(),
        }
    }
}

/// Outcome of a tidy run.
#[derive(Debug, Default)]
pub struct TidyStats {
    pub deleted: Vec<String>,
    pub gc: Option<GcStats>,
}

/// Deletes matching snapshots; with `follow_gc`, sweeps the store afterwards.
pub fn tidy(
    layout: &RepoLayout,
    space: Option<&str>,
    selector: &TidySelector,
    follow_gc: bool,
    dry_run: bool,
    cancel: &CancelToken,
) -> Result<TidyStats> {
    let space = space::resolve_space(layout, space)?;
    let _lock = SpaceLock::acquire(layout, &space)?;

    let ids = space::list_complete_snapshot_ids(layout, &space)?;
    let doomed = selector.select(&ids);

    let mut stats = TidyStats::default();
    for id in &doomed {
        cancel.check()?;
        if !dry_run {
            std::fs::remove_dir_all(layout.snapshot_dir(&space, id))?;
            let manifest = layout.manifest_file(id);
            if manifest.is_file() {
                std::fs::remove_file(manifest)?;
            }
        }
        stats.deleted.push(id.clone());
    }

    if follow_gc && !dry_run {
        // Tidy already holds this space's lock; take the others for the GC.
        let _other_locks: Vec<SpaceLock> = space::list_spaces(layout)?
            .into_iter()
            .filter(|s| *s != space)
            .map(|s| SpaceLock::acquire(layout, &s))
            .collect::<Result<_>>()?;
        stats.gc = Some(gc::run_gc_locked(layout, false, cancel)?);
    }

    Ok(stats)
}

/// Glob match with `*` and `?` over a whole snapshot id.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();
    fn go(pat: &[char], txt: &[char]) -> bool {
        match pat.first() {
            None => txt.is_empty(),
            Some('*') => go(&pat[1..], txt) || (!txt.is_empty() && go(pat, &txt[1..])),
            Some('?') => !txt.is_empty() && go(&pat[1..], &txt[1..]),
            Some(c) => txt.first() == Some(c) && go(&pat[1..], &txt[1..]),
        }
    }
    go(&pat, &txt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn workspace_with_snapshots(ids: &[&str]) -> (tempfile::TempDir, RepoLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = RepoLayout::new(dir.path());
        space::init_repo(&layout).unwrap();
        for id in ids {
            let snap = layout.snapshot_dir(space::DEFAULT_SPACE, id);
            fs::create_dir_all(&snap).unwrap();
            fs::write(snap.join("meta.json"), b"{}").unwrap();
            fs::write(snap.join("note.md"), b"").unwrap();
            fs::write(layout.manifest_file(id), b"{}").unwrap();
        }
        (dir, layout)
    }

    const IDS: &[&str] = &[
        "20240101T000000Z_a",
        "20240601T000000Z_b",
        "20250101T000000Z_c",
    ];

    #[test]
    fn keep_latest_deletes_oldest() {
        let (_dir, layout) = workspace_with_snapshots(IDS);
        let stats = tidy(
            &layout,
            None,
            &TidySelector::KeepLatest(1),
            false,
            false,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(stats.deleted, vec![IDS[0], IDS[1]]);
        assert!(layout.snapshot_dir(space::DEFAULT_SPACE, IDS[2]).exists());
        assert!(!layout.manifest_file(IDS[0]).exists());
    }

    #[test]
    fn latest_deletes_newest() {
        let (_dir, layout) = workspace_with_snapshots(IDS);
        let stats = tidy(
            &layout,
            None,
            &TidySelector::Latest(1),
            false,
            false,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(stats.deleted, vec![IDS[2]]);
    }

    #[test]
    fn before_date_cutoff() {
        let (_dir, layout) = workspace_with_snapshots(IDS);
        let selector = TidySelector::before("2024-06-01").unwrap();
        let stats = tidy(&layout, None, &selector, false, false, &CancelToken::new()).unwrap();
        assert_eq!(stats.deleted, vec![IDS[0]]);
    }

    #[test]
    fn glob_selector() {
        let (_dir, layout) = workspace_with_snapshots(IDS);
        let stats = tidy(
            &layout,
            None,
            &TidySelector::Match("2024*".into()),
            false,
            false,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(stats.deleted, vec![IDS[0], IDS[1]]);
    }

    #[test]
    fn dry_run_reports_without_deleting() {
        let (_dir, layout) = workspace_with_snapshots(IDS);
        let stats = tidy(
            &layout,
            None,
            &TidySelector::KeepLatest(0),
            false,
            true,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(stats.deleted.len(), 3);
        for id in IDS {
            assert!(layout.snapshot_dir(space::DEFAULT_SPACE, id).exists());
        }
    }

    #[test]
    fn bad_date_rejected() {
        assert!(TidySelector::before("June 1st").is_err());
    }
}
