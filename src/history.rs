//! # History
//!
//! Read-only listing of a space's snapshots: id, completeness, physical or
//! logical form, meta counts, and the first line of the note.

use crate::error::Result;
use crate::layout::RepoLayout;
use crate::meta::{self, SnapshotMeta, SnapshotState};
use crate::save::format_size;
use crate::space;

/// One row of `rinne history`.
#[derive(Debug)]
pub struct HistoryEntry {
    pub id: String,
    pub state: SnapshotState,
    pub meta: Option<SnapshotMeta>,
    /// First line of `note.md`, empty if none.
    pub note_head: String,
    pub has_payload: bool,
    pub has_manifest: bool,
}

/// Collects history entries, newest first.
pub fn history(layout: &RepoLayout, space: &str) -> Result<Vec<HistoryEntry>> {
    let mut entries = Vec::new();
    for id in space::list_snapshot_ids(layout, space)?.into_iter().rev() {
        let dir = layout.snapshot_dir(space, &id);
        let state = meta::snapshot_state(&dir);
        let snapshot_meta = SnapshotMeta::load(&layout.meta_file(space, &id)).ok();
        let note_head = meta::read_note(&layout.note_file(space, &id))
            .map(|text| text.lines().next().unwrap_or("").to_string())
            .unwrap_or_default();
        entries.push(HistoryEntry {
            has_payload: layout.payload_dir(space, &id).is_dir(),
            has_manifest: layout.manifest_file(&id).is_file(),
            id,
            state,
            meta: snapshot_meta,
            note_head,
        });
    }
    Ok(entries)
}

/// Prints the history table to stderr.
pub fn print_history(space: &str, entries: &[HistoryEntry]) {
    if entries.is_empty() {
        eprintln!("No snapshots in space '{space}'.");
        return;
    }

    eprintln!(
        "{:>4}  {:42}  {:5}  {:>8}  {:>10}  {}",
        "#", "Snapshot ID", "Form", "Files", "Size", "Note"
    );
    eprintln!("{}", "─".repeat(96));

    for (i, entry) in entries.iter().enumerate() {
        let form = match (entry.has_payload, entry.has_manifest) {
            (true, true) => "both",
            (true, false) => "phys",
            (false, true) => "logic",
            (false, false) => "none",
        };
        let (files, size) = entry
            .meta
            .as_ref()
            .map(|m| (m.file_count.to_string(), format_size(m.total_bytes)))
            .unwrap_or_else(|| ("?".into(), "?".into()));
        let marker = if entry.state == SnapshotState::Complete {
            " "
        } else {
            "!"
        };
        eprintln!(
            "{:>4}{marker} {:42}  {:5}  {:>8}  {:>10}  {}",
            i + 1,
            entry.id,
            form,
            files,
            size,
            entry.note_head,
        );
    }

    eprintln!();
    eprintln!("  {} snapshot(s)", entries.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::config;
    use crate::save::{save_snapshot, SaveOptions};
    use std::fs;

    #[test]
    fn history_lists_newest_first_with_note() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RepoLayout::new(dir.path());
        space::init_repo(&layout).unwrap();
        let mut settings = config::load(&layout).unwrap();
        settings.chunk_min = 256;
        settings.chunk_avg = 1024;
        settings.chunk_max = 4096;

        fs::write(layout.root().join("f"), b"1").unwrap();
        let first = save_snapshot(
            &layout,
            &settings,
            &SaveOptions {
                message: Some("first line\nsecond line".into()),
                ..SaveOptions::default()
            },
            &CancelToken::new(),
        )
        .unwrap();
        fs::write(layout.root().join("f"), b"22").unwrap();
        let second =
            save_snapshot(&layout, &settings, &SaveOptions::default(), &CancelToken::new())
                .unwrap();

        let entries = history(&layout, space::DEFAULT_SPACE).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, second.id);
        assert_eq!(entries[1].id, first.id);
        assert_eq!(entries[1].note_head, "first line");
        assert!(entries[0].has_manifest);
        assert!(!entries[0].has_payload);
        assert_eq!(entries[0].state, SnapshotState::Complete);
        assert_eq!(entries[0].meta.as_ref().unwrap().file_count, 1);
    }
}
