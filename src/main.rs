//! # rinne
//!
//! A local, directory-oriented snapshot engine: working trees are captured
//! into namespaced *spaces* as compact snapshots — a manifest plus
//! content-defined, deduplicated, compressed chunks — and later restored,
//! picked apart, or verified against their recorded hash.
//!
//! ## Architecture
//!
//! ```text
//!                       ┌──────────────┐
//!                       │  CLI (clap)  │
//!                       └──────┬───────┘
//!                              │
//!          ┌─────────┬─────────┼──────────┬──────────┐
//!          ▼         ▼         ▼          ▼          ▼
//!     ┌────────┐ ┌─────────┐ ┌──────┐ ┌────────┐ ┌────────┐
//!     │  Save  │ │ Restore │ │ Tidy │ │ Verify │ │ Spaces │
//!     └───┬────┘ └────┬────┘ └──┬───┘ └───┬────┘ └────────┘
//!         │           │         │         │
//!    ┌────┴────┐      │         ▼         │
//!    ▼         ▼      │   ┌──────────┐    │
//! ┌───────┐ ┌───────┐ │   │ GC + Ref │    │
//! │Planner│ │Chunker│ │   └────┬─────┘    │
//! └───────┘ │(CDC)  │ │        │          │
//!           └───┬───┘ ▼        ▼          ▼
//!            ┌──┴──────────────────────────┐
//!            │  CAS (SHA-256 + zstd)       │
//!            │  Manifests · FileMetaCache  │
//!            └─────────────────────────────┘
//! ```

mod cancel;
mod cas;
mod chunker;
mod compress;
mod config;
mod error;
mod filemeta;
mod gc;
mod hasher;
mod history;
mod ignore;
mod layout;
mod logfile;
mod manifest;
mod meta;
mod planner;
mod restore;
mod save;
mod snapshot_hash;
mod space;
mod tidy;
mod verify;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::cancel::CancelToken;
use crate::cas::ChunkStore;
use crate::error::{InputError, Result};
use crate::layout::RepoLayout;
use crate::logfile::FileLog;
use crate::save::{format_size, CompactProfile, SaveOptions};
use crate::snapshot_hash::HashMode;
use crate::space::SnapshotRef;

/// rinne — space-scoped snapshots with chunked, deduplicated storage
#[derive(Parser, Debug)]
#[command(
    name = "rinne",
    version,
    about = "A local snapshot engine with content-defined chunking and deduplication",
    long_about = "rinne captures working trees into namespaced spaces as compact \
                  snapshots: one manifest per snapshot plus SHA-256-addressed, \
                  zstd-compressed chunks shared across all snapshots.\n\n\
                  Unchanged files are recognised through a per-space metadata \
                  cache, making repeated saves incremental."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize a repository in the current directory
    Init,

    /// Capture the working tree as a new snapshot
    Save {
        /// Target space (default: current space)
        space: Option<String>,

        /// Note text stored beside the snapshot
        #[arg(short, long)]
        message: Option<String>,

        /// Favour compression ratio (zstd level 9)
        #[arg(long, conflicts_with = "compact_speed")]
        compact_full: bool,

        /// Favour speed (zstd level 3)
        #[arg(long)]
        compact_speed: bool,

        /// Skip the canonical snapshot hash
        #[arg(long)]
        hash_none: bool,
    },

    /// Materialise a snapshot into a directory
    Restore {
        /// Source space (default: current space)
        space: Option<String>,

        /// Snapshot id or prefix (default: latest)
        #[arg(long, conflicts_with = "back")]
        id: Option<String>,

        /// Restore the N-th most recent snapshot (0 = latest)
        #[arg(long)]
        back: Option<usize>,

        /// Destination directory (default: the working tree)
        #[arg(long)]
        to: Option<PathBuf>,

        /// Materialise the payload beside the snapshot instead
        #[arg(long)]
        hydrate: bool,

        /// With --hydrate: restore into scratch space and print the path
        #[arg(long, requires = "hydrate")]
        ephemeral: bool,

        /// Clear the destination (except the control directory) first
        #[arg(long)]
        purge: bool,

        /// Skip hash verification after restore
        #[arg(long)]
        no_verify: bool,
    },

    /// Restore a single file or directory out of a snapshot
    Pick {
        /// Snapshot id, prefix, or @N
        snapshot: String,

        /// File path or directory prefix inside the snapshot
        selector: String,

        /// Output directory
        out: PathBuf,

        /// Source space (default: current space)
        #[arg(short, long)]
        space: Option<String>,
    },

    /// Restore selected paths, keeping their full relative paths
    Export {
        /// Paths or prefixes to export (empty = everything)
        selectors: Vec<String>,

        /// Destination directory
        #[arg(long)]
        to: PathBuf,

        /// Source space (default: current space)
        #[arg(short, long)]
        space: Option<String>,

        /// Snapshot id or prefix (default: latest)
        #[arg(long, conflicts_with = "back")]
        id: Option<String>,

        /// Export from the N-th most recent snapshot
        #[arg(long)]
        back: Option<usize>,
    },

    /// Snapshot an external directory into this repository
    Import {
        /// Directory to import
        dir: PathBuf,

        /// Target space (default: current space)
        #[arg(short, long)]
        space: Option<String>,

        /// Note text stored beside the snapshot
        #[arg(short, long)]
        message: Option<String>,

        /// List what would be captured without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Synthesise a snapshot from existing ones (left-most source wins)
    Recompose {
        /// Source snapshots as [space:]<id|@N>, highest precedence first
        #[arg(long = "src", required = true)]
        sources: Vec<String>,

        /// Target space (default: current space)
        #[arg(short, long)]
        space: Option<String>,

        /// Note text stored beside the snapshot
        #[arg(short, long)]
        message: Option<String>,

        /// Skip the canonical snapshot hash
        #[arg(long)]
        hash_none: bool,
    },

    /// Materialise a logical snapshot's payload from its manifest
    Hydrate {
        /// Snapshot id, prefix, or @N (default: latest)
        snapshot: Option<String>,

        /// Source space (default: current space)
        #[arg(short, long)]
        space: Option<String>,

        /// Hydrate into scratch space and print the path
        #[arg(long)]
        ephemeral: bool,
    },

    /// Drop a snapshot's materialised payload, keeping the manifest
    Compact {
        /// Snapshot id, prefix, or @N (default: latest)
        snapshot: Option<String>,

        /// Source space (default: current space)
        #[arg(short, long)]
        space: Option<String>,
    },

    /// Delete snapshots by selector, optionally followed by GC
    Tidy {
        /// Keep the N most recent snapshots, delete the rest
        #[arg(long, conflicts_with_all = ["latest", "before", "match_glob"])]
        keep_latest: Option<usize>,

        /// Delete the N most recent snapshots
        #[arg(long, conflicts_with_all = ["before", "match_glob"])]
        latest: Option<usize>,

        /// Delete snapshots created before this date (YYYY-MM-DD)
        #[arg(long, conflicts_with = "match_glob")]
        before: Option<String>,

        /// Delete snapshots whose id matches a glob
        #[arg(long = "match")]
        match_glob: Option<String>,

        /// Run garbage collection afterwards
        #[arg(long)]
        gc: bool,

        /// Target space (default: current space)
        #[arg(short, long)]
        space: Option<String>,

        /// Report without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete chunks no manifest references any more
    Gc {
        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Check snapshots against their recorded hashes
    Verify {
        /// Snapshot ids, prefixes, or @N (empty = all complete snapshots)
        targets: Vec<String>,

        /// Source space (default: current space)
        #[arg(short, long)]
        space: Option<String>,

        /// Payload-absent handling: error, skip, hydrate, temp-hydrate
        #[arg(long, default_value = "temp-hydrate")]
        missing_payload: String,
    },

    /// List a space's snapshots
    History {
        /// Space to list (default: current space)
        space: Option<String>,
    },

    /// Show or set a snapshot's note
    Note {
        /// Snapshot id, prefix, or @N
        snapshot: String,

        /// Source space (default: current space)
        #[arg(short, long)]
        space: Option<String>,

        /// New note text (omit to print the current note)
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Manage spaces
    Space {
        #[command(subcommand)]
        action: SpaceAction,
    },

    /// Expire file-metadata cache rows for long-departed paths
    CacheMetaGc {
        /// Target space (default: current space)
        #[arg(short, long)]
        space: Option<String>,

        /// Days a departed path's row is retained
        #[arg(long, default_value_t = filemeta::CACHE_TTL_DAYS)]
        ttl_days: i64,
    },
}

#[derive(Subcommand, Debug)]
enum SpaceAction {
    /// List all spaces
    List,
    /// Create a new space
    Create { name: String },
    /// Switch the current space
    Use { name: String },
    /// Rename a space
    Rename { old: String, new: String },
    /// Delete an empty, non-current space
    Delete { name: String },
}

fn main() {
    let cli = Cli::parse();
    let cancel = CancelToken::new();
    cancel.install_ctrlc();

    if let Err(e) = run(cli, &cancel) {
        eprintln!("{} {e}", colored::Colorize::red("error:"));
        std::process::exit(e.exit_code());
    }
}

fn run(cli: Cli, cancel: &CancelToken) -> Result<()> {
    match &cli.command {
        Command::Init => cmd_init(),
        Command::Save {
            space,
            message,
            compact_full,
            compact_speed,
            hash_none,
        } => cmd_save(
            &cli,
            cancel,
            space.clone(),
            message.clone(),
            *compact_full,
            *compact_speed,
            *hash_none,
        ),
        Command::Restore {
            space,
            id,
            back,
            to,
            hydrate,
            ephemeral,
            purge,
            no_verify,
        } => cmd_restore(
            &cli,
            cancel,
            space.as_deref(),
            snapshot_ref(id, back)?,
            to.clone(),
            *hydrate,
            *ephemeral,
            *purge,
            !*no_verify,
        ),
        Command::Pick {
            snapshot,
            selector,
            out,
            space,
        } => cmd_pick(cancel, space.as_deref(), snapshot, selector, out),
        Command::Export {
            selectors,
            to,
            space,
            id,
            back,
        } => cmd_export(cancel, space.as_deref(), snapshot_ref(id, back)?, selectors, to),
        Command::Import {
            dir,
            space,
            message,
            dry_run,
        } => cmd_import(&cli, cancel, dir, space.clone(), message.clone(), *dry_run),
        Command::Recompose {
            sources,
            space,
            message,
            hash_none,
        } => cmd_recompose(cancel, sources, space.clone(), message.clone(), *hash_none),
        Command::Hydrate {
            snapshot,
            space,
            ephemeral,
        } => cmd_hydrate(cancel, space.as_deref(), snapshot.as_deref(), *ephemeral),
        Command::Compact { snapshot, space } => {
            cmd_compact(space.as_deref(), snapshot.as_deref())
        }
        Command::Tidy {
            keep_latest,
            latest,
            before,
            match_glob,
            gc,
            space,
            dry_run,
        } => cmd_tidy(
            cancel,
            space.as_deref(),
            tidy_selector(keep_latest, latest, before, match_glob)?,
            *gc,
            *dry_run,
        ),
        Command::Gc { dry_run } => cmd_gc(cancel, *dry_run),
        Command::Verify {
            targets,
            space,
            missing_payload,
        } => cmd_verify(cancel, space.as_deref(), targets, missing_payload),
        Command::History { space } => cmd_history(space.as_deref()),
        Command::Note {
            snapshot,
            space,
            message,
        } => cmd_note(space.as_deref(), snapshot, message.as_deref()),
        Command::Space { action } => cmd_space(action),
        Command::CacheMetaGc { space, ttl_days } => {
            cmd_cache_meta_gc(space.as_deref(), *ttl_days)
        }
    }
}

// ─── Command Implementations ────────────────────────────────────────────────

fn cmd_init() -> Result<()> {
    let root = std::env::current_dir()?;
    let layout = RepoLayout::new(&root);
    let created = space::init_repo(&layout)?;
    config::write_default(&layout)?;

    if created {
        eprintln!(
            "{} Initialized repository at {} (space '{}')",
            colored::Colorize::green("✓"),
            layout.control_dir().display(),
            space::DEFAULT_SPACE,
        );
    } else {
        eprintln!(
            "Repository already initialized at {}",
            layout.control_dir().display()
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_save(
    cli: &Cli,
    cancel: &CancelToken,
    space: Option<String>,
    message: Option<String>,
    compact_full: bool,
    compact_speed: bool,
    hash_none: bool,
) -> Result<()> {
    let layout = open_layout()?;
    let settings = config::load(&layout)?;
    let log = FileLog::open(&layout, settings.log_to_file);

    let profile = if compact_full {
        CompactProfile::Full
    } else if compact_speed {
        CompactProfile::Speed
    } else {
        CompactProfile::Balanced
    };

    print_header("Save");
    let outcome = save::save_snapshot(
        &layout,
        &settings,
        &SaveOptions {
            space,
            message,
            hash_mode: if hash_none { HashMode::None } else { HashMode::Full },
            profile,
            source: None,
            verbose: cli.verbose,
        },
        cancel,
    )?;
    log.line(&format!(
        "save space={} id={} files={} bytes={} new_chunks={}",
        outcome.space, outcome.id, outcome.file_count, outcome.total_bytes, outcome.chunks_written
    ));
    save::print_save_summary(&outcome);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_restore(
    cli: &Cli,
    cancel: &CancelToken,
    space: Option<&str>,
    reference: SnapshotRef,
    to: Option<PathBuf>,
    hydrate: bool,
    ephemeral: bool,
    purge: bool,
    verify: bool,
) -> Result<()> {
    let layout = open_layout()?;
    let settings = config::load(&layout)?;
    let space = space::resolve_space(&layout, space)?;
    let id = space::resolve_snapshot(&layout, &space, &reference)?;
    let store = ChunkStore::open(layout.store_dir(), settings.compression_level)?;
    let workers = settings.effective_workers();

    print_header("Restore");
    eprintln!("  Snapshot:  {}", colored::Colorize::bold(id.as_str()));

    if hydrate {
        let dest = restore::hydrate(&layout, &store, &space, &id, ephemeral, workers, cancel)?;
        eprintln!(
            "  {} Hydrated into {}",
            colored::Colorize::green("✓"),
            dest.display(),
        );
        if ephemeral {
            println!("{}", dest.display());
        }
        return Ok(());
    }

    let dest = to.unwrap_or_else(|| layout.root().to_path_buf());
    if purge {
        restore::purge_destination(&dest)?;
    }

    let manifest = restore::load_snapshot_manifest(&layout, &id)?;
    let mut opts = restore::RestoreOptions::new(dest.clone(), workers);
    opts.verify = verify;
    opts.verbose = cli.verbose;
    let stats = restore::restore_manifest(&store, &manifest, &opts, cancel)?;

    eprintln!();
    eprintln!(
        "  {} Restored {} files ({}) into {}",
        colored::Colorize::green("✓"),
        stats.files_restored,
        format_size(stats.bytes_restored),
        dest.display(),
    );
    Ok(())
}

fn cmd_pick(
    cancel: &CancelToken,
    space: Option<&str>,
    snapshot: &str,
    selector: &str,
    out: &std::path::Path,
) -> Result<()> {
    let layout = open_layout()?;
    let settings = config::load(&layout)?;
    let space = space::resolve_space(&layout, space)?;
    let id = space::resolve_snapshot(&layout, &space, &SnapshotRef::parse(snapshot)?)?;
    let store = ChunkStore::open(layout.store_dir(), settings.compression_level)?;

    let manifest = restore::load_snapshot_manifest(&layout, &id)?;
    let stats = restore::pick(
        &store,
        &manifest,
        selector,
        out,
        settings.effective_workers(),
        cancel,
    )?;

    eprintln!(
        "{} Picked {} files ({}) into {}",
        colored::Colorize::green("✓"),
        stats.files_restored,
        format_size(stats.bytes_restored),
        out.display(),
    );
    Ok(())
}

fn cmd_export(
    cancel: &CancelToken,
    space: Option<&str>,
    reference: SnapshotRef,
    selectors: &[String],
    to: &std::path::Path,
) -> Result<()> {
    let layout = open_layout()?;
    let settings = config::load(&layout)?;
    let space = space::resolve_space(&layout, space)?;
    let id = space::resolve_snapshot(&layout, &space, &reference)?;
    let store = ChunkStore::open(layout.store_dir(), settings.compression_level)?;

    let manifest = restore::load_snapshot_manifest(&layout, &id)?;
    let stats = restore::export(
        &store,
        &manifest,
        selectors,
        to,
        settings.effective_workers(),
        cancel,
    )?;

    eprintln!(
        "{} Exported {} files ({}) into {}",
        colored::Colorize::green("✓"),
        stats.files_restored,
        format_size(stats.bytes_restored),
        to.display(),
    );
    Ok(())
}

fn cmd_import(
    cli: &Cli,
    cancel: &CancelToken,
    dir: &std::path::Path,
    space: Option<String>,
    message: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let layout = open_layout()?;
    let settings = config::load(&layout)?;

    if dry_run {
        let ignore = ignore::IgnoreEngine::load(&dir.join(layout::IGNORE_FILE))?;
        let plan = planner::plan_tree(dir, &ignore)?;
        eprintln!(
            "Would import {} files ({}) from {}:",
            plan.files.len(),
            format_size(plan.total_bytes()),
            dir.display(),
        );
        for file in &plan.files {
            eprintln!("  {} ({})", file.rel, format_size(file.size));
        }
        return Ok(());
    }

    print_header("Import");
    let outcome = save::save_snapshot(
        &layout,
        &settings,
        &SaveOptions {
            space,
            message,
            hash_mode: HashMode::Full,
            profile: CompactProfile::Balanced,
            source: Some(dir.to_path_buf()),
            verbose: cli.verbose,
        },
        cancel,
    )?;
    save::print_save_summary(&outcome);
    Ok(())
}

fn cmd_recompose(
    cancel: &CancelToken,
    sources: &[String],
    space: Option<String>,
    message: Option<String>,
    hash_none: bool,
) -> Result<()> {
    let layout = open_layout()?;
    let settings = config::load(&layout)?;

    print_header("Recompose");
    let outcome = save::recompose(
        &layout,
        &settings,
        &save::RecomposeOptions {
            space,
            sources: sources.to_vec(),
            message,
            hash_mode: if hash_none { HashMode::None } else { HashMode::Full },
        },
        cancel,
    )?;
    save::print_save_summary(&outcome);
    Ok(())
}

fn cmd_hydrate(
    cancel: &CancelToken,
    space: Option<&str>,
    snapshot: Option<&str>,
    ephemeral: bool,
) -> Result<()> {
    let layout = open_layout()?;
    let settings = config::load(&layout)?;
    let space = space::resolve_space(&layout, space)?;
    let reference = match snapshot {
        Some(s) => SnapshotRef::parse(s)?,
        None => SnapshotRef::Latest,
    };
    let id = space::resolve_snapshot(&layout, &space, &reference)?;
    let store = ChunkStore::open(layout.store_dir(), settings.compression_level)?;

    let dest = restore::hydrate(
        &layout,
        &store,
        &space,
        &id,
        ephemeral,
        settings.effective_workers(),
        cancel,
    )?;
    eprintln!(
        "{} Hydrated {} into {}",
        colored::Colorize::green("✓"),
        id,
        dest.display(),
    );
    if ephemeral {
        println!("{}", dest.display());
    }
    Ok(())
}

fn cmd_compact(space: Option<&str>, snapshot: Option<&str>) -> Result<()> {
    let layout = open_layout()?;
    let space = space::resolve_space(&layout, space)?;
    let reference = match snapshot {
        Some(s) => SnapshotRef::parse(s)?,
        None => SnapshotRef::Latest,
    };
    let id = space::resolve_snapshot(&layout, &space, &reference)?;

    if !layout.manifest_file(&id).is_file() {
        return Err(error::RestoreError::ManifestMissing(id).into());
    }
    let payload = layout.payload_dir(&space, &id);
    if payload.is_dir() {
        std::fs::remove_dir_all(&payload)?;
        eprintln!(
            "{} Dropped payload of {} (manifest retained)",
            colored::Colorize::green("✓"),
            id,
        );
    } else {
        eprintln!("Snapshot {id} is already compact.");
    }
    Ok(())
}

fn cmd_tidy(
    cancel: &CancelToken,
    space: Option<&str>,
    selector: tidy::TidySelector,
    follow_gc: bool,
    dry_run: bool,
) -> Result<()> {
    let layout = open_layout()?;

    print_header("Tidy");
    let stats = tidy::tidy(&layout, space, &selector, follow_gc, dry_run, cancel)?;

    if stats.deleted.is_empty() {
        eprintln!("  Nothing to tidy.");
    } else {
        let verb = if dry_run { "Would delete" } else { "Deleted" };
        eprintln!("  {verb} {} snapshot(s):", stats.deleted.len());
        for id in &stats.deleted {
            eprintln!("    {id}");
        }
    }
    if let Some(gc_stats) = &stats.gc {
        print_gc_stats(gc_stats);
    }
    Ok(())
}

fn cmd_gc(cancel: &CancelToken, dry_run: bool) -> Result<()> {
    let layout = open_layout()?;
    space::require_initialized(&layout)?;

    print_header("Garbage Collect");
    let stats = gc::run_gc(&layout, dry_run, cancel)?;
    print_gc_stats(&stats);
    Ok(())
}

fn cmd_verify(
    cancel: &CancelToken,
    space: Option<&str>,
    targets: &[String],
    missing_payload: &str,
) -> Result<()> {
    let layout = open_layout()?;
    let settings = config::load(&layout)?;
    let mode = verify::MissingPayloadMode::parse(missing_payload).ok_or_else(|| {
        InputError::Invalid(format!(
            "unknown --missing-payload mode '{missing_payload}' \
             (expected error, skip, hydrate, or temp-hydrate)"
        ))
    })?;

    print_header("Verify");
    let report = verify::verify_space(&layout, &settings, space, targets, mode, cancel)?;

    for row in &report.rows {
        let mark = if row.status.is_ok() {
            colored::Colorize::green("✓")
        } else {
            colored::Colorize::red("✗")
        };
        if row.detail.is_empty() {
            eprintln!("  {mark} {}  {}", row.id, row.status.label());
        } else {
            eprintln!("  {mark} {}  {} — {}", row.id, row.status.label(), row.detail);
        }
    }
    eprintln!();
    eprintln!("  {}/{} ok", report.ok_count(), report.rows.len());

    if report.all_ok() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("verification failed").into())
    }
}

fn cmd_history(space: Option<&str>) -> Result<()> {
    let layout = open_layout()?;
    let space = space::resolve_space(&layout, space)?;
    let entries = history::history(&layout, &space)?;
    history::print_history(&space, &entries);
    Ok(())
}

fn cmd_note(space: Option<&str>, snapshot: &str, message: Option<&str>) -> Result<()> {
    let layout = open_layout()?;
    let settings = config::load(&layout)?;
    let space = space::resolve_space(&layout, space)?;
    let id = space::resolve_snapshot(&layout, &space, &SnapshotRef::parse(snapshot)?)?;
    let note_path = layout.note_file(&space, &id);

    match message {
        Some(text) => {
            meta::write_note(&note_path, text, settings.note_options())?;
            eprintln!("{} Note updated for {id}", colored::Colorize::green("✓"));
        }
        None => {
            let text = meta::read_note(&note_path)?;
            if text.is_empty() {
                eprintln!("(no note)");
            } else {
                println!("{text}");
            }
        }
    }
    Ok(())
}

fn cmd_space(action: &SpaceAction) -> Result<()> {
    let layout = open_layout()?;
    match action {
        SpaceAction::List => {
            let current = space::current_space(&layout)?;
            for name in space::list_spaces(&layout)? {
                let marker = if name == current { "*" } else { " " };
                let count = space::list_snapshot_ids(&layout, &name)?.len();
                eprintln!("{marker} {name}  ({count} snapshots)");
            }
        }
        SpaceAction::Create { name } => {
            space::create_space(&layout, name)?;
            eprintln!("{} Created space '{name}'", colored::Colorize::green("✓"));
        }
        SpaceAction::Use { name } => {
            if !space::space_exists(&layout, name) {
                return Err(error::SpaceError::Unknown(name.clone()).into());
            }
            space::set_current_space(&layout, name)?;
            eprintln!("{} Current space is now '{name}'", colored::Colorize::green("✓"));
        }
        SpaceAction::Rename { old, new } => {
            space::rename_space(&layout, old, new)?;
            eprintln!("{} Renamed '{old}' to '{new}'", colored::Colorize::green("✓"));
        }
        SpaceAction::Delete { name } => {
            space::delete_space(&layout, name)?;
            eprintln!("{} Deleted space '{name}'", colored::Colorize::green("✓"));
        }
    }
    Ok(())
}

fn cmd_cache_meta_gc(space: Option<&str>, ttl_days: i64) -> Result<()> {
    let layout = open_layout()?;
    let removed = filemeta::run_cache_gc(&layout, space, ttl_days)?;
    eprintln!(
        "{} Expired {removed} cache row(s)",
        colored::Colorize::green("✓"),
    );
    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn open_layout() -> Result<RepoLayout> {
    let cwd = std::env::current_dir()?;
    RepoLayout::discover(&cwd)
        .ok_or_else(|| error::SpaceError::NotInitialized(cwd).into())
}

/// Combines `--id` / `--back` into one snapshot reference.
fn snapshot_ref(id: &Option<String>, back: &Option<usize>) -> Result<SnapshotRef> {
    match (id, back) {
        (Some(id), None) => Ok(SnapshotRef::parse(id)?),
        (None, Some(n)) => Ok(SnapshotRef::Back(*n)),
        (None, None) => Ok(SnapshotRef::Latest),
        (Some(_), Some(_)) => {
            Err(InputError::Invalid("--id and --back are mutually exclusive".into()).into())
        }
    }
}

/// Requires exactly one tidy selector.
fn tidy_selector(
    keep_latest: &Option<usize>,
    latest: &Option<usize>,
    before: &Option<String>,
    match_glob: &Option<String>,
) -> Result<tidy::TidySelector> {
    let given = [
        keep_latest.is_some(),
        latest.is_some(),
        before.is_some(),
        match_glob.is_some(),
    ]
    .iter()
    .filter(|b| **b)
    .count();
    if given != 1 {
        return Err(InputError::BadSelector(
            "tidy needs exactly one of --keep-latest, --latest, --before, --match".into(),
        )
        .into());
    }

    if let Some(n) = keep_latest {
        Ok(tidy::TidySelector::KeepLatest(*n))
    } else if let Some(n) = latest {
        Ok(tidy::TidySelector::Latest(*n))
    } else if let Some(date) = before {
        tidy::TidySelector::before(date)
    } else if let Some(glob) = match_glob {
        Ok(tidy::TidySelector::Match(glob.clone()))
    } else {
        Err(InputError::BadSelector("no selector supplied".into()).into())
    }
}

fn print_gc_stats(stats: &gc::GcStats) {
    let verb = if stats.dry_run { "Would sweep" } else { "Swept" };
    eprintln!(
        "  {} {verb} {} chunk(s), kept {} ({} manifests, {} referenced hashes)",
        colored::Colorize::green("✓"),
        stats.swept,
        stats.kept,
        stats.manifests,
        stats.referenced,
    );
    if !stats.dry_run && stats.freed_bytes > 0 {
        eprintln!("    Freed: {}", format_size(stats.freed_bytes));
    }
}

fn print_header(action: &str) {
    eprintln!();
    eprintln!(
        "  {} rinne v{} — {action}",
        colored::Colorize::bold("⚡"),
        env!("CARGO_PKG_VERSION"),
    );
    eprintln!();
}
