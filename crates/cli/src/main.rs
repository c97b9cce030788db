//! driftsync: keep a local directory synchronized with a driftsync server
//!
//! - Content-addressed blocks - unchanged data is never re-sent
//! - Optimistic versioning   - conflicting edits resolve to one winner
//! - Plain-text local index  - re-runs are idempotent and resumable

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use clap::builder::styling::{AnsiColor, Effects};
use clap::{builder::Styles, Parser, Subcommand};
use color_eyre::eyre::{ensure, eyre};
use color_eyre::Result;
use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tracing::{error, info};

use driftsync_core::config::{SyncConfig, DEFAULT_BLOCK_SIZE};
use driftsync_core::engine::{classify_offline, SyncEngine};
use driftsync_core::index::{INDEX_FILE, INDEX_TMP_FILE};
use driftsync_core::meta::FileStatus;
use driftsync_transport::TcpStore;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "driftsync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Sync a directory with a driftsync server")]
#[command(long_about = r#"
driftsync keeps a local directory synchronized with a central server.

How it works:
  • Files are split into fixed-size blocks, addressed by content hash
  • The server stores one authoritative version per file
  • Conflicting edits resolve to a single winner; the loser downloads it
  • A plain-text index.txt records what was last known to match

Examples:
  driftsync sync ./docs --server 127.0.0.1:8080    One sync pass
  driftsync watch ./docs --server 127.0.0.1:8080   Sync on every change
  driftsync scan ./docs                            What changed locally?
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one synchronization pass
    Sync {
        /// Base directory to synchronize
        dir: PathBuf,

        /// Server address (host:port); overrides .driftsync.toml
        #[arg(short, long)]
        server: Option<String>,

        /// Block size in bytes; overrides .driftsync.toml
        #[arg(short, long)]
        block_size: Option<usize>,
    },

    /// Sync continuously, re-running on filesystem changes
    Watch {
        /// Base directory to synchronize
        dir: PathBuf,

        /// Server address (host:port); overrides .driftsync.toml
        #[arg(short, long)]
        server: Option<String>,

        /// Block size in bytes; overrides .driftsync.toml
        #[arg(short, long)]
        block_size: Option<usize>,

        /// Debounce delay in milliseconds
        #[arg(short, long, default_value = "500")]
        debounce: u64,
    },

    /// Classify local changes against the index, without a server
    Scan {
        /// Directory to scan
        dir: PathBuf,

        /// Block size in bytes; overrides .driftsync.toml
        #[arg(short, long)]
        block_size: Option<usize>,
    },

    /// Show version and build info
    Version,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Version => {
            eprintln!("driftsync {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Scan { dir, block_size } => {
            scan_command(&dir, block_size)?;
        }
        Commands::Sync {
            dir,
            server,
            block_size,
        } => {
            sync_command(&dir, server, block_size)?;
        }
        Commands::Watch {
            dir,
            server,
            block_size,
            debounce,
        } => {
            watch_command(&dir, server, block_size, debounce)?;
        }
    }

    Ok(())
}

/// Merge CLI flags with .driftsync.toml; flags win.
fn resolve(
    dir: &Path,
    server: Option<String>,
    block_size: Option<usize>,
) -> Result<(String, usize)> {
    let config = SyncConfig::load(dir)?;
    let server = server.or(config.server).ok_or_else(|| {
        eyre!("no server address: pass --server or set `server` in .driftsync.toml")
    })?;
    let block_size = block_size.or(config.block_size).unwrap_or(DEFAULT_BLOCK_SIZE);
    ensure!(block_size > 0, "block size must be positive");
    Ok((server, block_size))
}

fn resolve_block_size(dir: &Path, block_size: Option<usize>) -> Result<usize> {
    let config = SyncConfig::load(dir)?;
    let block_size = block_size.or(config.block_size).unwrap_or(DEFAULT_BLOCK_SIZE);
    ensure!(block_size > 0, "block size must be positive");
    Ok(block_size)
}

fn sync_command(dir: &Path, server: Option<String>, block_size: Option<usize>) -> Result<()> {
    let (addr, block_size) = resolve(dir, server, block_size)?;

    info!("syncing {} with {addr}", dir.display());
    let store = TcpStore::connect(&addr)?;
    let mut engine = SyncEngine::new(store, dir, block_size);
    let report = engine.run()?;

    info!(
        uploaded = report.uploaded,
        downloaded = report.downloaded,
        removed = report.removed,
        unchanged = report.unchanged,
        skipped = report.skipped,
        "sync complete"
    );

    let _ = engine.into_remote().shutdown();
    Ok(())
}

fn watch_command(
    dir: &Path,
    server: Option<String>,
    block_size: Option<usize>,
    debounce_ms: u64,
) -> Result<()> {
    // Initial sync
    sync_command(dir, server.clone(), block_size)?;

    let (tx, rx) = mpsc::channel();

    let mut debouncer = new_debouncer(
        Duration::from_millis(debounce_ms),
        None,
        move |result: DebounceEventResult| {
            if let Ok(events) = result {
                let _ = tx.send(events);
            }
        },
    )?;

    // The scan is flat, so watching subdirectories would only cause noise.
    debouncer.watch(dir, RecursiveMode::NonRecursive)?;

    info!("watching {} for changes (Ctrl+C to stop)...", dir.display());

    loop {
        match rx.recv() {
            Ok(events) => {
                // The sync itself rewrites index.txt; ignore events that
                // touch nothing else or the watch loop never settles.
                let relevant = events
                    .iter()
                    .flat_map(|e| e.paths.iter())
                    .any(|p| !is_index_path(p));
                if !relevant {
                    continue;
                }

                info!("change detected, syncing...");
                if let Err(e) = sync_command(dir, server.clone(), block_size) {
                    error!("sync failed: {e:#}");
                }
            }
            Err(e) => {
                error!("watch error: {e}");
                break;
            }
        }
    }

    Ok(())
}

fn is_index_path(path: &Path) -> bool {
    matches!(
        path.file_name().and_then(|n| n.to_str()),
        Some(INDEX_FILE | INDEX_TMP_FILE)
    )
}

fn scan_command(dir: &Path, block_size: Option<usize>) -> Result<()> {
    let block_size = resolve_block_size(dir, block_size)?;
    let infos = classify_offline(dir, block_size)?;

    let count = |status: FileStatus| infos.iter().filter(|i| i.status == status).count();
    eprintln!("Files: {}", infos.len());
    eprintln!(
        "New: {}  Modified: {}  Deleted: {}  Unchanged: {}",
        count(FileStatus::New),
        count(FileStatus::Modified),
        count(FileStatus::Deleted),
        count(FileStatus::Unchanged),
    );

    for info in &infos {
        if info.status == FileStatus::Unchanged {
            continue;
        }
        let tag = match info.status {
            FileStatus::New => "new",
            FileStatus::Modified => "modified",
            FileStatus::Deleted => "deleted",
            FileStatus::Unchanged => unreachable!(),
        };
        eprintln!("  {tag:<8} {} (v{})", info.metadata.filename, info.metadata.version);
    }

    Ok(())
}
