mod apply;
mod install;
mod util;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Instant;

use bps_patcher::ActionKind;

const DEFAULT_BACKUP_SUFFIX: &str = ".original";

#[derive(Parser)]
#[command(name = "bps-patcher", about = "Apply BPS patches to game data files")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a single patch to a single file
    Apply {
        /// File to patch (e.g. data.win)
        #[arg(long)]
        source: PathBuf,
        /// Path to the .bps patch
        #[arg(long, short)]
        patch: PathBuf,
        /// Write the patched file here instead of replacing the source
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Suffix appended to the source name for its backup
        #[arg(long, default_value = DEFAULT_BACKUP_SUFFIX)]
        backup_suffix: String,
        /// Replace the source without keeping a backup
        #[arg(long)]
        no_backup: bool,
    },
    /// Install or update a set of patches into a game directory
    Install {
        /// Game directory holding the files to patch
        #[arg(long)]
        game_dir: PathBuf,
        /// Directory of <relative path>.bps patches and an optional version.txt
        #[arg(long)]
        patches: PathBuf,
        /// Suffix appended to each original file name for its backup
        #[arg(long, default_value = DEFAULT_BACKUP_SUFFIX)]
        backup_suffix: String,
    },
    /// Restore the original files of a previous install
    Uninstall {
        /// Game directory of the install
        #[arg(long)]
        game_dir: PathBuf,
    },
    /// Show the header, checksums and action summary of a patch
    Info {
        /// Path to the .bps patch
        #[arg(long, short)]
        patch: PathBuf,
    },
}

fn progress_bar(len: u64, quiet: bool, template: &str) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template(template) {
        bar.set_style(style);
    }
    bar
}

/// Level forced by `-v`/`-q`; `None` leaves `RUST_LOG` in charge.
fn log_level(verbose: u8, quiet: bool) -> Option<log::LevelFilter> {
    match verbose {
        0 if quiet => Some(log::LevelFilter::Error),
        0 => None,
        1 => Some(log::LevelFilter::Info),
        2 => Some(log::LevelFilter::Debug),
        _ => Some(log::LevelFilter::Trace),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if let Some(level) = log_level(cli.verbose, cli.quiet) {
        logger.filter_level(level);
    }
    logger.init();

    match cli.command {
        Commands::Apply {
            source,
            patch,
            output,
            backup_suffix,
            no_backup,
        } => {
            println!("Applying patch...");
            println!("  Source: {}", source.display());
            println!("  Patch: {}", patch.display());

            let start = Instant::now();
            let quiet = cli.quiet;
            let options = apply::ApplyOptions {
                output,
                backup_suffix,
                backup: !no_backup,
            };
            let summary = tokio::task::spawn_blocking(move || {
                let bar = progress_bar(0, quiet, "{bar:40} {bytes}/{total_bytes}");
                let summary = apply::apply_file(&source, &patch, &options, |done, total| {
                    bar.set_length(total);
                    bar.set_position(done);
                });
                bar.finish_and_clear();
                summary
            })
            .await??;
            let elapsed = start.elapsed();

            println!("\nPatch applied successfully!");
            println!("  Source size: {} bytes", summary.source_size);
            println!("  Target size: {} bytes", summary.target_size);
            println!("  Written to: {}", summary.written_to.display());
            if let Some(backup) = &summary.backup {
                println!("  Backup: {}", backup.display());
            }
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
        }
        Commands::Install {
            game_dir,
            patches,
            backup_suffix,
        } => {
            println!("Installing patches...");
            println!("  Game directory: {}", game_dir.display());
            println!("  Patches: {}", patches.display());

            let start = Instant::now();
            let bar = progress_bar(0, cli.quiet, "{bar:40} {pos}/{len} files");
            let summary = install::install(&game_dir, &patches, &backup_suffix, bar.clone()).await;
            bar.finish_and_clear();
            let summary = summary?;
            let elapsed = start.elapsed();

            let version = summary.version.as_deref().unwrap_or("unknown");
            if summary.up_to_date {
                println!("\nGame already up to date (version {}).", version);
                return Ok(());
            }
            println!("\nPatches installed successfully!");
            println!("  Version: {}", version);
            println!("  Files patched: {}", summary.files_patched);
            println!("  Backups created: {}", summary.backups_created);
            println!("  Files restored: {}", summary.files_restored);
            println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
        }
        Commands::Uninstall { game_dir } => {
            println!("Uninstalling...");
            println!("  Game directory: {}", game_dir.display());

            let summary = install::uninstall(&game_dir)?;

            println!("\nOriginal files restored.");
            println!(
                "  Version removed: {}",
                summary.version.as_deref().unwrap_or("unknown")
            );
            println!("  Files restored: {}", summary.files_restored);
            println!("  Modified since install: {}", summary.files_modified);
            println!("  Missing backups: {}", summary.files_missing_backup);
        }
        Commands::Info { patch } => {
            let raw = util::mmap_file(&patch)?;
            let info = bps_patcher::inspect(&raw)
                .with_context(|| format!("Failed to read patch: {}", patch.display()))?;

            println!("Patch: {}", patch.display());
            println!("  Source size: {} bytes", info.source_size);
            println!("  Target size: {} bytes", info.target_size);
            println!("  Source CRC32: {:08x}", info.footer.source_checksum);
            println!("  Target CRC32: {:08x}", info.footer.target_checksum);
            println!(
                "  Patch CRC32: {:08x} ({})",
                info.footer.patch_checksum,
                if info.patch_checksum_ok { "ok" } else { "MISMATCH" }
            );
            if !info.metadata.is_empty() {
                println!("  Metadata: {}", String::from_utf8_lossy(&info.metadata));
            }
            for kind in ActionKind::ALL {
                let stats = info.stats(kind);
                println!("  {}: {} actions, {} bytes", kind, stats.count, stats.bytes);
            }
        }
    }

    Ok(())
}
