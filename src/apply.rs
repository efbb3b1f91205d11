use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::util;

pub struct ApplyOptions {
    /// Write the result here and leave the source untouched.
    pub output: Option<PathBuf>,
    pub backup_suffix: String,
    /// Keep the replaced source as `<source><backup_suffix>`.
    pub backup: bool,
}

#[derive(Debug)]
pub struct ApplySummary {
    pub source_size: u64,
    pub target_size: u64,
    pub written_to: PathBuf,
    pub backup: Option<PathBuf>,
}

/// Patch one file. Nothing is written unless the patch applies and every
/// checksum matches.
pub fn apply_file<F>(
    source_path: &Path,
    patch_path: &Path,
    options: &ApplyOptions,
    progress: F,
) -> Result<ApplySummary>
where
    F: FnMut(u64, u64),
{
    let patch = util::mmap_file(patch_path)?;

    // Scope the source mapping so it is dropped before the source is renamed.
    // On Windows, renaming a file with an open mapping fails.
    let (source_size, target) = {
        let source = util::mmap_file(source_path)?;
        let target = bps_patcher::apply_patch_with_progress(&source, &patch, progress)
            .with_context(|| {
                format!(
                    "Failed to apply {} to {}",
                    patch_path.display(),
                    source_path.display()
                )
            })?;
        (source.len() as u64, target)
    };
    log::info!(
        "Patched {} ({} -> {} bytes)",
        source_path.display(),
        source_size,
        target.len()
    );

    let target_size = target.len() as u64;

    if let Some(output) = &options.output {
        std::fs::write(output, &target)
            .with_context(|| format!("Failed to write file: {}", output.display()))?;
        return Ok(ApplySummary {
            source_size,
            target_size,
            written_to: output.clone(),
            backup: None,
        });
    }

    let backup = if options.backup {
        let backup = util::with_suffix(source_path, &options.backup_suffix);
        if backup.exists() {
            bail!(
                "Backup {} already exists; refusing to overwrite it",
                backup.display()
            );
        }
        Some(backup)
    } else {
        None
    };

    // The source keeps its place until the patched copy is fully written.
    let staging = util::write_staging(source_path, &target)?;

    if let Some(backup) = &backup {
        if let Err(e) = std::fs::rename(source_path, backup) {
            util::discard_staging(&staging);
            return Err(e).with_context(|| {
                format!(
                    "Failed to back up {} to {}",
                    source_path.display(),
                    backup.display()
                )
            });
        }
        log::info!("Backed up original to {}", backup.display());
    }

    if let Err(err) = util::move_into_place(&staging, source_path) {
        if let Some(backup) = &backup {
            if let Err(e) = std::fs::rename(backup, source_path) {
                log::error!(
                    "Failed to put {} back from {}: {}",
                    source_path.display(),
                    backup.display(),
                    e
                );
            }
        }
        util::discard_staging(&staging);
        return Err(err);
    }

    Ok(ApplySummary {
        source_size,
        target_size,
        written_to: source_path.to_path_buf(),
        backup,
    })
}
