use anyhow::{bail, Context, Result};
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::util::{self, PatchEntry};

pub const STATE_FILE: &str = ".bps-patcher-state";
pub const STATE_FORMAT: u32 = 1;
pub const VERSION_FILE: &str = "version.txt";

/// What is installed in a game directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallState {
    pub format: u32,
    pub version: Option<String>,
    pub backup_suffix: String,
    pub files: Vec<InstalledFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledFile {
    pub path: String,
    pub blake3_hash: [u8; 32],
}

impl InstallState {
    fn is_recorded(&self, path: &str) -> bool {
        self.files.iter().any(|f| f.path == path)
    }
}

#[derive(Debug)]
pub struct InstallSummary {
    pub version: Option<String>,
    pub files_patched: usize,
    pub backups_created: usize,
    pub files_restored: usize,
    pub up_to_date: bool,
}

#[derive(Debug)]
pub struct UninstallSummary {
    pub version: Option<String>,
    pub files_restored: usize,
    pub files_missing_backup: usize,
    pub files_modified: usize,
}

pub fn state_path(game_dir: &Path) -> PathBuf {
    game_dir.join(STATE_FILE)
}

pub fn read_state(game_dir: &Path) -> Result<Option<InstallState>> {
    let path = state_path(game_dir);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read(&path)
        .with_context(|| format!("Failed to read install record: {}", path.display()))?;
    let state: InstallState = bincode::deserialize(&raw)
        .with_context(|| format!("Failed to decode install record: {}", path.display()))?;
    if state.format != STATE_FORMAT {
        bail!(
            "Unsupported install record format: {} (expected {})",
            state.format,
            STATE_FORMAT
        );
    }
    Ok(Some(state))
}

fn write_state(game_dir: &Path, state: &InstallState) -> Result<()> {
    let raw = bincode::serialize(state).context("Failed to encode install record")?;
    util::write_replacing(&state_path(game_dir), &raw)
}

/// First whitespace-delimited token of `version.txt`, if the patch directory
/// has one.
pub fn read_patch_version(patch_dir: &Path) -> Result<Option<String>> {
    let path = patch_dir.join(VERSION_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(raw.split_whitespace().next().map(str::to_string))
}

/// True when `state` already describes exactly this patch set and nothing
/// has been touched since.
fn is_up_to_date(
    game_dir: &Path,
    state: &InstallState,
    version: Option<&str>,
    entries: &[PatchEntry],
) -> bool {
    if version.is_none() || state.version.as_deref() != version {
        return false;
    }
    let recorded: HashSet<&str> = state.files.iter().map(|f| f.path.as_str()).collect();
    let wanted: HashSet<&str> = entries.iter().map(|e| e.relative_path.as_str()).collect();
    if recorded != wanted {
        return false;
    }
    state.files.iter().all(|f| match util::hash_file(&game_dir.join(&f.path)) {
        Ok(hash) => hash == f.blake3_hash,
        Err(e) => {
            log::debug!("Treating {} as changed: {:#}", f.path, e);
            false
        }
    })
}

struct PatchedFile {
    relative_path: String,
    game_file: PathBuf,
    needs_backup: bool,
    target: Vec<u8>,
}

/// Apply every patch under `patch_dir` to the matching file in `game_dir`.
///
/// Files already patched by an earlier install are re-patched from their
/// backup, so an update always starts from the original data. Every patch is
/// applied in memory first; if any fails, no file in `game_dir` is modified.
pub async fn install(
    game_dir: &Path,
    patch_dir: &Path,
    backup_suffix: &str,
    progress: ProgressBar,
) -> Result<InstallSummary> {
    let game_dir = game_dir.canonicalize().with_context(|| {
        format!(
            "Failed to canonicalize game directory: {}",
            game_dir.display()
        )
    })?;

    let patch_dir_owned = patch_dir.to_path_buf();
    let entries =
        tokio::task::spawn_blocking(move || util::walk_patches(&patch_dir_owned)).await??;
    if entries.is_empty() {
        bail!(
            "No .{} patches found in {}",
            util::PATCH_EXTENSION,
            patch_dir.display()
        );
    }
    let version = read_patch_version(patch_dir)?;
    let previous = read_state(&game_dir)?;

    if let Some(state) = &previous {
        if is_up_to_date(&game_dir, state, version.as_deref(), &entries) {
            log::info!("Game directory already at version {:?}", state.version);
            return Ok(InstallSummary {
                version,
                files_patched: 0,
                backups_created: 0,
                files_restored: 0,
                up_to_date: true,
            });
        }
    }

    // Keep the suffix the existing backups were made with.
    let backup_suffix = match &previous {
        Some(state) if state.backup_suffix != backup_suffix => {
            log::warn!(
                "Keeping backup suffix {:?} from the existing install instead of {:?}",
                state.backup_suffix,
                backup_suffix
            );
            state.backup_suffix.clone()
        }
        _ => backup_suffix.to_string(),
    };

    progress.set_length(entries.len() as u64);

    let game_dir_for_apply = game_dir.clone();
    let previous_for_apply = previous.clone();
    let suffix_for_apply = backup_suffix.clone();
    let (entries, patched) = tokio::task::spawn_blocking(move || -> Result<_> {
        let patched = entries
            .par_iter()
            .map(|entry| -> Result<PatchedFile> {
                let patched = patch_entry(
                    &game_dir_for_apply,
                    entry,
                    previous_for_apply.as_ref(),
                    &suffix_for_apply,
                )?;
                progress.inc(1);
                Ok(patched)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((entries, patched))
    })
    .await??;

    // Commit: nothing below runs unless every patch validated. Every target
    // is staged before the first game file moves.
    let mut staged = Vec::with_capacity(patched.len());
    for file in &patched {
        match util::write_staging(&file.game_file, &file.target) {
            Ok(path) => staged.push(path),
            Err(err) => {
                staged.iter().for_each(|path| util::discard_staging(path));
                return Err(err);
            }
        }
    }

    let mut committed = Vec::with_capacity(patched.len());
    let mut backups_created = 0;
    let result = commit_files(
        &patched,
        &staged,
        &backup_suffix,
        &mut committed,
        &mut backups_created,
    )
    .and_then(|()| restore_dropped(&game_dir, previous.as_ref(), &entries, &backup_suffix));

    let files_restored = match result {
        Ok(restored) => restored,
        Err(err) => {
            staged.iter().for_each(|path| util::discard_staging(path));
            if !committed.is_empty() {
                let partial = partial_state(previous.as_ref(), &committed, &backup_suffix);
                if let Err(e) = write_state(&game_dir, &partial) {
                    log::error!("Failed to record the partial install: {:#}", e);
                }
            }
            return Err(err);
        }
    };

    write_state(
        &game_dir,
        &InstallState {
            format: STATE_FORMAT,
            version: version.clone(),
            backup_suffix,
            files: committed,
        },
    )?;

    Ok(InstallSummary {
        version,
        files_patched: patched.len(),
        backups_created,
        files_restored,
        up_to_date: false,
    })
}

/// Move each staged target into place, backing up originals first. Files
/// are pushed to `committed` as soon as the game directory depends on their
/// backup.
fn commit_files(
    patched: &[PatchedFile],
    staged: &[PathBuf],
    backup_suffix: &str,
    committed: &mut Vec<InstalledFile>,
    backups_created: &mut usize,
) -> Result<()> {
    for (file, staging) in patched.iter().zip(staged) {
        let record = InstalledFile {
            path: file.relative_path.clone(),
            blake3_hash: util::hash_bytes(&file.target),
        };
        let backup = util::with_suffix(&file.game_file, backup_suffix);
        if file.needs_backup {
            std::fs::rename(&file.game_file, &backup).with_context(|| {
                format!(
                    "Failed to back up {} to {}",
                    file.game_file.display(),
                    backup.display()
                )
            })?;
            *backups_created += 1;
        }
        if let Err(err) = util::move_into_place(staging, &file.game_file) {
            if file.needs_backup {
                match std::fs::rename(&backup, &file.game_file) {
                    Ok(()) => *backups_created -= 1,
                    // The original only exists as its backup now.
                    Err(_) => committed.push(record),
                }
            }
            return Err(err);
        }
        log::info!("Installed {}", file.relative_path);
        committed.push(record);
    }
    Ok(())
}

/// Restore files the previous install patched that this patch set drops.
fn restore_dropped(
    game_dir: &Path,
    previous: Option<&InstallState>,
    entries: &[PatchEntry],
    backup_suffix: &str,
) -> Result<usize> {
    let Some(state) = previous else {
        return Ok(0);
    };
    let wanted: HashSet<&str> = entries.iter().map(|e| e.relative_path.as_str()).collect();
    let mut restored = 0;
    for stale in state.files.iter().filter(|f| !wanted.contains(f.path.as_str())) {
        if restore_file(game_dir, stale, backup_suffix)? != Restore::MissingBackup {
            restored += 1;
        }
    }
    Ok(restored)
}

/// Record for an install that failed halfway: everything the previous record
/// covers plus every file committed so far. No version is recorded, so the
/// next install never counts as up to date.
fn partial_state(
    previous: Option<&InstallState>,
    committed: &[InstalledFile],
    backup_suffix: &str,
) -> InstallState {
    let mut files: Vec<InstalledFile> = previous
        .map(|state| {
            state
                .files
                .iter()
                .filter(|f| !committed.iter().any(|c| c.path == f.path))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    files.extend(committed.iter().cloned());
    files.sort_by(|a, b| a.path.cmp(&b.path));
    InstallState {
        format: STATE_FORMAT,
        version: None,
        backup_suffix: backup_suffix.to_string(),
        files,
    }
}

fn patch_entry(
    game_dir: &Path,
    entry: &PatchEntry,
    previous: Option<&InstallState>,
    backup_suffix: &str,
) -> Result<PatchedFile> {
    let game_file = game_dir.join(&entry.relative_path);
    let backup = util::with_suffix(&game_file, backup_suffix);
    let installed = previous.is_some_and(|s| s.is_recorded(&entry.relative_path));

    let source_path = if installed {
        &backup
    } else {
        if backup.exists() {
            bail!(
                "Backup {} already exists but is not part of an install; refusing to overwrite it",
                backup.display()
            );
        }
        &game_file
    };

    let patch = util::mmap_file(&entry.patch_path)?;
    let target = {
        let source = util::mmap_file(source_path)?;
        bps_patcher::apply_patch(&source, &patch).with_context(|| {
            format!(
                "Failed to apply {} to {}",
                entry.patch_path.display(),
                source_path.display()
            )
        })?
    };

    Ok(PatchedFile {
        relative_path: entry.relative_path.clone(),
        game_file,
        needs_backup: !installed,
        target,
    })
}

#[derive(Debug, PartialEq, Eq)]
enum Restore {
    Restored,
    RestoredModified,
    MissingBackup,
}

fn restore_file(game_dir: &Path, file: &InstalledFile, backup_suffix: &str) -> Result<Restore> {
    let game_file = game_dir.join(&file.path);
    let backup = util::with_suffix(&game_file, backup_suffix);
    if !backup.exists() {
        log::warn!("No backup for {}; leaving it as is", file.path);
        return Ok(Restore::MissingBackup);
    }

    let modified = game_file.exists() && util::hash_file(&game_file)? != file.blake3_hash;
    if modified {
        log::warn!(
            "{} was modified after install; restoring the original anyway",
            file.path
        );
    }

    match std::fs::remove_file(&game_file) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(anyhow::Error::from(e))
                .with_context(|| format!("Failed to remove {}", game_file.display()))
        }
    }
    std::fs::rename(&backup, &game_file).with_context(|| {
        format!(
            "Failed to restore {} from {}",
            game_file.display(),
            backup.display()
        )
    })?;
    log::info!("Restored {}", file.path);

    Ok(if modified {
        Restore::RestoredModified
    } else {
        Restore::Restored
    })
}

/// Put every recorded file back to its original and forget the install.
pub fn uninstall(game_dir: &Path) -> Result<UninstallSummary> {
    let Some(state) = read_state(game_dir)? else {
        bail!("No installation record found in {}", game_dir.display());
    };

    let mut summary = UninstallSummary {
        version: state.version.clone(),
        files_restored: 0,
        files_missing_backup: 0,
        files_modified: 0,
    };
    for file in &state.files {
        match restore_file(game_dir, file, &state.backup_suffix)? {
            Restore::Restored => summary.files_restored += 1,
            Restore::RestoredModified => {
                summary.files_restored += 1;
                summary.files_modified += 1;
            }
            Restore::MissingBackup => summary.files_missing_backup += 1,
        }
    }

    let path = state_path(game_dir);
    std::fs::remove_file(&path)
        .with_context(|| format!("Failed to remove install record: {}", path.display()))?;

    Ok(summary)
}
