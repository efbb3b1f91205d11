use anyhow::{Context, Result};
use memmap2::Mmap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const PATCH_EXTENSION: &str = "bps";

/// A patch file found under a patch directory.
#[derive(Debug, Clone)]
pub struct PatchEntry {
    /// Game file the patch applies to, relative to the game directory, with
    /// forward slashes.
    pub relative_path: String,
    pub patch_path: PathBuf,
}

/// Collect every `*.bps` file under `root`, sorted by target path.
/// `sub/data.win.bps` patches `sub/data.win`.
pub fn walk_patches(root: &Path) -> Result<Vec<PatchEntry>> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Failed to canonicalize path: {}", root.display()))?;

    let mut entries = Vec::new();

    for entry in WalkDir::new(&root).min_depth(1) {
        let entry = entry
            .with_context(|| format!("Failed to read directory entry in {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let full_path = entry.path();
        if full_path.extension().and_then(|e| e.to_str()) != Some(PATCH_EXTENSION) {
            continue;
        }

        let relative = full_path
            .strip_prefix(&root)
            .with_context(|| "Failed to compute relative path")?
            .with_extension("");
        let relative_str = relative
            .to_str()
            .with_context(|| format!("Non-UTF8 path: {}", relative.display()))?
            .replace('\\', "/");

        entries.push(PatchEntry {
            relative_path: relative_str,
            patch_path: full_path.to_path_buf(),
        });
    }

    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(entries)
}

/// Memory-map a file for read-only access.
///
/// # Safety
/// The mapping is read-only. Callers must not concurrently truncate or replace
/// the underlying file while the `Mmap` is live.
pub fn mmap_file(path: &Path) -> Result<Mmap> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    // SAFETY: We only read from this mapping, and every caller drops it before
    // renaming or rewriting the file.
    unsafe {
        Mmap::map(&file).with_context(|| format!("Failed to memory-map file: {}", path.display()))
    }
}

/// Compute the BLAKE3 hash of a byte slice.
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Stream-hash a file using BLAKE3.
pub fn hash_file(path: &Path) -> Result<[u8; 32]> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;
    let mut reader = std::io::BufReader::with_capacity(256 * 1024, file);
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut reader, &mut hasher)
        .with_context(|| format!("Failed to hash file: {}", path.display()))?;
    Ok(*hasher.finalize().as_bytes())
}

/// `data.win` + `.original` -> `data.win.original`, in the same directory.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Suffix of the file a new version is written to before it replaces the
/// real one.
pub const STAGING_SUFFIX: &str = ".patched";

/// Write `data` to `<path>.patched` and return that path. `path` itself is
/// not touched.
pub fn write_staging(path: &Path, data: &[u8]) -> Result<PathBuf> {
    let staging = with_suffix(path, STAGING_SUFFIX);
    std::fs::write(&staging, data)
        .with_context(|| format!("Failed to write file: {}", staging.display()))?;
    Ok(staging)
}

/// Rename a staged file onto `path`, replacing what is there.
pub fn move_into_place(staging: &Path, path: &Path) -> Result<()> {
    std::fs::rename(staging, path).with_context(|| {
        format!(
            "Failed to move {} to {}",
            staging.display(),
            path.display()
        )
    })
}

/// Best-effort removal of a staged file left behind by a failed operation.
pub fn discard_staging(staging: &Path) {
    if let Err(e) = std::fs::remove_file(staging) {
        log::debug!("Could not remove {}: {}", staging.display(), e);
    }
}

/// Write `data` next to `path` and rename it into place, so `path` never
/// holds a partial file.
pub fn write_replacing(path: &Path, data: &[u8]) -> Result<()> {
    let staging = write_staging(path, data)?;
    if let Err(err) = move_into_place(&staging, path) {
        discard_staging(&staging);
        return Err(err);
    }
    Ok(())
}
