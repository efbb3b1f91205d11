//! Applies BPS binary patches.
//!
//! A BPS patch rebuilds a target file from a source file with four kinds of
//! action: copy from the source at the output position, insert literal bytes,
//! and copy from the source or from the already written target through two
//! relative cursors. Source, target and the patch itself are each covered by
//! a CRC32 in the patch footer.
//!
//! ```no_run
//! let source = std::fs::read("data.win")?;
//! let patch = std::fs::read("data.bps")?;
//! let target = bps_patcher::apply_patch(&source, &patch)?;
//! std::fs::write("data.win.patched", target)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod binary_patch;
pub mod checksum;
pub mod cursor;
pub mod error;
pub mod patch_format;
pub mod reader;
pub mod validate;
pub mod vlq;

#[cfg(test)]
mod test_support;

pub use binary_patch::{apply_actions, Applier};
pub use error::{ApplyError, FormatError, PatchError, ValidationError};
pub use patch_format::{Action, ActionKind, Footer, Header};
pub use reader::{parse, PatchReader};
pub use validate::{apply_patch, apply_patch_with_progress, inspect, PatchInfo};
