//! The checksum protocol around one patch application.
//!
//! Order of checks:
//! 1. magic marker and footer presence (nothing else is read on bad magic)
//! 2. source CRC32 against the footer, before any decoding
//! 3. patch CRC32 over everything but its own trailing four bytes
//! 4. header size invariant, then decode and apply action by action
//! 5. target CRC32 against the footer
//!
//! The target is returned only when all of them pass.

use crate::binary_patch::Applier;
use crate::checksum::crc32;
use crate::error::{ApplyError, FormatError, PatchError, ValidationError};
use crate::patch_format::{ActionKind, Footer, MAGIC};
use crate::reader::PatchReader;

/// Apply `patch` to `source` and return the validated target.
pub fn apply_patch(source: &[u8], patch: &[u8]) -> Result<Vec<u8>, PatchError> {
    apply_patch_with_progress(source, patch, |_, _| {})
}

/// Like [`apply_patch`], calling `progress(output_position, target_size)`
/// after every action.
pub fn apply_patch_with_progress<F>(
    source: &[u8],
    patch: &[u8],
    mut progress: F,
) -> Result<Vec<u8>, PatchError>
where
    F: FnMut(u64, u64),
{
    if !patch.starts_with(MAGIC) {
        return Err(FormatError::BadMagic.into());
    }
    let footer = Footer::from_patch(patch).ok_or(FormatError::TruncatedInput)?;

    let actual = crc32(source);
    if actual != footer.source_checksum {
        return Err(ValidationError::SourceMismatch {
            expected: footer.source_checksum,
            actual,
        }
        .into());
    }
    log::debug!("source checksum {:08x} ok", actual);

    verify_patch_checksum(patch, &footer)?;
    log::debug!("patch checksum {:08x} ok", footer.patch_checksum);

    let reader = PatchReader::new(patch)?;
    let header = reader.header();
    if header.source_size != source.len() as u64 {
        return Err(ApplyError::SourceSizeMismatch {
            declared: header.source_size,
            actual: source.len() as u64,
        }
        .into());
    }
    let target_size = header.target_size;

    let mut applier = Applier::new(source, target_size)?;
    for action in reader {
        applier.apply(&action?)?;
        progress(applier.output_position(), target_size);
    }
    let target = applier.finish()?;

    let actual = crc32(&target);
    if actual != footer.target_checksum {
        return Err(ValidationError::TargetMismatch {
            expected: footer.target_checksum,
            actual,
        }
        .into());
    }
    log::debug!("target checksum {:08x} ok, {} bytes", actual, target.len());

    Ok(target)
}

/// `patch` must hold at least a footer.
fn verify_patch_checksum(patch: &[u8], footer: &Footer) -> Result<(), ValidationError> {
    let actual = crc32(&patch[..patch.len() - 4]);
    if actual != footer.patch_checksum {
        return Err(ValidationError::PatchCorrupt {
            expected: footer.patch_checksum,
            actual,
        });
    }
    Ok(())
}

/// Per-kind action totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionStats {
    pub count: u64,
    pub bytes: u64,
}

/// What a patch declares and contains, without applying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchInfo {
    pub source_size: u64,
    pub target_size: u64,
    pub metadata: Vec<u8>,
    pub footer: Footer,
    pub patch_checksum_ok: bool,
    /// Indexed by `ActionKind as usize`.
    pub actions: [ActionStats; 4],
}

impl PatchInfo {
    pub fn stats(&self, kind: ActionKind) -> ActionStats {
        self.actions[kind as usize]
    }

    /// Sum of all action lengths; equals `target_size` for a well-formed patch.
    pub fn output_length(&self) -> u64 {
        self.actions.iter().map(|s| s.bytes).sum()
    }
}

/// Decode the whole action stream of `patch` and summarise it.
///
/// A failing patch checksum is reported in the result, not as an error, so
/// a damaged download can still be examined.
pub fn inspect(patch: &[u8]) -> Result<PatchInfo, PatchError> {
    let reader = PatchReader::new(patch)?;
    let footer = reader.footer();
    let header = reader.header().clone();
    let patch_checksum_ok = verify_patch_checksum(patch, &footer).is_ok();

    let mut actions = [ActionStats::default(); 4];
    for action in reader {
        let action = action?;
        let stats = &mut actions[action.kind() as usize];
        stats.count += 1;
        stats.bytes = stats.bytes.saturating_add(action.length());
    }

    Ok(PatchInfo {
        source_size: header.source_size,
        target_size: header.target_size,
        metadata: header.metadata.to_vec(),
        footer,
        patch_checksum_ok,
        actions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch_format::FOOTER_LEN;
    use crate::test_support::PatchBuilder;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const SOURCE: &[u8] = b"The quick brown fox jumps over the lazy dog";

    /// "The slow brown fox jumps over the lazy dog!!!!"
    fn sample_patch() -> (Vec<u8>, Vec<u8>) {
        let target = b"The slow brown fox jumps over the lazy dog!!!!".to_vec();
        let patch = PatchBuilder::new(SOURCE.len() as u64, target.len() as u64)
            .metadata(b"sample")
            .source_read(4)
            .target_read(b"slow")
            .source_copy(34, 9)
            .target_read(b"!")
            .target_copy(3, 42)
            .build(SOURCE, &target);
        (patch, target)
    }

    #[test]
    fn test_identity_patch() {
        let source = [0x41, 0x42, 0x43, 0x44];
        let patch = PatchBuilder::new(4, 4).source_read(4).build(&source, &source);
        assert_eq!(apply_patch(&source, &patch).unwrap(), source);
    }

    #[test]
    fn test_literal_patch_ignores_source_content() {
        let target = [0x58, 0x59, 0x5A];
        let source = b"anything";
        let patch = PatchBuilder::new(source.len() as u64, 3)
            .target_read(&target)
            .build(source, &target);
        assert_eq!(apply_patch(source, &patch).unwrap(), target);
    }

    #[test]
    fn test_mixed_actions() {
        let (patch, target) = sample_patch();
        assert_eq!(apply_patch(SOURCE, &patch).unwrap(), target);
    }

    #[test]
    fn test_progress_reports_every_action() {
        let (patch, target) = sample_patch();
        let mut seen = Vec::new();
        apply_patch_with_progress(SOURCE, &patch, |pos, total| seen.push((pos, total))).unwrap();
        let total = target.len() as u64;
        assert_eq!(
            seen,
            vec![(4, total), (8, total), (42, total), (43, total), (46, total)]
        );
    }

    #[test]
    fn test_bad_magic_first() {
        let (mut patch, _) = sample_patch();
        patch[3] = b'2';
        // The source is wrong too; magic is still reported.
        assert_eq!(
            apply_patch(b"other", &patch),
            Err(PatchError::Format(FormatError::BadMagic))
        );
    }

    #[test]
    fn test_wrong_source() {
        let (patch, _) = sample_patch();
        assert!(matches!(
            apply_patch(b"The quick brown fox jumps over the lazy cat", &patch),
            Err(PatchError::Validation(ValidationError::SourceMismatch { .. }))
        ));
    }

    #[test]
    fn test_target_checksum_mismatch() {
        let source = b"abcd";
        let patch = PatchBuilder::new(4, 4)
            .source_read(4)
            .build(source, b"abce");
        assert_eq!(
            apply_patch(source, &patch),
            Err(PatchError::Validation(ValidationError::TargetMismatch {
                expected: crc32(b"abce"),
                actual: crc32(b"abcd"),
            }))
        );
    }

    #[test]
    fn test_declared_source_size_mismatch() {
        let source = b"abcd";
        let patch = PatchBuilder::new(5, 4).source_read(4).build(source, source);
        assert_eq!(
            apply_patch(source, &patch),
            Err(PatchError::Apply(ApplyError::SourceSizeMismatch {
                declared: 5,
                actual: 4,
            }))
        );
    }

    #[test]
    fn test_out_of_bounds_with_valid_checksums() {
        let source = b"abcd";
        let patch = PatchBuilder::new(4, 8).source_read(8).build(source, b"abcdabcd");
        assert!(matches!(
            apply_patch(source, &patch),
            Err(PatchError::Apply(ApplyError::OutOfBounds { .. }))
        ));
    }

    #[test]
    fn test_trailing_garbage_with_valid_checksums() {
        let patch = PatchBuilder::new(0, 4)
            .raw(&[0x8d, b'a', b'b'])
            .build(b"", b"ab");
        assert_eq!(
            apply_patch(b"", &patch),
            Err(PatchError::Format(FormatError::TrailingGarbage))
        );
    }

    #[test]
    fn test_inspect() {
        let (patch, target) = sample_patch();
        let info = inspect(&patch).unwrap();
        assert_eq!(info.source_size, SOURCE.len() as u64);
        assert_eq!(info.target_size, target.len() as u64);
        assert_eq!(info.metadata, b"sample");
        assert!(info.patch_checksum_ok);
        assert_eq!(info.footer.source_checksum, crc32(SOURCE));
        assert_eq!(
            info.stats(ActionKind::TargetRead),
            ActionStats { count: 2, bytes: 5 }
        );
        assert_eq!(
            info.stats(ActionKind::SourceCopy),
            ActionStats { count: 1, bytes: 34 }
        );
        assert_eq!(info.output_length(), info.target_size);
    }

    #[test]
    fn test_inspect_reports_corruption() {
        let (mut patch, _) = sample_patch();
        let last = patch.len() - 1;
        patch[last] ^= 0xff;
        assert!(!inspect(&patch).unwrap().patch_checksum_ok);
    }

    proptest! {
        #[test]
        fn prop_source_bit_flip_is_source_mismatch(bit in 0usize..SOURCE.len() * 8) {
            let (patch, _) = sample_patch();
            let mut source = SOURCE.to_vec();
            source[bit / 8] ^= 1 << (bit % 8);
            let result = apply_patch(&source, &patch);
            prop_assert!(
                matches!(result, Err(PatchError::Validation(ValidationError::SourceMismatch { .. }))),
                "unexpected result {:?}",
                result
            );
        }

        #[test]
        fn prop_body_bit_flip_is_patch_corrupt(seed in any::<usize>(), bit in 0u8..8) {
            let (mut patch, _) = sample_patch();
            // Everything between the magic and the footer.
            let body = MAGIC.len()..patch.len() - FOOTER_LEN;
            let at = body.start + seed % body.len();
            patch[at] ^= 1 << bit;
            prop_assert_eq!(
                apply_patch(SOURCE, &patch).map(|_| ()),
                Err(PatchError::Validation(ValidationError::PatchCorrupt {
                    expected: Footer::from_patch(&patch).unwrap().patch_checksum,
                    actual: crc32(&patch[..patch.len() - 4]),
                }))
            );
        }
    }
}
