//! Parses the patch container into a header and a lazy action stream.

use crate::cursor::ByteCursor;
use crate::error::FormatError;
use crate::patch_format::{Action, ActionKind, Footer, Header, FOOTER_LEN, MAGIC, MIN_PATCH_LEN};
use crate::vlq;

/// Streaming reader over one patch. Iterating yields actions in patch order
/// and stops for good at the footer or at the first error.
pub struct PatchReader<'p> {
    cursor: ByteCursor<'p>,
    body_end: usize,
    header: Header<'p>,
    footer: Footer,
    done: bool,
}

impl<'p> PatchReader<'p> {
    /// Check the magic marker and decode the header. Nothing past the first
    /// four bytes is looked at when the magic is wrong.
    pub fn new(patch: &'p [u8]) -> Result<Self, FormatError> {
        if !patch.starts_with(MAGIC) {
            return Err(FormatError::BadMagic);
        }
        if patch.len() < MIN_PATCH_LEN {
            return Err(FormatError::TruncatedInput);
        }
        let footer = Footer::from_patch(patch).ok_or(FormatError::TruncatedInput)?;
        let body_end = patch.len() - FOOTER_LEN;

        let mut cursor = ByteCursor::new(patch);
        cursor.advance(MAGIC.len());
        let source_size = vlq::decode(&mut cursor)?;
        let target_size = vlq::decode(&mut cursor)?;
        let metadata_length = vlq::decode(&mut cursor)?;
        let metadata_length =
            usize::try_from(metadata_length).map_err(|_| FormatError::TruncatedInput)?;
        let metadata = cursor.take_bytes(metadata_length)?;
        // The header must end before the footer starts.
        if cursor.position() > body_end {
            return Err(FormatError::TruncatedInput);
        }

        log::debug!(
            "BPS header: source {} bytes, target {} bytes, {} bytes of metadata",
            source_size,
            target_size,
            metadata.len()
        );

        Ok(Self {
            cursor,
            body_end,
            header: Header {
                source_size,
                target_size,
                metadata,
            },
            footer,
            done: false,
        })
    }

    pub fn header(&self) -> &Header<'p> {
        &self.header
    }

    pub fn footer(&self) -> Footer {
        self.footer
    }

    /// Offset of the first footer byte.
    pub fn body_end(&self) -> usize {
        self.body_end
    }

    pub fn position(&self) -> usize {
        self.cursor.position()
    }

    fn next_action(&mut self) -> Result<Action<'p>, FormatError> {
        let word = vlq::decode(&mut self.cursor)?;
        let length = (word >> 2) + 1;
        let action = match ActionKind::from_word(word) {
            ActionKind::SourceRead => Action::SourceRead { length },
            ActionKind::TargetRead => {
                let len = usize::try_from(length).map_err(|_| FormatError::TruncatedInput)?;
                Action::TargetRead {
                    data: self.cursor.take_bytes(len)?,
                }
            }
            ActionKind::SourceCopy => Action::SourceCopy {
                length,
                delta: vlq::decode_signed(&mut self.cursor)?,
            },
            ActionKind::TargetCopy => Action::TargetCopy {
                length,
                delta: vlq::decode_signed(&mut self.cursor)?,
            },
        };
        if self.cursor.position() > self.body_end {
            return Err(FormatError::TrailingGarbage);
        }
        log::trace!("{} ends at patch offset {}", action.kind(), self.cursor.position());
        Ok(action)
    }
}

impl<'p> Iterator for PatchReader<'p> {
    type Item = Result<Action<'p>, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.cursor.position() == self.body_end {
            self.done = true;
            return None;
        }
        let action = self.next_action();
        if action.is_err() {
            self.done = true;
        }
        Some(action)
    }
}

/// Decode the whole patch up front.
pub fn parse(patch: &[u8]) -> Result<(Header<'_>, Vec<Action<'_>>), FormatError> {
    let reader = PatchReader::new(patch)?;
    let header = reader.header().clone();
    let actions = reader.collect::<Result<Vec<_>, _>>()?;
    Ok((header, actions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::PatchBuilder;

    #[test]
    fn test_parse_header_and_actions() {
        let patch = PatchBuilder::new(8, 10)
            .metadata(b"<meta/>")
            .source_read(2)
            .target_read(b"xyz")
            .source_copy(3, -1)
            .target_copy(2, 4)
            .build_with_checksums(0, 0);

        let (header, actions) = parse(&patch).unwrap();
        assert_eq!(header.source_size, 8);
        assert_eq!(header.target_size, 10);
        assert_eq!(header.metadata, b"<meta/>");
        assert_eq!(header.metadata_length(), 7);
        assert_eq!(
            actions,
            vec![
                Action::SourceRead { length: 2 },
                Action::TargetRead { data: b"xyz" },
                Action::SourceCopy { length: 3, delta: -1 },
                Action::TargetCopy { length: 2, delta: 4 },
            ]
        );
    }

    #[test]
    fn test_no_actions() {
        let patch = PatchBuilder::new(0, 0).build_with_checksums(0, 0);
        let (_, actions) = parse(&patch).unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn test_bad_magic() {
        let mut patch = PatchBuilder::new(1, 1).source_read(1).build(b"a", b"a");
        patch[0] = b'X';
        assert_eq!(parse(&patch).unwrap_err(), FormatError::BadMagic);
        assert_eq!(parse(b"BP").unwrap_err(), FormatError::BadMagic);
    }

    #[test]
    fn test_bad_magic_looks_no_further() {
        // A four-byte slice with a wrong marker is rejected as BadMagic, not
        // as truncated.
        assert_eq!(PatchReader::new(b"UPS1").err(), Some(FormatError::BadMagic));
    }

    #[test]
    fn test_too_short_for_footer() {
        assert_eq!(
            PatchReader::new(b"BPS1\x80\x80\x80").err(),
            Some(FormatError::TruncatedInput)
        );
    }

    #[test]
    fn test_metadata_runs_into_footer() {
        let mut body = MAGIC.to_vec();
        body.extend_from_slice(&[0x80, 0x80, 0x90]); // 16 bytes of metadata
        body.extend_from_slice(&[0u8; FOOTER_LEN]);
        assert_eq!(PatchReader::new(&body).err(), Some(FormatError::TruncatedInput));
    }

    #[test]
    fn test_target_read_overshoots_footer() {
        // Declares 4 literal bytes but only 2 precede the footer.
        let patch = PatchBuilder::new(0, 4)
            .raw(&[0x8d, b'a', b'b'])
            .build_with_checksums(0, 0);
        let mut reader = PatchReader::new(&patch).unwrap();
        assert_eq!(reader.next(), Some(Err(FormatError::TrailingGarbage)));
        assert_eq!(reader.next(), None);
    }

    #[test]
    fn test_target_read_past_end_of_patch() {
        // 64 literal bytes cannot fit even counting the footer.
        let patch = PatchBuilder::new(0, 64)
            .raw(&[0x7d, 0x80])
            .build_with_checksums(0, 0);
        let mut reader = PatchReader::new(&patch).unwrap();
        assert_eq!(reader.next(), Some(Err(FormatError::TruncatedInput)));
    }

    #[test]
    fn test_copy_delta_runs_into_footer() {
        // SourceCopy of 1 byte whose delta has no end bit before the footer;
        // the first footer byte (0x80) terminates it.
        let mut patch = PatchBuilder::new(0, 1).raw(&[0x82, 0x00]).body();
        patch.extend_from_slice(&[0x80u8; FOOTER_LEN]);
        let mut reader = PatchReader::new(&patch).unwrap();
        assert_eq!(reader.next(), Some(Err(FormatError::TrailingGarbage)));
        assert_eq!(reader.next(), None);
    }

    #[test]
    fn test_streaming_matches_parse() {
        let patch = PatchBuilder::new(4, 6)
            .target_read(b"ab")
            .source_read(4)
            .build_with_checksums(0, 0);
        let reader = PatchReader::new(&patch).unwrap();
        assert_eq!(reader.body_end(), patch.len() - FOOTER_LEN);
        let streamed: Vec<_> = reader.map(Result::unwrap).collect();
        assert_eq!(streamed, parse(&patch).unwrap().1);
    }
}
