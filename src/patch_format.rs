//! On-disk layout of a BPS patch: magic, header, actions and footer.

use std::fmt;

pub const MAGIC: &[u8; 4] = b"BPS1";

/// Three little-endian CRC32 values close every patch.
pub const FOOTER_LEN: usize = 12;

/// Magic, three one-byte VLQs and the footer.
pub const MIN_PATCH_LEN: usize = MAGIC.len() + 3 + FOOTER_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header<'p> {
    pub source_size: u64,
    pub target_size: u64,
    /// Opaque to the patcher; commonly an XML or plain-text description.
    pub metadata: &'p [u8],
}

impl Header<'_> {
    pub fn metadata_length(&self) -> u64 {
        self.metadata.len() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub source_checksum: u32,
    pub target_checksum: u32,
    pub patch_checksum: u32,
}

impl Footer {
    /// Read the footer from the last [`FOOTER_LEN`] bytes of `patch`.
    pub fn from_patch(patch: &[u8]) -> Option<Self> {
        let (_, tail) = patch.split_last_chunk::<FOOTER_LEN>()?;
        let word = |i: usize| u32::from_le_bytes([tail[i], tail[i + 1], tail[i + 2], tail[i + 3]]);
        Some(Self {
            source_checksum: word(0),
            target_checksum: word(4),
            patch_checksum: word(8),
        })
    }
}

/// Command tag stored in the low two bits of every action word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    SourceRead = 0,
    TargetRead = 1,
    SourceCopy = 2,
    TargetCopy = 3,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::SourceRead,
        ActionKind::TargetRead,
        ActionKind::SourceCopy,
        ActionKind::TargetCopy,
    ];

    pub fn from_word(word: u64) -> Self {
        match word & 0b11 {
            0 => ActionKind::SourceRead,
            1 => ActionKind::TargetRead,
            2 => ActionKind::SourceCopy,
            _ => ActionKind::TargetCopy,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::SourceRead => "SourceRead",
            ActionKind::TargetRead => "TargetRead",
            ActionKind::SourceCopy => "SourceCopy",
            ActionKind::TargetCopy => "TargetCopy",
        };
        f.write_str(name)
    }
}

/// One decoded action. `TargetRead` borrows its literal bytes from the patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action<'p> {
    SourceRead { length: u64 },
    TargetRead { data: &'p [u8] },
    SourceCopy { length: u64, delta: i64 },
    TargetCopy { length: u64, delta: i64 },
}

impl Action<'_> {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::SourceRead { .. } => ActionKind::SourceRead,
            Action::TargetRead { .. } => ActionKind::TargetRead,
            Action::SourceCopy { .. } => ActionKind::SourceCopy,
            Action::TargetCopy { .. } => ActionKind::TargetCopy,
        }
    }

    /// Number of target bytes this action produces; always at least 1.
    pub fn length(&self) -> u64 {
        match self {
            Action::SourceRead { length }
            | Action::SourceCopy { length, .. }
            | Action::TargetCopy { length, .. } => *length,
            Action::TargetRead { data } => data.len() as u64,
        }
    }
}
