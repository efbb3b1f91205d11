//! Serialises hand-written action lists into complete patches for tests.

use crate::checksum::crc32;
use crate::patch_format::{ActionKind, MAGIC};
use crate::vlq;

pub struct PatchBuilder {
    source_size: u64,
    target_size: u64,
    metadata: Vec<u8>,
    actions: Vec<u8>,
}

impl PatchBuilder {
    pub fn new(source_size: u64, target_size: u64) -> Self {
        Self {
            source_size,
            target_size,
            metadata: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn metadata(mut self, metadata: &[u8]) -> Self {
        self.metadata = metadata.to_vec();
        self
    }

    fn word(&mut self, kind: ActionKind, length: u64) {
        vlq::encode(((length - 1) << 2) | kind as u64, &mut self.actions);
    }

    pub fn source_read(mut self, length: u64) -> Self {
        self.word(ActionKind::SourceRead, length);
        self
    }

    pub fn target_read(mut self, data: &[u8]) -> Self {
        self.word(ActionKind::TargetRead, data.len() as u64);
        self.actions.extend_from_slice(data);
        self
    }

    pub fn source_copy(mut self, length: u64, delta: i64) -> Self {
        self.word(ActionKind::SourceCopy, length);
        vlq::encode_signed(delta, &mut self.actions);
        self
    }

    pub fn target_copy(mut self, length: u64, delta: i64) -> Self {
        self.word(ActionKind::TargetCopy, length);
        vlq::encode_signed(delta, &mut self.actions);
        self
    }

    /// Append bytes verbatim to the action stream.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.actions.extend_from_slice(bytes);
        self
    }

    /// Everything before the footer.
    pub fn body(&self) -> Vec<u8> {
        let mut out = MAGIC.to_vec();
        vlq::encode(self.source_size, &mut out);
        vlq::encode(self.target_size, &mut out);
        vlq::encode(self.metadata.len() as u64, &mut out);
        out.extend_from_slice(&self.metadata);
        out.extend_from_slice(&self.actions);
        out
    }

    pub fn build_with_checksums(&self, source_checksum: u32, target_checksum: u32) -> Vec<u8> {
        let mut out = self.body();
        out.extend_from_slice(&source_checksum.to_le_bytes());
        out.extend_from_slice(&target_checksum.to_le_bytes());
        let patch_checksum = crc32(&out);
        out.extend_from_slice(&patch_checksum.to_le_bytes());
        out
    }

    pub fn build(&self, source: &[u8], target: &[u8]) -> Vec<u8> {
        self.build_with_checksums(crc32(source), crc32(target))
    }
}
