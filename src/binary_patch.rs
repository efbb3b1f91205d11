//! Executes decoded actions against a source buffer.

use crate::error::ApplyError;
use crate::patch_format::{Action, ActionKind};

/// Rebuilds the target from the source one action at a time.
///
/// The output position is the length of the target written so far. The two
/// relative offsets live only as long as one applier.
pub struct Applier<'s> {
    source: &'s [u8],
    target: Vec<u8>,
    target_size: u64,
    source_relative_offset: i64,
    target_relative_offset: i64,
}

impl<'s> Applier<'s> {
    pub fn new(source: &'s [u8], target_size: u64) -> Result<Self, ApplyError> {
        let capacity =
            usize::try_from(target_size).map_err(|_| ApplyError::TargetTooLarge(target_size))?;
        let mut target = Vec::new();
        target
            .try_reserve_exact(capacity)
            .map_err(|_| ApplyError::TargetTooLarge(target_size))?;
        Ok(Self {
            source,
            target,
            target_size,
            source_relative_offset: 0,
            target_relative_offset: 0,
        })
    }

    pub fn output_position(&self) -> u64 {
        self.target.len() as u64
    }

    pub fn apply(&mut self, action: &Action<'_>) -> Result<(), ApplyError> {
        let output = self.output_position();
        let end = output
            .checked_add(action.length())
            .filter(|&end| end <= self.target_size)
            .ok_or(ApplyError::SizeMismatch {
                expected: self.target_size,
                actual: output.saturating_add(action.length()),
            })?;

        match *action {
            Action::SourceRead { .. } => {
                let data = slice(
                    self.source,
                    ActionKind::SourceRead,
                    output as i64,
                    end - output,
                )?;
                self.target.extend_from_slice(data);
            }
            Action::TargetRead { data } => {
                self.target.extend_from_slice(data);
            }
            Action::SourceCopy { length, delta } => {
                let start = shift(
                    self.source_relative_offset,
                    delta,
                    ActionKind::SourceCopy,
                    length,
                    self.source.len(),
                )?;
                let data = slice(self.source, ActionKind::SourceCopy, start, length)?;
                self.target.extend_from_slice(data);
                self.source_relative_offset = start + length as i64;
            }
            Action::TargetCopy { length, delta } => {
                let start = shift(
                    self.target_relative_offset,
                    delta,
                    ActionKind::TargetCopy,
                    length,
                    self.target.len(),
                )?;
                if start < 0 || start as u64 >= output {
                    return Err(out_of_bounds(ActionKind::TargetCopy, start, length, output));
                }
                // The read index trails the output position by a fixed gap,
                // so bytes written earlier in this same action become
                // readable in turn. This is what expands runs.
                let mut read = start as usize;
                for _ in 0..length {
                    let byte = self.target[read];
                    self.target.push(byte);
                    read += 1;
                }
                self.target_relative_offset = read as i64;
            }
        }
        Ok(())
    }

    /// Hand back the target once every action has been applied.
    pub fn finish(self) -> Result<Vec<u8>, ApplyError> {
        let actual = self.output_position();
        if actual != self.target_size {
            return Err(ApplyError::SizeMismatch {
                expected: self.target_size,
                actual,
            });
        }
        Ok(self.target)
    }
}

fn out_of_bounds(kind: ActionKind, start: i64, length: u64, len: u64) -> ApplyError {
    ApplyError::OutOfBounds {
        kind,
        start,
        end: start.saturating_add_unsigned(length),
        len,
    }
}

/// Move a relative offset by `delta`, rejecting overflow.
fn shift(
    offset: i64,
    delta: i64,
    kind: ActionKind,
    length: u64,
    len: usize,
) -> Result<i64, ApplyError> {
    offset
        .checked_add(delta)
        .ok_or_else(|| out_of_bounds(kind, offset, length, len as u64))
}

fn slice(buf: &[u8], kind: ActionKind, start: i64, length: u64) -> Result<&[u8], ApplyError> {
    usize::try_from(start)
        .ok()
        .zip(usize::try_from(length).ok())
        .and_then(|(start, length)| buf.get(start..start.checked_add(length)?))
        .ok_or_else(|| out_of_bounds(kind, start, length, buf.len() as u64))
}

/// Apply an already decoded action list, e.g. one produced by
/// [`parse`](crate::reader::parse).
pub fn apply_actions(
    source: &[u8],
    actions: &[Action<'_>],
    target_size: u64,
) -> Result<Vec<u8>, ApplyError> {
    let mut applier = Applier::new(source, target_size)?;
    for action in actions {
        applier.apply(action)?;
    }
    applier.finish()
}
