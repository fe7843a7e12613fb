//! Relocation writer.
//!
//! Records are written back to front: the writer starts at the end of its
//! region and every byte goes to the next lower index. Reading from the end
//! downward therefore visits records in the order they were written, which is
//! pc order.

use crate::codec::{
    self, CHUNK_BITS, LAST_CHUNK_TAG, POINTER_SIZE, SHORT_DATA_BITS,
    SMALL_PC_DELTA_BITS, SMALL_PC_DELTA_MASK, ShortDataType, Tag,
};
use crate::info::RelocInfo;
use crate::mode::{LongPayload, RelocMode};

/// Position record held back so later positions at the same pc merge into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingPosition {
    pc_delta: u32,
    pos_delta: i32,
}

/// Encoder for a backward-growing relocation stream.
///
/// The writer owns only its cursor and running state. The bytes live in an
/// arena owned by the caller and borrowed on every call, so the arena can be
/// grown and moved between writes (see [`RelocInfoWriter::reposition`]).
#[derive(Debug, Clone, Copy)]
pub struct RelocInfoWriter {
    pos: usize,
    last_pc: usize,
    last_id: i32,
    last_position: i32,
    last_mode: Option<RelocMode>,
    pending: Option<PendingPosition>,
}

impl RelocInfoWriter {
    /// Upper bound on the bytes of one record: pc-jump mode byte, four jump
    /// chunks, mode byte, pc byte and a pointer-sized payload.
    pub const MAX_SIZE: usize = 1 + 4 + 1 + 1 + POINTER_SIZE;

    /// Writer whose first byte lands just below index `end`.
    pub fn new(end: usize) -> Self {
        Self {
            pos: end,
            last_pc: 0,
            last_id: 0,
            last_position: 0,
            last_mode: None,
            pending: None,
        }
    }

    /// Index of the lowest byte written so far.
    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Pc of the last record written.
    #[inline]
    pub fn last_pc(&self) -> usize {
        self.last_pc
    }

    /// Move the cursor after the arena was resized.
    pub fn reposition(&mut self, pos: usize, last_pc: usize) {
        self.pos = pos;
        self.last_pc = last_pc;
    }

    /// Bytes written so far, for a stream ending at `end`.
    #[inline]
    pub fn size(&self, end: usize) -> usize {
        end - self.pos
    }

    /// Size the stream ending at `end` will have once [`finish`] runs.
    ///
    /// [`finish`]: RelocInfoWriter::finish
    pub fn finished_size(&self, end: usize) -> usize {
        let mut scratch = [0u8; Self::MAX_SIZE];
        let mut probe = *self;
        probe.pos = Self::MAX_SIZE;
        probe.flush_position(&mut scratch);
        self.size(end) + (Self::MAX_SIZE - probe.pos)
    }

    /// Flush the pending position record. The stream is complete afterwards.
    pub fn finish(&mut self, buffer: &mut [u8]) {
        self.flush_position(buffer);
    }

    /// Append one record.
    ///
    /// Records must arrive in non-decreasing pc order, with a mode that can
    /// appear in a stream.
    pub fn write(&mut self, buffer: &mut [u8], rinfo: &RelocInfo) {
        let mode = rinfo.mode();
        if mode != RelocMode::Position {
            self.flush_position(buffer);
        }
        let begin_pos = self.pos;

        debug_assert!(mode.is_writable(), "mode {mode:?} cannot be encoded");
        debug_assert!(rinfo.pc() >= self.last_pc, "pc went backwards");
        debug_assert!(u32::try_from(rinfo.pc() - self.last_pc).is_ok());
        let pc_delta = (rinfo.pc() - self.last_pc) as u32;

        match mode {
            RelocMode::EmbeddedObject => {
                self.write_short_tagged_pc(buffer, pc_delta, Tag::EmbeddedObject);
            }
            RelocMode::CodeTarget => {
                self.write_short_tagged_pc(buffer, pc_delta, Tag::CodeTarget);
            }
            RelocMode::CodeTargetWithId => {
                let id = Self::int_data(rinfo);
                let id_delta = id.wrapping_sub(self.last_id);
                if codec::fits_signed(i64::from(id_delta), SHORT_DATA_BITS) {
                    self.write_short_tagged_pc(buffer, pc_delta, Tag::Locatable);
                    self.put(
                        buffer,
                        codec::short_tagged_data(id_delta, ShortDataType::CodeWithId),
                    );
                } else {
                    self.write_mode_and_pc(buffer, pc_delta, mode);
                    self.write_int_data(buffer, id_delta);
                }
                self.last_id = id;
            }
            RelocMode::DeoptReason => {
                debug_assert!(
                    codec::fits_unsigned(rinfo.data() as i64, SHORT_DATA_BITS),
                    "deopt reason {} does not fit",
                    rinfo.data()
                );
                self.write_short_tagged_pc(buffer, pc_delta, Tag::Locatable);
                self.put(
                    buffer,
                    codec::short_tagged_data(rinfo.data() as i32, ShortDataType::DeoptReason),
                );
            }
            RelocMode::Position | RelocMode::StatementPosition => {
                let position = Self::int_data(rinfo);
                let pos_delta = position.wrapping_sub(self.last_position);
                if mode == RelocMode::StatementPosition {
                    self.write_position(buffer, pc_delta, pos_delta, mode);
                } else if pc_delta != 0 || self.last_mode != Some(RelocMode::Position) {
                    self.flush_position(buffer);
                    self.pending = Some(PendingPosition {
                        pc_delta,
                        pos_delta,
                    });
                } else {
                    let pending = self.pending.get_or_insert(PendingPosition {
                        pc_delta: 0,
                        pos_delta: 0,
                    });
                    pending.pos_delta = pending.pos_delta.wrapping_add(pos_delta);
                }
                self.last_position = position;
            }
            _ => {
                self.write_mode_and_pc(buffer, pc_delta, mode);
                match mode.long_payload() {
                    LongPayload::Pointer => self.write_data(buffer, rinfo.data()),
                    LongPayload::Int => self.write_int_data(buffer, rinfo.data() as i32),
                    LongPayload::None => {}
                }
            }
        }

        self.last_pc = rinfo.pc();
        self.last_mode = Some(mode);
        debug_assert!(begin_pos - self.pos <= Self::MAX_SIZE);
    }

    fn int_data(rinfo: &RelocInfo) -> i32 {
        debug_assert!(
            i32::try_from(rinfo.data()).is_ok(),
            "{} data {} does not fit 32 bits",
            rinfo.mode(),
            rinfo.data()
        );
        rinfo.data() as i32
    }

    #[inline]
    fn put(&mut self, buffer: &mut [u8], byte: u8) {
        self.pos -= 1;
        buffer[self.pos] = byte;
    }

    fn write_mode(&mut self, buffer: &mut [u8], mode: RelocMode) {
        self.put(buffer, codec::long_mode_byte(mode as u8));
    }

    /// Emit a pc jump for the bits of `pc_delta` above the low six and
    /// return what is left.
    fn write_long_pc_jump(&mut self, buffer: &mut [u8], pc_delta: u32) -> u32 {
        if codec::fits_unsigned(i64::from(pc_delta), SMALL_PC_DELTA_BITS) {
            return pc_delta;
        }
        self.write_mode(buffer, RelocMode::PcJump);
        let mut pc_jump = pc_delta >> SMALL_PC_DELTA_BITS;
        debug_assert!(pc_jump > 0);
        while pc_jump > 0 {
            self.put(buffer, codec::pc_jump_chunk(pc_jump));
            pc_jump >>= CHUNK_BITS;
        }
        buffer[self.pos] |= LAST_CHUNK_TAG;
        pc_delta & SMALL_PC_DELTA_MASK
    }

    fn write_short_tagged_pc(&mut self, buffer: &mut [u8], pc_delta: u32, tag: Tag) {
        let pc_delta = self.write_long_pc_jump(buffer, pc_delta);
        self.put(buffer, codec::short_tagged_pc(pc_delta, tag));
    }

    fn write_mode_and_pc(&mut self, buffer: &mut [u8], pc_delta: u32, mode: RelocMode) {
        let pc_delta = self.write_long_pc_jump(buffer, pc_delta);
        self.write_mode(buffer, mode);
        self.put(buffer, pc_delta as u8);
    }

    fn write_int_data(&mut self, buffer: &mut [u8], value: i32) {
        for byte in value.to_le_bytes() {
            self.put(buffer, byte);
        }
    }

    fn write_data(&mut self, buffer: &mut [u8], value: isize) {
        for byte in value.to_le_bytes() {
            self.put(buffer, byte);
        }
    }

    fn write_position(
        &mut self,
        buffer: &mut [u8],
        pc_delta: u32,
        pos_delta: i32,
        mode: RelocMode,
    ) {
        let data_type = if mode == RelocMode::Position {
            ShortDataType::NonStatementPosition
        } else {
            ShortDataType::StatementPosition
        };
        if codec::fits_signed(i64::from(pos_delta), SHORT_DATA_BITS) {
            self.write_short_tagged_pc(buffer, pc_delta, Tag::Locatable);
            self.put(buffer, codec::short_tagged_data(pos_delta, data_type));
        } else {
            self.write_mode_and_pc(buffer, pc_delta, mode);
            self.write_int_data(buffer, pos_delta);
        }
    }

    fn flush_position(&mut self, buffer: &mut [u8]) {
        if let Some(pending) = self.pending.take() {
            self.write_position(
                buffer,
                pending.pc_delta,
                pending.pos_delta,
                RelocMode::Position,
            );
        }
    }

    /// Encode `records` into a fresh, finished stream.
    pub fn encode(records: &[RelocInfo]) -> Vec<u8> {
        let capacity = (records.len() + 1) * Self::MAX_SIZE;
        let mut buffer = vec![0u8; capacity];
        let mut writer = Self::new(capacity);
        for rinfo in records {
            writer.write(&mut buffer, rinfo);
        }
        writer.finish(&mut buffer);
        buffer.split_off(writer.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::INT_SIZE;

    #[test]
    fn test_short_code_target_is_one_byte() {
        let bytes = RelocInfoWriter::encode(&[RelocInfo::at(63, RelocMode::CodeTarget)]);
        assert_eq!(bytes, vec![(63 << 2) | 1]);
    }

    #[test]
    fn test_pc_jump_layout() {
        // 64 = 1 << 6: one jump chunk carrying 1, then a short byte with 0.
        let bytes = RelocInfoWriter::encode(&[RelocInfo::at(64, RelocMode::EmbeddedObject)]);
        // Read order is from the end: mode byte, chunk, short byte.
        let expected_read_order = vec![
            codec::long_mode_byte(RelocMode::PcJump as u8),
            (1 << 1) | LAST_CHUNK_TAG,
            0,
        ];
        let read_order: Vec<u8> = bytes.iter().rev().copied().collect();
        assert_eq!(read_order, expected_read_order);
    }

    #[test]
    fn test_positions_at_same_pc_merge() {
        let bytes = RelocInfoWriter::encode(&[
            RelocInfo::new(4, RelocMode::Position, 10),
            RelocInfo::new(4, RelocMode::Position, 12),
        ]);
        // One locatable record: pc byte and data byte.
        assert_eq!(bytes.len(), 2);
    }

    #[test]
    fn test_finished_size_matches_finish() {
        let mut buffer = vec![0u8; 64];
        let mut writer = RelocInfoWriter::new(64);
        writer.write(&mut buffer, &RelocInfo::at(0, RelocMode::CodeTarget));
        writer.write(&mut buffer, &RelocInfo::new(8, RelocMode::Position, 1000));
        assert_eq!(writer.size(64), 1);
        let predicted = writer.finished_size(64);
        writer.finish(&mut buffer);
        assert_eq!(writer.size(64), predicted);
        // Idempotent once flushed.
        writer.finish(&mut buffer);
        assert_eq!(writer.size(64), predicted);
    }

    #[test]
    fn test_long_id_delta_uses_int_payload() {
        let bytes = RelocInfoWriter::encode(&[RelocInfo::new(0, RelocMode::CodeTargetWithId, 32)]);
        assert_eq!(bytes.len(), 1 + 1 + INT_SIZE);
        let bytes = RelocInfoWriter::encode(&[RelocInfo::new(0, RelocMode::CodeTargetWithId, 31)]);
        assert_eq!(bytes.len(), 2);
    }

    #[test]
    fn test_comment_carries_pointer_payload() {
        let bytes = RelocInfoWriter::encode(&[RelocInfo::new(0, RelocMode::Comment, 3)]);
        assert_eq!(bytes.len(), 2 + POINTER_SIZE);
        let bytes = RelocInfoWriter::encode(&[RelocInfo::at(0, RelocMode::RuntimeEntry)]);
        assert_eq!(bytes.len(), 2);
    }

    #[test]
    fn test_max_size_bounds_largest_record() {
        let bytes = RelocInfoWriter::encode(&[RelocInfo::new(
            u32::MAX as usize,
            RelocMode::Comment,
            isize::MIN,
        )]);
        assert_eq!(bytes.len(), RelocInfoWriter::MAX_SIZE);
    }
}
