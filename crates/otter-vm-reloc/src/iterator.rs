//! Relocation iterator.
//!
//! Walks a stream from its highest index down, undoing the writer record by
//! record. Records outside the mode mask are decoded only as far as needed to
//! keep the running pc, id and position in step.

use std::iter::FusedIterator;

use crate::code::{Code, CodeDesc};
use crate::codec::{
    self, CHUNK_BITS, INT_SIZE, POINTER_SIZE, SMALL_PC_DELTA_BITS, ShortDataType, Tag,
};
use crate::info::RelocInfo;
use crate::mode::{LongPayload, ModeMask, RelocMode};

/// Forward cursor over a relocation stream.
///
/// Construction positions the cursor on the first wanted record. Use
/// [`done`](Self::done), [`rinfo`](Self::rinfo) and [`advance`](Self::advance),
/// or drive it as an [`Iterator`].
#[derive(Debug, Clone)]
pub struct RelocIterator<'a> {
    reloc: &'a [u8],
    pos: usize,
    mask: ModeMask,
    pc: usize,
    last_id: i32,
    last_position: i32,
    code_age_sequence: Option<usize>,
    rinfo: RelocInfo,
    done: bool,
}

impl<'a> RelocIterator<'a> {
    /// Iterate `reloc`, with the running pc starting at `pc_start`.
    pub fn new(reloc: &'a [u8], pc_start: usize, mask: ModeMask) -> Self {
        Self::with_code_age_sequence(reloc, pc_start, mask, None)
    }

    /// Iterate the records of an assembled descriptor. Pcs are offsets from
    /// the start of its instructions.
    pub fn for_desc(desc: &'a CodeDesc, mask: ModeMask) -> Self {
        Self::new(desc.reloc_info(), 0, mask)
    }

    /// Iterate the records of finished code. Pcs are absolute addresses, and
    /// an aged code-age sequence is reported after the last stored record.
    pub fn for_code(code: &'a Code, mask: ModeMask) -> Self {
        let sequence = code
            .code_age_sequence()
            .filter(|_| !code.is_young());
        Self::with_code_age_sequence(
            code.relocation_info(),
            code.instruction_start(),
            mask,
            sequence,
        )
    }

    fn with_code_age_sequence(
        reloc: &'a [u8],
        pc_start: usize,
        mask: ModeMask,
        code_age_sequence: Option<usize>,
    ) -> Self {
        let mut it = Self {
            reloc,
            pos: if mask.is_empty() { 0 } else { reloc.len() },
            mask,
            pc: pc_start,
            last_id: 0,
            last_position: 0,
            code_age_sequence,
            rinfo: RelocInfo::at(pc_start, RelocMode::None32),
            done: false,
        };
        it.next_record();
        it
    }

    /// Whether the stream is exhausted.
    #[inline]
    pub fn done(&self) -> bool {
        self.done
    }

    /// Current record. Only meaningful while not [`done`](Self::done).
    #[inline]
    pub fn rinfo(&self) -> &RelocInfo {
        debug_assert!(!self.done);
        &self.rinfo
    }

    /// Move to the next wanted record. No-op once exhausted.
    pub fn advance(&mut self) {
        if !self.done {
            self.next_record();
        }
    }

    #[inline]
    fn wants(&self, mode: RelocMode) -> bool {
        self.mask.contains(mode)
    }

    #[inline]
    fn wants_positions(&self) -> bool {
        self.mask.intersects(ModeMask::POSITIONS)
    }

    #[inline]
    fn emit(&mut self, mode: RelocMode, data: isize) {
        self.rinfo = RelocInfo::new(self.pc, mode, data);
    }

    #[inline]
    fn read_byte(&mut self) -> u8 {
        self.pos -= 1;
        self.reloc[self.pos]
    }

    #[inline]
    fn skip(&mut self, count: usize) {
        self.pos -= count;
    }

    fn read_int(&mut self) -> i32 {
        let mut bytes = [0u8; INT_SIZE];
        for byte in &mut bytes {
            *byte = self.read_byte();
        }
        i32::from_le_bytes(bytes)
    }

    fn read_data(&mut self) -> isize {
        let mut bytes = [0u8; POINTER_SIZE];
        for byte in &mut bytes {
            *byte = self.read_byte();
        }
        isize::from_le_bytes(bytes)
    }

    fn read_long_pc_jump(&mut self) {
        let mut pc_jump = 0u32;
        for i in 0..INT_SIZE as u32 {
            let (chunk, last) = codec::pc_jump_chunk_of(self.read_byte());
            pc_jump |= chunk << (i * CHUNK_BITS);
            if last {
                break;
            }
        }
        self.pc += (pc_jump as usize) << SMALL_PC_DELTA_BITS;
    }

    fn next_record(&mut self) {
        while self.pos > 0 {
            let byte = self.read_byte();
            match codec::tag_of(byte) {
                Tag::EmbeddedObject => {
                    self.pc += codec::short_pc_delta_of(byte) as usize;
                    if self.wants(RelocMode::EmbeddedObject) {
                        self.emit(RelocMode::EmbeddedObject, 0);
                        return;
                    }
                }
                Tag::CodeTarget => {
                    self.pc += codec::short_pc_delta_of(byte) as usize;
                    if self.wants(RelocMode::CodeTarget) {
                        self.emit(RelocMode::CodeTarget, 0);
                        return;
                    }
                }
                Tag::Locatable => {
                    self.pc += codec::short_pc_delta_of(byte) as usize;
                    let data_byte = self.read_byte();
                    if self.read_locatable(data_byte) {
                        return;
                    }
                }
                Tag::Default => {
                    let value = codec::long_mode_of(byte);
                    let Some(mode) = RelocMode::from_u8(value) else {
                        unreachable!("invalid relocation mode {value}");
                    };
                    if mode == RelocMode::PcJump {
                        self.read_long_pc_jump();
                        continue;
                    }
                    self.pc += self.read_byte() as usize;
                    if self.read_long_payload(mode) {
                        return;
                    }
                }
            }
        }

        if let Some(sequence) = self.code_age_sequence.take() {
            if self.wants(RelocMode::CodeAgeSequence) {
                self.rinfo = RelocInfo::at(sequence, RelocMode::CodeAgeSequence);
                return;
            }
        }
        self.done = true;
    }

    /// Decode the data byte of a locatable record. Returns whether a record
    /// was produced.
    fn read_locatable(&mut self, data_byte: u8) -> bool {
        match codec::short_data_type_of(data_byte) {
            ShortDataType::CodeWithId => {
                if self.wants(RelocMode::CodeTargetWithId) {
                    self.last_id = self
                        .last_id
                        .wrapping_add(codec::signed_short_data_of(data_byte));
                    self.emit(RelocMode::CodeTargetWithId, self.last_id as isize);
                    return true;
                }
            }
            ShortDataType::DeoptReason => {
                if self.wants(RelocMode::DeoptReason) {
                    let reason = codec::unsigned_short_data_of(data_byte);
                    self.emit(RelocMode::DeoptReason, reason as isize);
                    return true;
                }
            }
            data_type @ (ShortDataType::NonStatementPosition
            | ShortDataType::StatementPosition) => {
                // Both position modes share `last_position`.
                if self.wants_positions() {
                    self.last_position = self
                        .last_position
                        .wrapping_add(codec::signed_short_data_of(data_byte));
                    let mode = if data_type == ShortDataType::NonStatementPosition {
                        RelocMode::Position
                    } else {
                        RelocMode::StatementPosition
                    };
                    if self.wants(mode) {
                        self.emit(mode, self.last_position as isize);
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Decode the payload of a long record. Returns whether a record was
    /// produced.
    fn read_long_payload(&mut self, mode: RelocMode) -> bool {
        match mode {
            RelocMode::CodeTargetWithId => {
                if self.wants(mode) {
                    self.last_id = self.last_id.wrapping_add(self.read_int());
                    self.emit(mode, self.last_id as isize);
                    return true;
                }
                self.skip(INT_SIZE);
            }
            RelocMode::Position | RelocMode::StatementPosition => {
                if self.wants_positions() {
                    self.last_position = self.last_position.wrapping_add(self.read_int());
                    if self.wants(mode) {
                        self.emit(mode, self.last_position as isize);
                        return true;
                    }
                } else {
                    self.skip(INT_SIZE);
                }
            }
            _ => match mode.long_payload() {
                LongPayload::Pointer => {
                    if self.wants(mode) {
                        let data = self.read_data();
                        self.emit(mode, data);
                        return true;
                    }
                    self.skip(POINTER_SIZE);
                }
                LongPayload::Int => {
                    if self.wants(mode) {
                        let data = self.read_int();
                        self.emit(mode, data as isize);
                        return true;
                    }
                    self.skip(INT_SIZE);
                }
                LongPayload::None => {
                    if self.wants(mode) {
                        self.emit(mode, 0);
                        return true;
                    }
                }
            },
        }
        false
    }
}

impl Iterator for RelocIterator<'_> {
    type Item = RelocInfo;

    fn next(&mut self) -> Option<RelocInfo> {
        if self.done {
            return None;
        }
        let current = self.rinfo;
        self.next_record();
        Some(current)
    }
}

impl FusedIterator for RelocIterator<'_> {}
