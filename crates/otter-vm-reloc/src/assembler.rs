//! Code buffer with relocation recording.
//!
//! [`CodeAssembler`] owns one arena per code object. Instruction bytes grow
//! forward from index 0, relocation bytes grow backward from the end, and the
//! arena is grown whenever the gap between the two cursors gets small.

use otter_vm_extref::ExternalReference;

use crate::code::CodeDesc;
use crate::error::{RelocError, Result};
use crate::info::{NO_POSITION, RelocInfo};
use crate::mode::RelocMode;
use crate::positions::PositionsRecorder;
use crate::writer::RelocInfoWriter;

/// Minimum free space between instructions and relocation info before the
/// arena grows.
pub const GAP: usize = 32;

/// Smallest arena the assembler allocates.
pub const MINIMAL_BUFFER_SIZE: usize = 4 * 1024;

/// Size above which the arena grows linearly instead of doubling.
const DOUBLING_LIMIT: usize = 1024 * 1024;

/// Assembler configuration
#[derive(Debug, Clone)]
pub struct AssemblerOptions {
    /// Initial arena size (default: 4KB)
    pub initial_buffer_size: usize,
    /// Largest arena the assembler may grow to (default: 256MB)
    pub max_buffer_size: usize,
    /// Record code comments
    pub code_comments: bool,
    /// Record deopt reasons for `--trace-deopt`
    pub trace_deopt: bool,
    /// Record deopt reasons for the CPU profiler
    pub is_profiling: bool,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        Self {
            initial_buffer_size: MINIMAL_BUFFER_SIZE,
            max_buffer_size: 256 * 1024 * 1024, // 256MB
            code_comments: false,
            trace_deopt: false,
            is_profiling: false,
        }
    }
}

/// Owner of the instruction and relocation cursors for one code object.
#[derive(Debug)]
pub struct CodeAssembler {
    options: AssemblerOptions,
    buffer: Vec<u8>,
    pc: usize,
    reloc: RelocInfoWriter,
    comments: Vec<String>,
    positions: PositionsRecorder,
}

impl CodeAssembler {
    /// Create an assembler with the given options.
    pub fn new(options: AssemblerOptions) -> Self {
        let size = options.initial_buffer_size.max(MINIMAL_BUFFER_SIZE);
        Self {
            buffer: vec![0; size],
            pc: 0,
            reloc: RelocInfoWriter::new(size),
            comments: Vec::new(),
            positions: PositionsRecorder::new(),
            options,
        }
    }

    /// Options in effect
    pub fn options(&self) -> &AssemblerOptions {
        &self.options
    }

    /// Offset of the next instruction byte.
    #[inline]
    pub fn pc_offset(&self) -> usize {
        self.pc
    }

    /// Free bytes between the two cursors.
    #[inline]
    pub fn buffer_space(&self) -> usize {
        self.reloc.pos() - self.pc
    }

    /// Relocation bytes written so far.
    #[inline]
    pub fn reloc_size(&self) -> usize {
        self.reloc.size(self.buffer.len())
    }

    /// Current arena size.
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Instruction bytes emitted so far, for patching.
    pub fn instructions_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..self.pc]
    }

    /// Position recorder
    pub fn positions(&self) -> &PositionsRecorder {
        &self.positions
    }

    /// Grow the arena if fewer than [`GAP`] bytes are free.
    pub fn ensure_space(&mut self) -> Result<()> {
        self.reserve(0)
    }

    fn reserve(&mut self, bytes: usize) -> Result<()> {
        while self.buffer_space() < bytes + GAP {
            self.grow_buffer()?;
        }
        Ok(())
    }

    fn grow_buffer(&mut self) -> Result<()> {
        let old_size = self.buffer.len();
        let new_size = if old_size < DOUBLING_LIMIT {
            old_size * 2
        } else {
            old_size + DOUBLING_LIMIT
        };
        if new_size > self.options.max_buffer_size {
            return Err(RelocError::BufferLimitExceeded {
                requested: new_size,
                limit: self.options.max_buffer_size,
            });
        }

        let reloc_size = self.reloc_size();
        let mut buffer = vec![0u8; new_size];
        buffer[..self.pc].copy_from_slice(&self.buffer[..self.pc]);
        buffer[new_size - reloc_size..].copy_from_slice(&self.buffer[old_size - reloc_size..]);
        self.buffer = buffer;
        let last_pc = self.reloc.last_pc();
        self.reloc.reposition(new_size - reloc_size, last_pc);

        tracing::debug!(
            target: "otter::reloc",
            old_size,
            new_size,
            pc_offset = self.pc,
            reloc_size,
            "grew code buffer"
        );
        Ok(())
    }

    /// Emit one byte.
    pub fn db(&mut self, value: u8) -> Result<()> {
        self.emit_bytes(&[value])
    }

    /// Emit a 32-bit value.
    pub fn dd(&mut self, value: u32) -> Result<()> {
        self.emit_bytes(&value.to_le_bytes())
    }

    /// Emit a 64-bit value.
    pub fn dq(&mut self, value: u64) -> Result<()> {
        self.emit_bytes(&value.to_le_bytes())
    }

    /// Emit a pointer-sized value.
    pub fn dp(&mut self, value: usize) -> Result<()> {
        self.emit_bytes(&value.to_le_bytes())
    }

    /// Emit already-encoded bytes.
    pub fn emit_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.reserve(bytes.len())?;
        self.buffer[self.pc..self.pc + bytes.len()].copy_from_slice(bytes);
        self.pc += bytes.len();
        Ok(())
    }

    /// Pad with zero bytes until the pc offset is a multiple of `m`.
    pub fn data_align(&mut self, m: usize) -> Result<()> {
        debug_assert!(m >= 2 && m.is_power_of_two());
        while self.pc & (m - 1) != 0 {
            self.db(0)?;
        }
        Ok(())
    }

    /// Record a relocation record at the current pc. No-relocation markers
    /// are dropped.
    pub fn record_reloc_info(&mut self, mode: RelocMode, data: isize) -> Result<()> {
        if mode.is_none() {
            return Ok(());
        }
        self.ensure_space()?;
        let rinfo = RelocInfo::new(self.pc, mode, data);
        self.reloc.write(&mut self.buffer, &rinfo);
        Ok(())
    }

    /// Record a code comment, if comments are enabled.
    pub fn record_comment(&mut self, text: impl Into<String>) -> Result<()> {
        if !self.options.code_comments {
            return Ok(());
        }
        let index = self.comments.len();
        self.comments.push(text.into());
        self.record_reloc_info(RelocMode::Comment, index as isize)
    }

    /// Record why the following code deoptimizes, if deopt tracing or
    /// profiling is on. An unknown position is recorded as 0.
    pub fn record_deopt_reason(&mut self, reason: u8, position: i32) -> Result<()> {
        if !(self.options.trace_deopt || self.options.is_profiling) {
            return Ok(());
        }
        let raw_position = if position == NO_POSITION { 0 } else { position };
        self.record_reloc_info(RelocMode::Position, raw_position as isize)?;
        self.record_reloc_info(RelocMode::DeoptReason, reason as isize)
    }

    /// Mark a generator resume point.
    pub fn record_generator_continuation(&mut self) -> Result<()> {
        self.record_reloc_info(RelocMode::GeneratorContinuation, 0)
    }

    /// Mark a debug break slot.
    pub fn record_debug_break_slot(&mut self, mode: RelocMode, call_argc: i32) -> Result<()> {
        debug_assert!(mode.is_debug_break_slot());
        self.record_reloc_info(mode, call_argc as isize)
    }

    /// Mark the start of a constant pool of `size` bytes.
    pub fn record_const_pool(&mut self, size: i32) -> Result<()> {
        self.record_reloc_info(RelocMode::ConstPool, size as isize)
    }

    /// Mark the start of a veneer pool of `size` bytes.
    pub fn record_veneer_pool(&mut self, size: i32) -> Result<()> {
        self.record_reloc_info(RelocMode::VeneerPool, size as isize)
    }

    /// Record and emit a pointer-sized external reference.
    pub fn emit_external_reference(&mut self, reference: ExternalReference) -> Result<()> {
        self.record_reloc_info(RelocMode::ExternalReference, 0)?;
        self.dp(reference.address())
    }

    /// Set the current source position.
    pub fn record_position(&mut self, pos: i32) {
        tracing::trace!(target: "otter::reloc", pc_offset = self.pc, pos, "position");
        self.positions.record_position(pos);
    }

    /// Set the current statement position.
    pub fn record_statement_position(&mut self, pos: i32) {
        tracing::trace!(target: "otter::reloc", pc_offset = self.pc, pos, "statement position");
        self.positions.record_statement_position(pos);
    }

    /// Record whatever positions changed since the last call. Returns whether
    /// anything was recorded.
    pub fn write_recorded_positions(&mut self) -> Result<bool> {
        let records = self.positions.take_unwritten();
        for &(mode, pos) in &records {
            self.record_reloc_info(mode, pos as isize)?;
        }
        Ok(!records.is_empty())
    }

    /// Finish the code object.
    pub fn get_code(mut self) -> Result<CodeDesc> {
        self.write_recorded_positions()?;
        self.ensure_space()?;
        self.reloc.finish(&mut self.buffer);

        let desc = CodeDesc {
            instr_size: self.pc,
            reloc_size: self.reloc_size(),
            comments: self.comments,
            buffer: self.buffer,
        };
        tracing::debug!(
            target: "otter::reloc",
            instr_size = desc.instr_size,
            reloc_size = desc.reloc_size,
            buffer_size = desc.buffer.len(),
            comments = desc.comments.len(),
            "finalized code descriptor"
        );
        Ok(desc)
    }
}

impl Default for CodeAssembler {
    fn default() -> Self {
        Self::new(AssemblerOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ModeMask;

    fn collect(desc: &CodeDesc) -> Vec<RelocInfo> {
        desc.relocation_iter(ModeMask::ALL).collect()
    }

    #[test]
    fn test_records_follow_pc() {
        let mut asm = CodeAssembler::default();
        asm.record_reloc_info(RelocMode::CodeTarget, 0).unwrap();
        asm.dd(0xdead_beef).unwrap();
        asm.record_reloc_info(RelocMode::EmbeddedObject, 0).unwrap();
        asm.dp(0).unwrap();
        let desc = asm.get_code().unwrap();
        assert_eq!(desc.instr_size, 4 + std::mem::size_of::<usize>());
        assert_eq!(
            collect(&desc),
            vec![
                RelocInfo::at(0, RelocMode::CodeTarget),
                RelocInfo::at(4, RelocMode::EmbeddedObject),
            ]
        );
    }

    #[test]
    fn test_none_modes_are_not_recorded() {
        let mut asm = CodeAssembler::default();
        asm.record_reloc_info(RelocMode::None32, 0).unwrap();
        asm.record_reloc_info(RelocMode::None64, 0).unwrap();
        assert_eq!(asm.reloc_size(), 0);
    }

    #[test]
    fn test_comments_gated_by_option() {
        let mut asm = CodeAssembler::default();
        asm.record_comment("ignored").unwrap();
        assert_eq!(asm.reloc_size(), 0);

        let mut asm = CodeAssembler::new(AssemblerOptions {
            code_comments: true,
            ..Default::default()
        });
        asm.record_comment("[ prologue").unwrap();
        asm.db(0x55).unwrap();
        asm.record_comment("]").unwrap();
        let desc = asm.get_code().unwrap();
        assert_eq!(desc.comments, vec!["[ prologue".to_string(), "]".to_string()]);
        assert_eq!(
            collect(&desc),
            vec![
                RelocInfo::new(0, RelocMode::Comment, 0),
                RelocInfo::new(1, RelocMode::Comment, 1),
            ]
        );
    }

    #[test]
    fn test_deopt_reason_records_position_first() {
        let mut asm = CodeAssembler::new(AssemblerOptions {
            trace_deopt: true,
            ..Default::default()
        });
        asm.record_deopt_reason(5, NO_POSITION).unwrap();
        asm.dd(0).unwrap();
        asm.record_deopt_reason(6, 77).unwrap();
        let desc = asm.get_code().unwrap();
        assert_eq!(
            collect(&desc),
            vec![
                RelocInfo::new(0, RelocMode::Position, 0),
                RelocInfo::new(0, RelocMode::DeoptReason, 5),
                RelocInfo::new(4, RelocMode::Position, 77),
                RelocInfo::new(4, RelocMode::DeoptReason, 6),
            ]
        );

        let mut quiet = CodeAssembler::default();
        quiet.record_deopt_reason(5, 3).unwrap();
        assert_eq!(quiet.reloc_size(), 0);
    }

    #[test]
    fn test_buffer_grows_and_keeps_relocations() {
        let mut asm = CodeAssembler::default();
        let initial = asm.buffer_size();
        for i in 0..2000u32 {
            asm.record_reloc_info(RelocMode::CodeTargetWithId, i as isize * 100)
                .unwrap();
            asm.dd(i).unwrap();
        }
        assert!(asm.buffer_size() > initial);
        let desc = asm.get_code().unwrap();
        let records = collect(&desc);
        assert_eq!(records.len(), 2000);
        for (i, rinfo) in records.iter().enumerate() {
            assert_eq!(rinfo.pc(), i * 4);
            assert_eq!(rinfo.data(), i as isize * 100);
        }
        assert_eq!(&desc.instructions()[4..8], &1u32.to_le_bytes());
    }

    #[test]
    fn test_buffer_limit() {
        let mut asm = CodeAssembler::new(AssemblerOptions {
            max_buffer_size: MINIMAL_BUFFER_SIZE,
            ..Default::default()
        });
        let result = asm.emit_bytes(&vec![0u8; MINIMAL_BUFFER_SIZE]);
        assert_eq!(
            result,
            Err(RelocError::BufferLimitExceeded {
                requested: 2 * MINIMAL_BUFFER_SIZE,
                limit: MINIMAL_BUFFER_SIZE,
            })
        );
    }

    #[test]
    fn test_data_align() {
        let mut asm = CodeAssembler::default();
        asm.db(1).unwrap();
        asm.data_align(8).unwrap();
        assert_eq!(asm.pc_offset(), 8);
        asm.data_align(8).unwrap();
        assert_eq!(asm.pc_offset(), 8);
    }

    #[test]
    fn test_recorded_positions() {
        let mut asm = CodeAssembler::default();
        asm.record_statement_position(10);
        asm.record_position(12);
        assert!(asm.write_recorded_positions().unwrap());
        assert!(!asm.write_recorded_positions().unwrap());
        asm.dd(0).unwrap();
        asm.record_position(40);
        let desc = asm.get_code().unwrap();
        assert_eq!(
            collect(&desc),
            vec![
                RelocInfo::new(0, RelocMode::StatementPosition, 10),
                RelocInfo::new(0, RelocMode::Position, 12),
                RelocInfo::new(4, RelocMode::Position, 40),
            ]
        );
    }

    #[test]
    fn test_external_reference_emits_address() {
        let mut asm = CodeAssembler::default();
        asm.emit_external_reference(ExternalReference::from_address(0x1234))
            .unwrap();
        let desc = asm.get_code().unwrap();
        assert_eq!(
            collect(&desc),
            vec![RelocInfo::at(0, RelocMode::ExternalReference)]
        );
        assert_eq!(desc.instructions(), &0x1234usize.to_le_bytes());
    }
}
