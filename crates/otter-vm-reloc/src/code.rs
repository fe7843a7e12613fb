//! Assembled and finished code containers.

use std::fmt;

use crate::error::VerifyError;
use crate::info::{CodeRegion, RelocHost, RelocInfo};
use crate::iterator::RelocIterator;
use crate::mode::ModeMask;

/// Output of the assembler: the whole arena with instructions at the front
/// and relocation info at the back.
#[derive(Debug, Clone, Default)]
pub struct CodeDesc {
    /// The arena
    pub buffer: Vec<u8>,
    /// Bytes of instructions at the front of `buffer`
    pub instr_size: usize,
    /// Bytes of relocation info at the back of `buffer`
    pub reloc_size: usize,
    /// Comment table indexed by `Comment` records
    pub comments: Vec<String>,
}

impl CodeDesc {
    /// Size of the arena.
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Instruction bytes.
    pub fn instructions(&self) -> &[u8] {
        &self.buffer[..self.instr_size]
    }

    /// Relocation bytes.
    pub fn reloc_info(&self) -> &[u8] {
        &self.buffer[self.buffer.len() - self.reloc_size..]
    }

    /// Records of this descriptor, pcs relative to the first instruction.
    pub fn relocation_iter(&self, mask: ModeMask) -> RelocIterator<'_> {
        RelocIterator::for_desc(self, mask)
    }
}

/// Code age marker of a finished code object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeAge {
    /// Offset of the age sequence from the first instruction
    pub offset: usize,
    /// Whether the sequence is still in its young state
    pub is_young: bool,
}

/// Finished, immutable code: instructions, their relocation info, and the
/// comment table the `Comment` records index into.
#[derive(Debug, Clone)]
pub struct Code {
    instructions: Box<[u8]>,
    reloc_info: Box<[u8]>,
    comments: Vec<String>,
    code_age: Option<CodeAge>,
}

impl Code {
    /// Trim a descriptor into finished code.
    pub fn from_desc(desc: &CodeDesc) -> Self {
        Self {
            instructions: desc.instructions().into(),
            reloc_info: desc.reloc_info().into(),
            comments: desc.comments.clone(),
            code_age: None,
        }
    }

    /// Attach a code age sequence at `offset`.
    pub fn with_code_age(mut self, offset: usize, is_young: bool) -> Self {
        debug_assert!(offset < self.instructions.len().max(1));
        self.code_age = Some(CodeAge { offset, is_young });
        self
    }

    /// Address of the first instruction.
    pub fn instruction_start(&self) -> usize {
        self.instructions.as_ptr() as usize
    }

    /// Address one past the last instruction.
    pub fn instruction_end(&self) -> usize {
        self.instruction_start() + self.instructions.len()
    }

    /// Instruction bytes.
    pub fn instructions(&self) -> &[u8] {
        &self.instructions
    }

    /// Relocation bytes.
    pub fn relocation_info(&self) -> &[u8] {
        &self.reloc_info
    }

    /// Comment table
    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    /// Instruction range of this code.
    pub fn region(&self) -> CodeRegion {
        CodeRegion {
            instruction_start: self.instruction_start(),
            instruction_end: self.instruction_end(),
        }
    }

    /// Address of the code age sequence, if any.
    pub fn code_age_sequence(&self) -> Option<usize> {
        self.code_age
            .map(|age| self.instruction_start() + age.offset)
    }

    /// Whether the code age sequence is young. Code without one counts as
    /// young.
    pub fn is_young(&self) -> bool {
        self.code_age.is_none_or(|age| age.is_young)
    }

    /// Records of this code, pcs as absolute addresses.
    pub fn relocation_iter(&self, mask: ModeMask) -> RelocIterator<'_> {
        RelocIterator::for_code(self, mask)
    }

    /// Whether any record would need patching once the code moves.
    pub fn requires_relocation(&self) -> bool {
        let mask = ModeMask::CODE_TARGETS | ModeMask::GC_RELOC | ModeMask::APPLY;
        !self.relocation_iter(mask).done()
    }

    /// Write one disassembly line per record.
    pub fn print_relocations<H, W>(&self, host: &H, out: &mut W) -> fmt::Result
    where
        H: RelocHost + ?Sized,
        W: fmt::Write,
    {
        for rinfo in self.relocation_iter(ModeMask::ALL) {
            rinfo.print(host, &self.comments, out)?;
        }
        Ok(())
    }

    /// Verify every record, stopping at the first failure.
    pub fn verify_relocations<H: RelocHost + ?Sized>(&self, host: &H) -> Result<(), VerifyError> {
        self.relocation_iter(ModeMask::ALL)
            .try_for_each(|rinfo: RelocInfo| rinfo.verify(host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::RelocMode;
    use crate::writer::RelocInfoWriter;

    fn desc_with(records: &[RelocInfo], instr_size: usize) -> CodeDesc {
        let reloc = RelocInfoWriter::encode(records);
        let mut buffer = vec![0x90u8; instr_size];
        buffer.extend_from_slice(&reloc);
        CodeDesc {
            buffer,
            instr_size,
            reloc_size: reloc.len(),
            comments: Vec::new(),
        }
    }

    #[test]
    fn test_code_pcs_are_absolute() {
        let desc = desc_with(&[RelocInfo::at(8, RelocMode::CodeTarget)], 16);
        let code = Code::from_desc(&desc);
        let records: Vec<_> = code.relocation_iter(ModeMask::ALL).collect();
        assert_eq!(
            records,
            vec![RelocInfo::at(code.instruction_start() + 8, RelocMode::CodeTarget)]
        );
        let relative: Vec<_> = desc.relocation_iter(ModeMask::ALL).collect();
        assert_eq!(relative, vec![RelocInfo::at(8, RelocMode::CodeTarget)]);
    }

    #[test]
    fn test_aged_code_reports_code_age_sequence_last() {
        let desc = desc_with(&[RelocInfo::at(8, RelocMode::CodeTarget)], 16);
        let code = Code::from_desc(&desc).with_code_age(4, false);
        let records: Vec<_> = code.relocation_iter(ModeMask::ALL).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[1],
            RelocInfo::at(code.instruction_start() + 4, RelocMode::CodeAgeSequence)
        );
        assert!(code.requires_relocation());
    }

    #[test]
    fn test_young_code_hides_code_age_sequence() {
        let desc = desc_with(&[RelocInfo::new(0, RelocMode::Position, 3)], 16);
        let code = Code::from_desc(&desc).with_code_age(0, true);
        assert_eq!(code.relocation_iter(ModeMask::APPLY).count(), 0);
        assert!(!code.requires_relocation());
    }

    #[test]
    fn test_aged_code_requires_relocation_without_records() {
        let desc = desc_with(&[], 16);
        let code = Code::from_desc(&desc).with_code_age(0, false);
        assert!(code.requires_relocation());
    }
}
