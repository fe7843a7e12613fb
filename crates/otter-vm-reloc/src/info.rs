//! Decoded relocation records.

use std::fmt;

use otter_vm_extref::ExternalReference;

use crate::code::CodeDesc;
use crate::error::VerifyError;
use crate::iterator::RelocIterator;
use crate::mode::{ModeMask, RelocMode};

/// Unknown source position.
pub const NO_POSITION: i32 = -1;

/// One relocation record: a mode, the pc it refers to, and mode-specific
/// data.
///
/// `data` holds the AST id for `CodeTargetWithId`, the absolute position for
/// position modes, the reason for `DeoptReason`, a comment-table index for
/// `Comment`, a size for pool markers and an argument count for
/// `DebugBreakSlotAtCall`. Other modes carry 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelocInfo {
    pc: usize,
    mode: RelocMode,
    data: isize,
}

impl RelocInfo {
    /// Create a record.
    pub const fn new(pc: usize, mode: RelocMode, data: isize) -> Self {
        Self { pc, mode, data }
    }

    /// Record without data.
    pub const fn at(pc: usize, mode: RelocMode) -> Self {
        Self { pc, mode, data: 0 }
    }

    /// Pc the record refers to.
    #[inline]
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Record mode
    #[inline]
    pub fn mode(&self) -> RelocMode {
        self.mode
    }

    /// Mode-specific data
    #[inline]
    pub fn data(&self) -> isize {
        self.data
    }

    /// Argument count recorded on a debug break slot at a call.
    pub fn debug_break_call_argument_count(data: isize) -> i32 {
        data as i32
    }

    /// Whether `desc` holds any record that would need patching after the
    /// code is placed: code targets, embedded objects, cells, or anything
    /// in [`ModeMask::APPLY`].
    pub fn requires_relocation(desc: &CodeDesc) -> bool {
        let mask = ModeMask::CODE_TARGETS
            | RelocMode::EmbeddedObject
            | RelocMode::Cell
            | ModeMask::APPLY;
        !RelocIterator::for_desc(desc, mask).done()
    }

    /// Write one disassembly line describing this record.
    pub fn print<H, W>(&self, host: &H, comments: &[String], out: &mut W) -> fmt::Result
    where
        H: RelocHost + ?Sized,
        W: fmt::Write,
    {
        write!(out, "{:#x}  {}", self.pc, self.mode.name())?;
        match self.mode {
            RelocMode::Comment => {
                let text = usize::try_from(self.data)
                    .ok()
                    .and_then(|i| comments.get(i))
                    .map_or("<missing comment>", String::as_str);
                write!(out, "  ({text})")?;
            }
            RelocMode::DeoptReason => match host.deopt_reason_name(self.data) {
                Some(name) => write!(out, "  ({name})")?,
                None => write!(out, "  ({})", self.data)?,
            },
            RelocMode::EmbeddedObject => {
                write!(out, "  ({})", host.describe_object(host.target_object(self)))?;
            }
            RelocMode::ExternalReference => {
                let reference = host.target_external_reference(self);
                let name = host
                    .external_reference_name(reference)
                    .unwrap_or_else(|| "<unknown>".to_string());
                write!(out, " ({name})  ({reference})")?;
            }
            mode if mode.is_code_target() => {
                let target = host.target_address(self);
                let kind = host.code_kind(target).unwrap_or("unknown");
                write!(out, " ({kind})  ({target:#x})")?;
                if mode == RelocMode::CodeTargetWithId {
                    write!(out, " (id={})", self.data as i32)?;
                }
            }
            mode if mode.is_position() => write!(out, "  ({})", self.data)?,
            RelocMode::RuntimeEntry => {
                if let Some(id) = host.deoptimization_id(host.target_address(self)) {
                    write!(out, "  (deoptimization bailout {id})")?;
                }
            }
            RelocMode::ConstPool => write!(out, " (size {})", self.data as i32)?,
            _ => {}
        }
        writeln!(out)
    }

    /// Check that the target of this record is consistent with the heap.
    pub fn verify<H: RelocHost + ?Sized>(&self, host: &H) -> Result<(), VerifyError> {
        use RelocMode::*;
        match self.mode {
            EmbeddedObject => self.verify_pointer(host, host.target_object(self)),
            Cell => self.verify_pointer(host, host.target_cell(self)),
            CodeTarget | CodeTargetWithId | ConstructCall | DebuggerStatement => {
                let target = host.target_address(self);
                if target == 0 {
                    return Err(VerifyError::NullTarget {
                        pc: self.pc,
                        mode: self.mode,
                    });
                }
                let code = host
                    .find_code_object(target)
                    .ok_or(VerifyError::CodeObjectNotFound { pc: self.pc, target })?;
                if code.instruction_start != target {
                    return Err(VerifyError::NotInstructionStart {
                        pc: self.pc,
                        target,
                        instruction_start: code.instruction_start,
                    });
                }
                Ok(())
            }
            InternalReference | InternalReferenceEncoded => {
                let target = host.target_internal_reference(self);
                let code = host
                    .find_code_object(self.pc)
                    .ok_or(VerifyError::HostCodeNotFound { pc: self.pc })?;
                if !code.contains_inclusive(target) {
                    return Err(VerifyError::InternalReferenceOutOfRange {
                        pc: self.pc,
                        target,
                        start: code.instruction_start,
                        end: code.instruction_end,
                    });
                }
                Ok(())
            }
            CodeAgeSequence => {
                if host.is_young_code_age_sequence(self.pc) || host.code_age_stub_is_code(self.pc)
                {
                    Ok(())
                } else {
                    Err(VerifyError::CodeAgeStubNotCode { pc: self.pc })
                }
            }
            RuntimeEntry
            | Comment
            | Position
            | StatementPosition
            | RelocMode::ExternalReference
            | DeoptReason
            | ConstPool
            | VeneerPool
            | DebugBreakSlotAtPosition
            | DebugBreakSlotAtReturn
            | DebugBreakSlotAtCall
            | DebugBreakSlotAtConstructCall
            | GeneratorContinuation
            | None32
            | None64 => Ok(()),
            PcJump => unreachable!("pc jump is never yielded"),
        }
    }

    fn verify_pointer<H: RelocHost + ?Sized>(
        &self,
        host: &H,
        target: usize,
    ) -> Result<(), VerifyError> {
        if target == 0 {
            return Err(VerifyError::NullTarget {
                pc: self.pc,
                mode: self.mode,
            });
        }
        if !host.is_heap_object(target) {
            return Err(VerifyError::NotHeapObject {
                pc: self.pc,
                mode: self.mode,
                target,
            });
        }
        Ok(())
    }
}

/// Instruction range of a code object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeRegion {
    /// First instruction byte
    pub instruction_start: usize,
    /// One past the last instruction byte
    pub instruction_end: usize,
}

impl CodeRegion {
    /// Whether `address` lies in `instruction_start..=instruction_end`.
    pub fn contains_inclusive(&self, address: usize) -> bool {
        (self.instruction_start..=self.instruction_end).contains(&address)
    }
}

/// Heap and code-space queries needed to print and verify records.
///
/// Decoding targets out of instructions is architecture specific, so the
/// owner of the code space answers those questions.
pub trait RelocHost {
    /// Call target of a code target or runtime entry record.
    fn target_address(&self, rinfo: &RelocInfo) -> usize;

    /// Object referenced by an embedded object record.
    fn target_object(&self, rinfo: &RelocInfo) -> usize;

    /// Cell referenced by a cell record.
    fn target_cell(&self, rinfo: &RelocInfo) -> usize;

    /// Address referenced by an internal reference record.
    fn target_internal_reference(&self, rinfo: &RelocInfo) -> usize;

    /// Address referenced by an external reference record.
    fn target_external_reference(&self, rinfo: &RelocInfo) -> ExternalReference;

    /// Code object containing `address`.
    fn find_code_object(&self, address: usize) -> Option<CodeRegion>;

    /// Whether `address` is a valid heap object.
    fn is_heap_object(&self, address: usize) -> bool;

    /// Whether the code age sequence at `pc` is young.
    fn is_young_code_age_sequence(&self, pc: usize) -> bool;

    /// Whether the age stub of the sequence at `pc` resolves to code.
    fn code_age_stub_is_code(&self, pc: usize) -> bool;

    /// Kind of the code object starting at `target`.
    fn code_kind(&self, _target: usize) -> Option<&'static str> {
        None
    }

    /// Short description of a heap object.
    fn describe_object(&self, address: usize) -> String {
        format!("{address:#x}")
    }

    /// Name of an external reference.
    fn external_reference_name(&self, _reference: ExternalReference) -> Option<String> {
        None
    }

    /// Name of a deopt reason.
    fn deopt_reason_name(&self, _reason: isize) -> Option<String> {
        None
    }

    /// Deoptimization id of an eager bailout entry.
    fn deoptimization_id(&self, _target: usize) -> Option<i32> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeHost;

    impl RelocHost for FakeHost {
        fn target_address(&self, rinfo: &RelocInfo) -> usize {
            rinfo.data() as usize
        }

        fn target_object(&self, rinfo: &RelocInfo) -> usize {
            rinfo.data() as usize
        }

        fn target_cell(&self, rinfo: &RelocInfo) -> usize {
            rinfo.data() as usize
        }

        fn target_internal_reference(&self, rinfo: &RelocInfo) -> usize {
            rinfo.data() as usize
        }

        fn target_external_reference(&self, rinfo: &RelocInfo) -> ExternalReference {
            ExternalReference::from_address(rinfo.data() as usize)
        }

        fn find_code_object(&self, address: usize) -> Option<CodeRegion> {
            let region = CodeRegion {
                instruction_start: 0x1000,
                instruction_end: 0x2000,
            };
            region.contains_inclusive(address).then_some(region)
        }

        fn is_heap_object(&self, address: usize) -> bool {
            address % 8 == 1
        }

        fn is_young_code_age_sequence(&self, pc: usize) -> bool {
            pc == 0x1000
        }

        fn code_age_stub_is_code(&self, _pc: usize) -> bool {
            false
        }

        fn code_kind(&self, _target: usize) -> Option<&'static str> {
            Some("STUB")
        }

        fn deoptimization_id(&self, target: usize) -> Option<i32> {
            (target == 0x3000).then_some(7)
        }
    }

    fn printed(rinfo: RelocInfo, comments: &[String]) -> String {
        let mut out = String::new();
        rinfo.print(&FakeHost, comments, &mut out).unwrap();
        out
    }

    #[test]
    fn test_print_formats() {
        let comments = vec!["-- prologue --".to_string()];
        assert_eq!(
            printed(RelocInfo::new(0x10, RelocMode::Comment, 0), &comments),
            "0x10  comment  (-- prologue --)\n"
        );
        assert_eq!(
            printed(RelocInfo::new(0x10, RelocMode::Position, 42), &[]),
            "0x10  position  (42)\n"
        );
        assert_eq!(
            printed(RelocInfo::new(0x10, RelocMode::CodeTargetWithId, 0x1000), &[]),
            "0x10  code target with id (STUB)  (0x1000) (id=4096)\n"
        );
        assert_eq!(
            printed(RelocInfo::new(0x10, RelocMode::ConstPool, 64), &[]),
            "0x10  constant pool (size 64)\n"
        );
        assert_eq!(
            printed(RelocInfo::new(0x10, RelocMode::RuntimeEntry, 0x3000), &[]),
            "0x10  runtime entry  (deoptimization bailout 7)\n"
        );
        assert_eq!(
            printed(RelocInfo::new(0x10, RelocMode::ExternalReference, 0x20), &[]),
            "0x10  external reference (<unknown>)  (0x20)\n"
        );
    }

    #[test]
    fn test_verify_embedded_object() {
        assert!(RelocInfo::new(0, RelocMode::EmbeddedObject, 0x41).verify(&FakeHost).is_ok());
        assert_eq!(
            RelocInfo::new(0, RelocMode::EmbeddedObject, 0).verify(&FakeHost),
            Err(VerifyError::NullTarget {
                pc: 0,
                mode: RelocMode::EmbeddedObject
            })
        );
        assert!(matches!(
            RelocInfo::new(0, RelocMode::Cell, 0x40).verify(&FakeHost),
            Err(VerifyError::NotHeapObject { .. })
        ));
    }

    #[test]
    fn test_verify_code_target() {
        assert!(RelocInfo::new(0, RelocMode::CodeTarget, 0x1000).verify(&FakeHost).is_ok());
        assert!(matches!(
            RelocInfo::new(0, RelocMode::ConstructCall, 0x1004).verify(&FakeHost),
            Err(VerifyError::NotInstructionStart { .. })
        ));
        assert!(matches!(
            RelocInfo::new(0, RelocMode::CodeTarget, 0x9000).verify(&FakeHost),
            Err(VerifyError::CodeObjectNotFound { .. })
        ));
    }

    #[test]
    fn test_verify_internal_reference() {
        assert!(
            RelocInfo::new(0x1010, RelocMode::InternalReference, 0x2000)
                .verify(&FakeHost)
                .is_ok()
        );
        assert!(matches!(
            RelocInfo::new(0x1010, RelocMode::InternalReferenceEncoded, 0x2001).verify(&FakeHost),
            Err(VerifyError::InternalReferenceOutOfRange { .. })
        ));
        assert_eq!(
            RelocInfo::new(0x10, RelocMode::InternalReference, 0x1000).verify(&FakeHost),
            Err(VerifyError::HostCodeNotFound { pc: 0x10 })
        );
    }

    #[test]
    fn test_verify_code_age_sequence() {
        assert!(RelocInfo::at(0x1000, RelocMode::CodeAgeSequence).verify(&FakeHost).is_ok());
        assert_eq!(
            RelocInfo::at(0x1100, RelocMode::CodeAgeSequence).verify(&FakeHost),
            Err(VerifyError::CodeAgeStubNotCode { pc: 0x1100 })
        );
    }

    #[test]
    fn test_verify_ignores_markers() {
        for mode in [
            RelocMode::Comment,
            RelocMode::DeoptReason,
            RelocMode::VeneerPool,
            RelocMode::None64,
        ] {
            assert!(RelocInfo::at(0, mode).verify(&FakeHost).is_ok());
        }
    }

    #[test]
    fn test_debug_break_call_argument_count() {
        assert_eq!(RelocInfo::debug_break_call_argument_count(3), 3);
    }
}
