//! Relocation errors

use thiserror::Error;

use crate::mode::RelocMode;

/// Errors that can occur while assembling or finalizing relocated code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelocError {
    /// Growing the code buffer would exceed the configured maximum
    #[error("Code buffer limit exceeded: requested {requested} bytes, limit {limit}")]
    BufferLimitExceeded {
        /// Requested buffer size
        requested: usize,
        /// Configured maximum
        limit: usize,
    },

    /// A relocation record failed verification
    #[error("Relocation verification failed: {0}")]
    Verify(#[from] VerifyError),
}

/// A relocation record whose target is inconsistent with the heap
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// Pointer-carrying record with a null target
    #[error("{mode} at {pc:#x} has a null target")]
    NullTarget {
        /// Record pc
        pc: usize,
        /// Record mode
        mode: RelocMode,
    },

    /// Embedded object or cell that is not a valid heap object
    #[error("{mode} at {pc:#x} targets {target:#x}, which is not a heap object")]
    NotHeapObject {
        /// Record pc
        pc: usize,
        /// Record mode
        mode: RelocMode,
        /// Target address
        target: usize,
    },

    /// Code target that no code object contains
    #[error("Code target at {pc:#x} points at {target:#x}, outside any code object")]
    CodeObjectNotFound {
        /// Record pc
        pc: usize,
        /// Target address
        target: usize,
    },

    /// Code target pointing inside a code object instead of at its start
    #[error("Code target at {pc:#x} points at {target:#x}, expected instruction start {instruction_start:#x}")]
    NotInstructionStart {
        /// Record pc
        pc: usize,
        /// Target address
        target: usize,
        /// Instruction start of the containing code object
        instruction_start: usize,
    },

    /// Internal reference whose host code object cannot be found
    #[error("Internal reference at {pc:#x} is not inside a code object")]
    HostCodeNotFound {
        /// Record pc
        pc: usize,
    },

    /// Internal reference leaving its code object
    #[error("Internal reference at {pc:#x} targets {target:#x}, outside {start:#x}..={end:#x}")]
    InternalReferenceOutOfRange {
        /// Record pc
        pc: usize,
        /// Target address
        target: usize,
        /// Instruction start of the host code object
        start: usize,
        /// Instruction end of the host code object
        end: usize,
    },

    /// Aged code whose age stub is not code
    #[error("Code age sequence at {pc:#x} is old but its age stub is not code")]
    CodeAgeStubNotCode {
        /// Record pc
        pc: usize,
    },
}

/// Result type for relocation operations
pub type Result<T> = std::result::Result<T, RelocError>;
