//! Relocation modes and mode masks.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Kind of a relocation record.
///
/// The declaration order is part of the encoding: code targets come first so
/// `mode <= DebuggerStatement` selects them, and every mode written to a
/// stream fits the 6-bit long-record mode field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum RelocMode {
    /// Call to a code object
    CodeTarget = 0,
    /// Call to a code object carrying an AST id
    CodeTargetWithId,
    /// JS construct call
    ConstructCall,
    /// Debugger statement call
    DebuggerStatement,
    /// Pointer to a heap object
    EmbeddedObject,
    /// Pointer to a property cell
    Cell,
    /// Call to a runtime entry (deoptimization bailouts among them)
    RuntimeEntry,
    /// Code comment
    Comment,
    /// Source position
    Position,
    /// Statement source position
    StatementPosition,
    /// Debug break slot at a plain position
    DebugBreakSlotAtPosition,
    /// Debug break slot at a return
    DebugBreakSlotAtReturn,
    /// Debug break slot at a call, carrying the argument count
    DebugBreakSlotAtCall,
    /// Debug break slot at a construct call
    DebugBreakSlotAtConstructCall,
    /// Address of an external reference
    ExternalReference,
    /// Absolute address inside the same code object
    InternalReference,
    /// Encoded absolute address inside the same code object
    InternalReferenceEncoded,
    /// Generator resume point
    GeneratorContinuation,
    /// Constant pool start, carrying its size
    ConstPool,
    /// Veneer pool start, carrying its size
    VeneerPool,
    /// Deoptimization reason
    DeoptReason,
    /// Carries the high bits of a large pc delta; never yielded
    PcJump,
    /// No relocation, 32-bit
    None32 = 23,
    /// No relocation, 64-bit
    None64,
    /// Code age marker, synthesized by the iterator
    CodeAgeSequence,
}

/// Number of modes that can appear in an encoded stream.
pub const NUMBER_OF_MODES: u8 = RelocMode::PcJump as u8 + 1;

const _: () = assert!(NUMBER_OF_MODES as u32 <= 1 << crate::codec::LONG_TAG_BITS);

impl RelocMode {
    /// Last code target mode.
    pub const LAST_CODE_ENUM: RelocMode = RelocMode::DebuggerStatement;
    /// Last mode the GC visits.
    pub const LAST_GCED_ENUM: RelocMode = RelocMode::Cell;
    /// First mode that requires relocation.
    pub const FIRST_REAL_RELOC_MODE: RelocMode = RelocMode::CodeTarget;
    /// Last mode that requires relocation.
    pub const LAST_REAL_RELOC_MODE: RelocMode = RelocMode::VeneerPool;

    /// Mode with the given encoded value.
    pub fn from_u8(value: u8) -> Option<RelocMode> {
        use RelocMode::*;
        Some(match value {
            0 => CodeTarget,
            1 => CodeTargetWithId,
            2 => ConstructCall,
            3 => DebuggerStatement,
            4 => EmbeddedObject,
            5 => Cell,
            6 => RuntimeEntry,
            7 => Comment,
            8 => Position,
            9 => StatementPosition,
            10 => DebugBreakSlotAtPosition,
            11 => DebugBreakSlotAtReturn,
            12 => DebugBreakSlotAtCall,
            13 => DebugBreakSlotAtConstructCall,
            14 => ExternalReference,
            15 => InternalReference,
            16 => InternalReferenceEncoded,
            17 => GeneratorContinuation,
            18 => ConstPool,
            19 => VeneerPool,
            20 => DeoptReason,
            21 => PcJump,
            23 => None32,
            24 => None64,
            25 => CodeAgeSequence,
            _ => return None,
        })
    }

    /// Human-readable name, as printed in disassembly.
    pub fn name(self) -> &'static str {
        use RelocMode::*;
        match self {
            None32 => "no reloc 32",
            None64 => "no reloc 64",
            EmbeddedObject => "embedded object",
            ConstructCall => "code target (js construct call)",
            DebuggerStatement => "debugger statement",
            CodeTarget => "code target",
            CodeTargetWithId => "code target with id",
            Cell => "property cell",
            RuntimeEntry => "runtime entry",
            Comment => "comment",
            Position => "position",
            StatementPosition => "statement position",
            ExternalReference => "external reference",
            InternalReference => "internal reference",
            InternalReferenceEncoded => "encoded internal reference",
            DeoptReason => "deopt reason",
            ConstPool => "constant pool",
            VeneerPool => "veneer pool",
            DebugBreakSlotAtPosition => "debug break slot at position",
            DebugBreakSlotAtReturn => "debug break slot at return",
            DebugBreakSlotAtCall => "debug break slot at call",
            DebugBreakSlotAtConstructCall => "debug break slot at construct call",
            CodeAgeSequence => "code age sequence",
            GeneratorContinuation => "generator continuation",
            PcJump => "pc jump",
        }
    }

    /// Whether code holding this mode must be patched when it moves.
    #[inline]
    pub fn is_real_reloc_mode(self) -> bool {
        (Self::FIRST_REAL_RELOC_MODE..=Self::LAST_REAL_RELOC_MODE).contains(&self)
    }

    /// Any mode calling a code object.
    #[inline]
    pub fn is_code_target(self) -> bool {
        self <= Self::LAST_CODE_ENUM
    }

    /// Code targets, embedded objects and cells.
    #[inline]
    pub fn is_gc_reloc_mode(self) -> bool {
        self <= Self::LAST_GCED_ENUM
    }

    /// Whether this is `EmbeddedObject`.
    #[inline]
    pub fn is_embedded_object(self) -> bool {
        self == RelocMode::EmbeddedObject
    }

    /// Whether this is `Cell`.
    #[inline]
    pub fn is_cell(self) -> bool {
        self == RelocMode::Cell
    }

    /// Whether this is `RuntimeEntry`.
    #[inline]
    pub fn is_runtime_entry(self) -> bool {
        self == RelocMode::RuntimeEntry
    }

    /// Whether this is `Comment`.
    #[inline]
    pub fn is_comment(self) -> bool {
        self == RelocMode::Comment
    }

    /// Whether this is `ConstPool`.
    #[inline]
    pub fn is_const_pool(self) -> bool {
        self == RelocMode::ConstPool
    }

    /// Whether this is `VeneerPool`.
    #[inline]
    pub fn is_veneer_pool(self) -> bool {
        self == RelocMode::VeneerPool
    }

    /// Whether this is `DeoptReason`.
    #[inline]
    pub fn is_deopt_reason(self) -> bool {
        self == RelocMode::DeoptReason
    }

    /// Either position mode.
    #[inline]
    pub fn is_position(self) -> bool {
        matches!(self, RelocMode::Position | RelocMode::StatementPosition)
    }

    /// Whether this is `StatementPosition`.
    #[inline]
    pub fn is_statement_position(self) -> bool {
        self == RelocMode::StatementPosition
    }

    /// Whether this is `ExternalReference`.
    #[inline]
    pub fn is_external_reference(self) -> bool {
        self == RelocMode::ExternalReference
    }

    /// Whether this is `InternalReference`.
    #[inline]
    pub fn is_internal_reference(self) -> bool {
        self == RelocMode::InternalReference
    }

    /// Whether this is `InternalReferenceEncoded`.
    #[inline]
    pub fn is_internal_reference_encoded(self) -> bool {
        self == RelocMode::InternalReferenceEncoded
    }

    /// Any debug break slot.
    #[inline]
    pub fn is_debug_break_slot(self) -> bool {
        self.is_debug_break_slot_at_position()
            || self.is_debug_break_slot_at_return()
            || self.is_debug_break_slot_at_call()
            || self.is_debug_break_slot_at_construct_call()
    }

    /// Whether this is `DebugBreakSlotAtPosition`.
    #[inline]
    pub fn is_debug_break_slot_at_position(self) -> bool {
        self == RelocMode::DebugBreakSlotAtPosition
    }

    /// Whether this is `DebugBreakSlotAtReturn`.
    #[inline]
    pub fn is_debug_break_slot_at_return(self) -> bool {
        self == RelocMode::DebugBreakSlotAtReturn
    }

    /// Whether this is `DebugBreakSlotAtCall`.
    #[inline]
    pub fn is_debug_break_slot_at_call(self) -> bool {
        self == RelocMode::DebugBreakSlotAtCall
    }

    /// Whether this is `DebugBreakSlotAtConstructCall`.
    #[inline]
    pub fn is_debug_break_slot_at_construct_call(self) -> bool {
        self == RelocMode::DebugBreakSlotAtConstructCall
    }

    /// Whether this is `CodeAgeSequence`.
    #[inline]
    pub fn is_code_age_sequence(self) -> bool {
        self == RelocMode::CodeAgeSequence
    }

    /// Whether this is `GeneratorContinuation`.
    #[inline]
    pub fn is_generator_continuation(self) -> bool {
        self == RelocMode::GeneratorContinuation
    }

    /// Either no-relocation marker.
    #[inline]
    pub fn is_none(self) -> bool {
        matches!(self, RelocMode::None32 | RelocMode::None64)
    }

    /// Whether a writer may encode this mode.
    #[inline]
    pub(crate) fn is_writable(self) -> bool {
        (self as u8) < NUMBER_OF_MODES && self != RelocMode::PcJump
    }
}

/// Fixed-width payload that follows the pc byte of a long record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LongPayload {
    None,
    Int,
    Pointer,
}

impl RelocMode {
    pub(crate) fn long_payload(self) -> LongPayload {
        use RelocMode::*;
        match self {
            Comment => LongPayload::Pointer,
            CodeTargetWithId | Position | StatementPosition | ConstPool | VeneerPool
            | DebugBreakSlotAtCall => LongPayload::Int,
            CodeTarget
            | ConstructCall
            | DebuggerStatement
            | EmbeddedObject
            | Cell
            | RuntimeEntry
            | DebugBreakSlotAtPosition
            | DebugBreakSlotAtReturn
            | DebugBreakSlotAtConstructCall
            | ExternalReference
            | InternalReference
            | InternalReferenceEncoded
            | GeneratorContinuation
            | DeoptReason
            | PcJump
            | None32
            | None64
            | CodeAgeSequence => LongPayload::None,
        }
    }
}

impl fmt::Display for RelocMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of relocation modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModeMask(u32);

impl ModeMask {
    /// Every mode.
    pub const ALL: ModeMask = ModeMask(u32::MAX);
    /// No mode.
    pub const EMPTY: ModeMask = ModeMask(0);
    /// Modes up to and including `LAST_CODE_ENUM`.
    pub const CODE_TARGETS: ModeMask =
        ModeMask((1 << (RelocMode::LAST_CODE_ENUM as u32 + 1)) - 1);
    /// Both position modes.
    pub const POSITIONS: ModeMask =
        Self::of(RelocMode::Position).union(Self::of(RelocMode::StatementPosition));
    /// All four debug break slot modes.
    pub const DEBUG_BREAK_SLOTS: ModeMask = Self::of(RelocMode::DebugBreakSlotAtPosition)
        .union(Self::of(RelocMode::DebugBreakSlotAtReturn))
        .union(Self::of(RelocMode::DebugBreakSlotAtCall))
        .union(Self::of(RelocMode::DebugBreakSlotAtConstructCall));
    /// Modes the GC visits.
    pub const GC_RELOC: ModeMask = Self::CODE_TARGETS
        .union(Self::of(RelocMode::EmbeddedObject))
        .union(Self::of(RelocMode::Cell));
    /// Modes whose targets must be adjusted when code moves.
    pub const APPLY: ModeMask = Self::CODE_TARGETS
        .union(Self::of(RelocMode::RuntimeEntry))
        .union(Self::of(RelocMode::InternalReference))
        .union(Self::of(RelocMode::InternalReferenceEncoded))
        .union(Self::of(RelocMode::CodeAgeSequence));

    /// Mask holding exactly `mode`.
    pub const fn of(mode: RelocMode) -> ModeMask {
        ModeMask(1 << mode as u32)
    }

    /// Union of two masks.
    pub const fn union(self, other: ModeMask) -> ModeMask {
        ModeMask(self.0 | other.0)
    }

    /// Raw bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether `mode` is in the mask.
    #[inline]
    pub const fn contains(self, mode: RelocMode) -> bool {
        self.0 & (1 << mode as u32) != 0
    }

    /// Whether the two masks share a mode.
    #[inline]
    pub const fn intersects(self, other: ModeMask) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether no mode is in the mask.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ModeMask {
    type Output = ModeMask;

    fn bitor(self, rhs: ModeMask) -> ModeMask {
        self.union(rhs)
    }
}

impl BitOr<RelocMode> for ModeMask {
    type Output = ModeMask;

    fn bitor(self, rhs: RelocMode) -> ModeMask {
        self.union(ModeMask::of(rhs))
    }
}

impl BitOrAssign for ModeMask {
    fn bitor_assign(&mut self, rhs: ModeMask) {
        self.0 |= rhs.0;
    }
}

impl From<RelocMode> for ModeMask {
    fn from(mode: RelocMode) -> Self {
        ModeMask::of(mode)
    }
}

impl FromIterator<RelocMode> for ModeMask {
    fn from_iter<I: IntoIterator<Item = RelocMode>>(iter: I) -> Self {
        iter.into_iter().fold(ModeMask::EMPTY, |mask, mode| mask | mode)
    }
}
