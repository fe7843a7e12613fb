//! # Otter VM Relocation
//!
//! Compact relocation info for generated code: the writer that records
//! which instruction bytes need patching when code moves or the heap is
//! compacted, and the iterator that plays the records back.
//!
//! ## Design
//!
//! - **RelocInfoWriter**: encodes records backwards from the end of the code arena
//! - **RelocIterator**: decodes the stream filtered by a [`ModeMask`]
//! - **CodeAssembler**: owns the arena and records positions, comments and pools
//! - **ConstantPoolBuilder**: lays out shared constants after the instructions

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod assembler;
pub mod code;
pub mod codec;
pub mod constant_pool;
pub mod error;
pub mod info;
pub mod iterator;
pub mod mode;
pub mod positions;
pub mod writer;

pub use assembler::{AssemblerOptions, CodeAssembler};
pub use code::{Code, CodeAge, CodeDesc};
pub use constant_pool::{
    Access, ConstantPoolBuilder, ConstantPoolEntry, ConstantPoolPatcher, EntryType,
};
pub use error::{RelocError, Result, VerifyError};
pub use info::{CodeRegion, NO_POSITION, RelocHost, RelocInfo};
pub use iterator::RelocIterator;
pub use mode::{ModeMask, NUMBER_OF_MODES, RelocMode};
pub use positions::{PositionState, PositionsRecorder};
pub use writer::RelocInfoWriter;
