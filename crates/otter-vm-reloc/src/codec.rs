//! Tagged byte codec.
//!
//! Every relocation byte carries a 2-bit tag in its low bits:
//!
//! ```text
//! embedded object:  [6 bits pc delta] 00
//! code target:      [6 bits pc delta] 01
//! locatable:        [6 bits pc delta] 10
//!                   [6 bits signed data] [2 bits data type]
//! long record:      [6 bits mode] 11
//!                   [8 bits pc delta]
//!                   [4 or pointer-size bytes of payload]
//! pc jump:          [PC_JUMP] 11
//!                   [7 bits chunk] 0
//!                   ...
//!                   [7 bits chunk] 1
//! ```
//!
//! Payload bytes of one record are laid out least significant byte first in
//! read order, which puts them at the highest address since the stream grows
//! downward.

/// Bits of the low tag.
pub const TAG_BITS: u32 = 2;
/// Mask of the low tag.
pub const TAG_MASK: u8 = (1 << TAG_BITS) - 1;
/// Bits of the mode field of a long record.
pub const LONG_TAG_BITS: u32 = 6;
/// Bits of the data-type tag of a locatable data byte.
pub const SHORT_DATA_TYPE_TAG_BITS: u32 = 2;
/// Bits of signed data in a locatable data byte.
pub const SHORT_DATA_BITS: u32 = 8 - SHORT_DATA_TYPE_TAG_BITS;
/// Bits of pc delta in a short tagged byte.
pub const SMALL_PC_DELTA_BITS: u32 = 8 - TAG_BITS;
/// Mask of the pc delta in a short tagged byte.
pub const SMALL_PC_DELTA_MASK: u32 = (1 << SMALL_PC_DELTA_BITS) - 1;
/// Largest pc delta a single tagged byte holds.
pub const MAX_SMALL_PC_DELTA: u32 = SMALL_PC_DELTA_MASK;
/// Bits per pc-jump chunk.
pub const CHUNK_BITS: u32 = 7;
/// Mask of one pc-jump chunk.
pub const CHUNK_MASK: u32 = (1 << CHUNK_BITS) - 1;
/// Bits of the last-chunk marker.
pub const LAST_CHUNK_TAG_BITS: u32 = 1;
/// Marker set on the final pc-jump chunk.
pub const LAST_CHUNK_TAG: u8 = 1;
/// Width of an int payload.
pub const INT_SIZE: usize = 4;
/// Width of a pointer payload.
pub const POINTER_SIZE: usize = std::mem::size_of::<usize>();

/// Low 2-bit tag of a relocation byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    /// Short embedded object record
    EmbeddedObject = 0,
    /// Short code target record
    CodeTarget = 1,
    /// Pc byte followed by a data byte
    Locatable = 2,
    /// Long record: mode byte, pc byte, payload
    Default = 3,
}

/// Data-type tag of the second byte of a locatable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShortDataType {
    /// Id delta of a code target with id
    CodeWithId = 0,
    /// Position delta
    NonStatementPosition = 1,
    /// Statement position delta
    StatementPosition = 2,
    /// Deopt reason
    DeoptReason = 3,
}

/// Whether `value` fits in `bits` unsigned bits.
#[inline]
pub fn fits_unsigned(value: i64, bits: u32) -> bool {
    debug_assert!(bits > 0 && bits < 64);
    value >= 0 && value < (1i64 << bits)
}

/// Whether `value` fits in `bits` two's complement bits.
#[inline]
pub fn fits_signed(value: i64, bits: u32) -> bool {
    debug_assert!(bits > 0 && bits < 64);
    let limit = 1i64 << (bits - 1);
    (-limit..limit).contains(&value)
}

/// Short tagged pc byte. The delta must already fit in 6 bits.
#[inline]
pub fn short_tagged_pc(pc_delta: u32, tag: Tag) -> u8 {
    debug_assert!(pc_delta <= MAX_SMALL_PC_DELTA);
    ((pc_delta << TAG_BITS) as u8) | tag as u8
}

/// Locatable data byte. The data must fit in 6 signed bits, or 6 unsigned
/// bits for deopt reasons.
#[inline]
pub fn short_tagged_data(data: i32, data_type: ShortDataType) -> u8 {
    ((data << SHORT_DATA_TYPE_TAG_BITS) as u8) | data_type as u8
}

/// Mode byte of a long record.
#[inline]
pub fn long_mode_byte(mode: u8) -> u8 {
    debug_assert!(u32::from(mode) < (1 << LONG_TAG_BITS));
    (mode << TAG_BITS) | Tag::Default as u8
}

/// One chunk of a pc jump.
#[inline]
pub fn pc_jump_chunk(chunk: u32) -> u8 {
    ((chunk & CHUNK_MASK) << LAST_CHUNK_TAG_BITS) as u8
}

/// Low tag of a byte.
#[inline]
pub fn tag_of(byte: u8) -> Tag {
    match byte & TAG_MASK {
        0 => Tag::EmbeddedObject,
        1 => Tag::CodeTarget,
        2 => Tag::Locatable,
        _ => Tag::Default,
    }
}

/// Mode field of a long record's mode byte.
#[inline]
pub fn long_mode_of(byte: u8) -> u8 {
    (byte >> TAG_BITS) & ((1 << LONG_TAG_BITS) - 1)
}

/// Pc delta of a short tagged byte.
#[inline]
pub fn short_pc_delta_of(byte: u8) -> u32 {
    u32::from(byte >> TAG_BITS)
}

/// Data-type tag of a locatable data byte.
#[inline]
pub fn short_data_type_of(byte: u8) -> ShortDataType {
    match byte & ((1 << SHORT_DATA_TYPE_TAG_BITS) - 1) {
        0 => ShortDataType::CodeWithId,
        1 => ShortDataType::NonStatementPosition,
        2 => ShortDataType::StatementPosition,
        _ => ShortDataType::DeoptReason,
    }
}

/// Signed data of a locatable data byte (arithmetic shift).
#[inline]
pub fn signed_short_data_of(byte: u8) -> i32 {
    i32::from((byte as i8) >> SHORT_DATA_TYPE_TAG_BITS)
}

/// Unsigned data of a locatable data byte.
#[inline]
pub fn unsigned_short_data_of(byte: u8) -> u32 {
    u32::from(byte >> SHORT_DATA_TYPE_TAG_BITS)
}

/// Payload of one pc-jump chunk, and whether it is the last one.
#[inline]
pub fn pc_jump_chunk_of(byte: u8) -> (u32, bool) {
    (
        u32::from(byte >> LAST_CHUNK_TAG_BITS),
        byte & LAST_CHUNK_TAG == LAST_CHUNK_TAG,
    )
}
