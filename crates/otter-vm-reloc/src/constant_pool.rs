//! Embedded constant pool builder.
//!
//! Entries are collected while code is generated and emitted in one block
//! afterwards. Loads within the reach of the pool base use the short
//! `Regular` form, the rest are `Overflowed`. Sharable entries with equal
//! values are merged into one slot.

use rustc_hash::FxHashMap;

use crate::assembler::CodeAssembler;
use crate::codec::{self, POINTER_SIZE};
use crate::error::Result;

const DOUBLE_SIZE: usize = 8;

/// Type of a constant pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    /// Pointer-sized integer
    IntPtr,
    /// 64-bit double
    Double,
}

impl EntryType {
    /// Size of one entry.
    pub fn size(self) -> usize {
        match self {
            EntryType::IntPtr => POINTER_SIZE,
            EntryType::Double => DOUBLE_SIZE,
        }
    }
}

/// How a load reaches its entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Offset fits the load's immediate
    Regular,
    /// Offset needs the long sequence
    Overflowed,
}

/// One constant, referenced by the load at `position`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantPoolEntry {
    position: usize,
    value: u64,
    sharing_ok: bool,
    merged_index: Option<usize>,
    offset: Option<usize>,
}

impl ConstantPoolEntry {
    /// Pointer-sized entry loaded at `position`.
    pub fn intptr(position: usize, value: usize, sharing_ok: bool) -> Self {
        Self {
            position,
            value: value as u64,
            sharing_ok,
            merged_index: None,
            offset: None,
        }
    }

    /// Double entry loaded at `position`. Doubles are always sharable.
    pub fn double(position: usize, value: f64) -> Self {
        Self {
            position,
            value: value.to_bits(),
            sharing_ok: true,
            merged_index: None,
            offset: None,
        }
    }

    /// Pc offset of the load instruction.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Raw value bits
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Whether the entry may share a slot with an equal value.
    pub fn sharing_ok(&self) -> bool {
        self.sharing_ok
    }

    /// Whether the entry was merged into a shared slot.
    pub fn is_merged(&self) -> bool {
        self.merged_index.is_some()
    }
}

/// Patches a load instruction once its entry's offset is known.
pub trait ConstantPoolPatcher {
    /// Patch the load at `load_position` to reach `offset` from the pool
    /// base using `access`.
    fn patch(
        &mut self,
        assembler: &mut CodeAssembler,
        load_position: usize,
        offset: usize,
        access: Access,
        entry_type: EntryType,
    );
}

impl<F> ConstantPoolPatcher for F
where
    F: FnMut(&mut CodeAssembler, usize, usize, Access, EntryType),
{
    fn patch(
        &mut self,
        assembler: &mut CodeAssembler,
        load_position: usize,
        offset: usize,
        access: Access,
        entry_type: EntryType,
    ) {
        self(assembler, load_position, offset, access, entry_type)
    }
}

#[derive(Debug, Default)]
struct PerTypeEntryInfo {
    regular_reach_bits: u32,
    regular_count: usize,
    overflow_start: Option<usize>,
    entries: Vec<ConstantPoolEntry>,
    shared_entries: Vec<ConstantPoolEntry>,
    shared_index: FxHashMap<u64, usize>,
}

impl PerTypeEntryInfo {
    fn overflow(&self) -> bool {
        self.overflow_start.is_some()
    }
}

/// Collects constants and lays out the pool.
#[derive(Debug)]
pub struct ConstantPoolBuilder {
    intptr: PerTypeEntryInfo,
    double: PerTypeEntryInfo,
    emitted_at: Option<usize>,
}

impl ConstantPoolBuilder {
    /// Builder whose regular loads reach `ptr_reach_bits` / `double_reach_bits`
    /// bits of offset.
    pub fn new(ptr_reach_bits: u32, double_reach_bits: u32) -> Self {
        Self {
            intptr: PerTypeEntryInfo {
                regular_reach_bits: ptr_reach_bits,
                entries: Vec::with_capacity(64),
                ..Default::default()
            },
            double: PerTypeEntryInfo {
                regular_reach_bits: double_reach_bits,
                ..Default::default()
            },
            emitted_at: None,
        }
    }

    fn info(&self, entry_type: EntryType) -> &PerTypeEntryInfo {
        match entry_type {
            EntryType::IntPtr => &self.intptr,
            EntryType::Double => &self.double,
        }
    }

    fn info_mut(&mut self, entry_type: EntryType) -> &mut PerTypeEntryInfo {
        match entry_type {
            EntryType::IntPtr => &mut self.intptr,
            EntryType::Double => &mut self.double,
        }
    }

    /// Whether no entry was added.
    pub fn is_empty(&self) -> bool {
        [&self.intptr, &self.double]
            .iter()
            .all(|info| info.entries.is_empty() && info.shared_entries.is_empty())
    }

    /// Whether the pool was emitted.
    pub fn is_emitted(&self) -> bool {
        self.emitted_at.is_some()
    }

    /// Access the next unmerged entry of `entry_type` would get.
    pub fn next_access(&self, entry_type: EntryType) -> Access {
        let info = self.info(entry_type);
        if info.overflow() {
            return Access::Overflowed;
        }

        let dbl_offset = self.double.regular_count * DOUBLE_SIZE;
        let ptr_count = self.intptr.regular_count;
        let ptr_offset = ptr_count * POINTER_SIZE + dbl_offset;

        let fits = |offset: usize, bits: u32| codec::fits_unsigned(offset as i64, bits);
        let regular = match entry_type {
            // Doubles come first, so a new double also pushes every pointer
            // entry further out.
            EntryType::Double => {
                fits(dbl_offset, info.regular_reach_bits)
                    && (ptr_count == 0
                        || fits(
                            ptr_offset + DOUBLE_SIZE - POINTER_SIZE,
                            self.intptr.regular_reach_bits,
                        ))
            }
            EntryType::IntPtr => fits(ptr_offset, info.regular_reach_bits),
        };
        if regular {
            Access::Regular
        } else {
            Access::Overflowed
        }
    }

    /// Add an entry and return how its load must reach it.
    pub fn add_entry(&mut self, mut entry: ConstantPoolEntry, entry_type: EntryType) -> Access {
        debug_assert!(!self.is_emitted(), "constant pool already emitted");

        if entry.sharing_ok {
            entry.merged_index = self.info(entry_type).shared_index.get(&entry.value).copied();
        }
        let merged = entry.is_merged();
        debug_assert!(
            entry
                .merged_index
                .is_none_or(|i| i < self.info(entry_type).regular_count)
        );
        let access = if merged {
            Access::Regular
        } else {
            self.next_access(entry_type)
        };

        let info = self.info_mut(entry_type);
        if entry.sharing_ok && !merged && access == Access::Regular {
            info.shared_index
                .insert(entry.value, info.shared_entries.len());
            info.shared_entries.push(entry);
        } else {
            info.entries.push(entry);
        }

        if merged || info.overflow() {
            return access;
        }
        match access {
            Access::Regular => info.regular_count += 1,
            Access::Overflowed => info.overflow_start = Some(info.entries.len() - 1),
        }
        access
    }

    /// Emit the pool at the current pc and patch every load. Returns the pool
    /// start, or `None` for an empty pool. Emitting again changes nothing.
    pub fn emit<P>(&mut self, assembler: &mut CodeAssembler, patcher: &mut P) -> Result<Option<usize>>
    where
        P: ConstantPoolPatcher + ?Sized,
    {
        let empty = self.is_empty();
        if self.emitted_at.is_none() {
            if !empty {
                assembler.data_align(DOUBLE_SIZE)?;
            }
            let base = assembler.pc_offset();
            self.emitted_at = Some(base);
            if !empty {
                // Doubles first for alignment.
                self.emit_group(assembler, patcher, base, Access::Regular, EntryType::Double)?;
                self.emit_group(assembler, patcher, base, Access::Regular, EntryType::IntPtr)?;
                if self.double.overflow() {
                    assembler.data_align(DOUBLE_SIZE)?;
                    self.emit_group(assembler, patcher, base, Access::Overflowed, EntryType::Double)?;
                }
                if self.intptr.overflow() {
                    self.emit_group(assembler, patcher, base, Access::Overflowed, EntryType::IntPtr)?;
                }
            }
        }
        Ok(if empty { None } else { self.emitted_at })
    }

    fn emit_value(assembler: &mut CodeAssembler, value: u64, entry_type: EntryType) -> Result<()> {
        match entry_type {
            EntryType::IntPtr => assembler.dp(value as usize),
            EntryType::Double => assembler.dq(value),
        }
    }

    fn emit_shared_entries<P>(
        &mut self,
        assembler: &mut CodeAssembler,
        patcher: &mut P,
        base: usize,
        entry_type: EntryType,
    ) -> Result<()>
    where
        P: ConstantPoolPatcher + ?Sized,
    {
        let info = self.info_mut(entry_type);
        for shared in &mut info.shared_entries {
            let offset = assembler.pc_offset() - base;
            shared.offset = Some(offset);
            Self::emit_value(assembler, shared.value, entry_type)?;
            debug_assert!(codec::fits_unsigned(offset as i64, info.regular_reach_bits));
            patcher.patch(assembler, shared.position, offset, Access::Regular, entry_type);
        }
        Ok(())
    }

    fn emit_group<P>(
        &mut self,
        assembler: &mut CodeAssembler,
        patcher: &mut P,
        base: usize,
        access: Access,
        entry_type: EntryType,
    ) -> Result<()>
    where
        P: ConstantPoolPatcher + ?Sized,
    {
        if access == Access::Regular {
            self.emit_shared_entries(assembler, patcher, base, entry_type)?;
        }

        let info = self.info(entry_type);
        let range = match (access, info.overflow_start) {
            (Access::Regular, overflow_start) => 0..overflow_start.unwrap_or(info.entries.len()),
            (Access::Overflowed, Some(start)) => start..info.entries.len(),
            (Access::Overflowed, None) => return Ok(()),
        };

        for entry in &info.entries[range] {
            let (offset, entry_access) = match entry.merged_index {
                None => {
                    let offset = assembler.pc_offset() - base;
                    Self::emit_value(assembler, entry.value, entry_type)?;
                    (offset, access)
                }
                Some(index) => {
                    let offset = info.shared_entries[index].offset.unwrap_or_default();
                    (offset, Access::Regular)
                }
            };
            debug_assert!(
                entry_access == Access::Overflowed
                    || codec::fits_unsigned(offset as i64, info.regular_reach_bits)
            );
            patcher.patch(assembler, entry.position, offset, entry_access, entry_type);
        }
        Ok(())
    }
}
