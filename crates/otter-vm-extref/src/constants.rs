//! Process-wide numeric constants that generated code loads by address.
//!
//! Two groups live here:
//!
//! - **Double constants**: a handful of `f64` values (min int, ±0.5, the hole
//!   NaN, ...) filled in once by [`ExternalConstants::set_up`].
//! - **Math exp data**: the constant array and the 2048-entry mantissa table
//!   used by the inline `Math.exp` sequence. These are built lazily on first
//!   use, guarded by a double-checked ready flag + mutex, and freed again by
//!   [`ExternalConstants::tear_down_math_exp_data`].
//!
//! Generated code embeds the *addresses* of these values, so every value sits
//! behind a `Box` and never moves for the lifetime of the registry.

use parking_lot::Mutex;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crate::error::{ExternalReferenceError, Result};

/// Bit pattern of the NaN used to mark holes in double arrays.
pub const HOLE_NAN_INT64: u64 = 0xFFF7_FFFF_FFF7_FFFF;

/// log2 of the math exp lookup table size.
pub const MATH_EXP_TABLE_SIZE_BITS: u32 = 11;

/// Number of entries in the math exp lookup table.
pub const MATH_EXP_TABLE_SIZE: usize = 1 << MATH_EXP_TABLE_SIZE_BITS;

/// Number of entries in the math exp constant array.
pub const MATH_EXP_CONSTANT_COUNT: usize = 9;

/// Named double constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoubleConstant {
    /// `i32::MIN` as a double
    MinInt,
    /// `0.5`
    OneHalf,
    /// `-0.5`
    MinusOneHalf,
    /// `-Infinity`
    NegativeInfinity,
    /// The hole NaN
    TheHoleNan,
    /// `2^32`, added to convert a signed int32 into its uint32 value
    Uint32Bias,
}

/// Storage for the double constants. `#[repr(C)]` keeps the field order stable.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct DoubleConstants {
    min_int: f64,
    one_half: f64,
    minus_one_half: f64,
    negative_infinity: f64,
    the_hole_nan: f64,
    uint32_bias: f64,
}

impl DoubleConstants {
    fn new() -> Self {
        Self {
            min_int: i32::MIN as f64,
            one_half: 0.5,
            minus_one_half: -0.5,
            negative_infinity: f64::NEG_INFINITY,
            the_hole_nan: f64::from_bits(HOLE_NAN_INT64),
            uint32_bias: u32::MAX as f64 + 1.0,
        }
    }

    fn slot(&self, which: DoubleConstant) -> &f64 {
        match which {
            DoubleConstant::MinInt => &self.min_int,
            DoubleConstant::OneHalf => &self.one_half,
            DoubleConstant::MinusOneHalf => &self.minus_one_half,
            DoubleConstant::NegativeInfinity => &self.negative_infinity,
            DoubleConstant::TheHoleNan => &self.the_hole_nan,
            DoubleConstant::Uint32Bias => &self.uint32_bias,
        }
    }
}

/// The lazily built math exp tables.
#[derive(Debug)]
pub struct MathExpTables {
    constants: [f64; MATH_EXP_CONSTANT_COUNT],
    log_table: Box<[f64]>,
}

impl MathExpTables {
    fn build() -> Self {
        let table_size = MATH_EXP_TABLE_SIZE as f64;
        let constant3 = table_size / std::f64::consts::LN_2;
        let constants = [
            // Inputs below this always produce 0.
            -708.396_418_532_264_08,
            // Inputs above this always produce +Infinity.
            709.782_712_893_383_97,
            f64::INFINITY,
            constant3,
            (3i64 << 51) as f64,
            1.0 / constant3,
            3.000_000_002_795_539_4,
            0.166_666_666_852_278_35,
            1.0,
        ];

        const MANTISSA_MASK: u64 = (1u64 << 52) - 1;
        let log_table = (0..MATH_EXP_TABLE_SIZE)
            .map(|i| {
                let value = 2f64.powf(i as f64 / table_size);
                f64::from_bits(value.to_bits() & MANTISSA_MASK)
            })
            .collect();

        Self {
            constants,
            log_table,
        }
    }

    /// The constant array.
    pub fn constants(&self) -> &[f64; MATH_EXP_CONSTANT_COUNT] {
        &self.constants
    }

    /// The mantissa lookup table.
    pub fn log_table(&self) -> &[f64] {
        &self.log_table
    }
}

struct MathExpData {
    initialized: AtomicBool,
    lock: Mutex<()>,
    tables: AtomicPtr<MathExpTables>,
}

/// Registry of constants shared by all code generated in this process.
///
/// Owned by the embedder (usually behind an `Arc`) and handed to the
/// [`RuntimeContext`](crate::RuntimeContext). Readers only need `&self`;
/// teardown needs `&mut self`, so no reference into the tables can outlive it.
pub struct ExternalConstants {
    doubles: Box<DoubleConstants>,
    math_exp: MathExpData,
}

// SAFETY: the tables pointer is published once under the mutex with release
// ordering, read with acquire ordering, and only freed through `&mut self`.
unsafe impl Send for ExternalConstants {}
unsafe impl Sync for ExternalConstants {}

impl ExternalConstants {
    /// Create the registry and fill in the double constants.
    pub fn set_up() -> Self {
        Self {
            doubles: Box::new(DoubleConstants::new()),
            math_exp: MathExpData {
                initialized: AtomicBool::new(false),
                lock: Mutex::new(()),
                tables: AtomicPtr::new(ptr::null_mut()),
            },
        }
    }

    /// Value of a double constant.
    pub fn double_value(&self, which: DoubleConstant) -> f64 {
        *self.doubles.slot(which)
    }

    /// Address of a double constant.
    pub fn double_address(&self, which: DoubleConstant) -> usize {
        self.doubles.slot(which) as *const f64 as usize
    }

    /// Whether the math exp tables have been built.
    pub fn is_math_exp_data_initialized(&self) -> bool {
        self.math_exp.initialized.load(Ordering::Acquire)
    }

    /// Build the math exp tables if nobody has yet.
    ///
    /// The fast path is a single acquire load. Concurrent first callers block
    /// on the mutex until the first one has published the tables.
    pub fn initialize_math_exp_data(&self) {
        if self.math_exp.initialized.load(Ordering::Acquire) {
            return;
        }

        let _guard = self.math_exp.lock.lock();
        if self.math_exp.initialized.load(Ordering::Acquire) {
            return;
        }

        let tables = Box::into_raw(Box::new(MathExpTables::build()));
        self.math_exp.tables.store(tables, Ordering::Release);
        self.math_exp.initialized.store(true, Ordering::Release);

        tracing::debug!(
            target: "otter::extref",
            table_size = MATH_EXP_TABLE_SIZE,
            "math exp data initialized"
        );
    }

    /// The math exp tables, if built.
    pub fn math_exp_tables(&self) -> Option<&MathExpTables> {
        if !self.math_exp.initialized.load(Ordering::Acquire) {
            return None;
        }
        let tables = self.math_exp.tables.load(Ordering::Acquire);
        // SAFETY: a non-null pointer came from `Box::into_raw` in
        // `initialize_math_exp_data` and is only freed via `&mut self`.
        unsafe { tables.as_ref() }
    }

    /// Address of one math exp constant, building the tables on first use.
    pub fn math_exp_constant_address(&self, index: usize) -> Result<usize> {
        if index >= MATH_EXP_CONSTANT_COUNT {
            return Err(ExternalReferenceError::MathExpConstantOutOfRange {
                index,
                len: MATH_EXP_CONSTANT_COUNT,
            });
        }
        self.initialize_math_exp_data();
        let tables = self
            .math_exp_tables()
            .ok_or(ExternalReferenceError::MathExpDataUnavailable)?;
        Ok(&tables.constants[index] as *const f64 as usize)
    }

    /// Address of the math exp lookup table, building the tables on first use.
    pub fn math_exp_log_table_address(&self) -> Result<usize> {
        self.initialize_math_exp_data();
        let tables = self
            .math_exp_tables()
            .ok_or(ExternalReferenceError::MathExpDataUnavailable)?;
        Ok(tables.log_table.as_ptr() as usize)
    }

    /// Free the math exp tables. Calling this again is a no-op.
    pub fn tear_down_math_exp_data(&mut self) {
        *self.math_exp.initialized.get_mut() = false;
        let tables = std::mem::replace(self.math_exp.tables.get_mut(), ptr::null_mut());
        if tables.is_null() {
            return;
        }
        // SAFETY: produced by `Box::into_raw` and unreachable from any reader
        // since we hold `&mut self`.
        drop(unsafe { Box::from_raw(tables) });
        tracing::debug!(target: "otter::extref", "math exp data torn down");
    }
}

impl Default for ExternalConstants {
    fn default() -> Self {
        Self::set_up()
    }
}

impl Drop for ExternalConstants {
    fn drop(&mut self) {
        self.tear_down_math_exp_data();
    }
}

impl std::fmt::Debug for ExternalConstants {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalConstants")
            .field("doubles", &self.doubles)
            .field("math_exp_initialized", &self.is_math_exp_data_initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_double_constants() {
        let consts = ExternalConstants::set_up();
        assert_eq!(consts.double_value(DoubleConstant::MinInt), -2147483648.0);
        assert_eq!(consts.double_value(DoubleConstant::OneHalf), 0.5);
        assert_eq!(consts.double_value(DoubleConstant::MinusOneHalf), -0.5);
        assert_eq!(
            consts.double_value(DoubleConstant::NegativeInfinity),
            f64::NEG_INFINITY
        );
        assert_eq!(consts.double_value(DoubleConstant::Uint32Bias), 4294967296.0);
        let hole = consts.double_value(DoubleConstant::TheHoleNan);
        assert!(hole.is_nan());
        assert_eq!(hole.to_bits(), HOLE_NAN_INT64);
    }

    #[test]
    fn test_double_address_points_at_value() {
        let consts = ExternalConstants::set_up();
        let addr = consts.double_address(DoubleConstant::OneHalf);
        // SAFETY: the address points into `consts`, which is alive.
        let value = unsafe { *(addr as *const f64) };
        assert_eq!(value, 0.5);
    }

    #[test]
    fn test_math_exp_lazy_init() {
        let consts = ExternalConstants::set_up();
        assert!(!consts.is_math_exp_data_initialized());
        assert!(consts.math_exp_tables().is_none());

        consts.initialize_math_exp_data();
        let tables = consts.math_exp_tables().unwrap();
        assert_eq!(tables.constants()[2], f64::INFINITY);
        assert_eq!(tables.constants()[8], 1.0);
        assert_eq!(tables.log_table().len(), MATH_EXP_TABLE_SIZE);
        // 2^0 == 1.0 has an all-zero mantissa
        assert_eq!(tables.log_table()[0].to_bits(), 0);
        // mantissa of 2^(1/2)
        let expected = 2f64.powf(0.5).to_bits() & ((1u64 << 52) - 1);
        assert_eq!(tables.log_table()[1024].to_bits(), expected);
    }

    #[test]
    fn test_math_exp_init_is_idempotent() {
        let consts = ExternalConstants::set_up();
        let first = consts.math_exp_log_table_address().unwrap();
        consts.initialize_math_exp_data();
        let second = consts.math_exp_log_table_address().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_math_exp_concurrent_first_use() {
        let consts = Arc::new(ExternalConstants::set_up());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let consts = Arc::clone(&consts);
                std::thread::spawn(move || consts.math_exp_log_table_address().unwrap())
            })
            .collect();
        let addresses: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(addresses.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_math_exp_constant_out_of_range() {
        let consts = ExternalConstants::set_up();
        assert_eq!(
            consts.math_exp_constant_address(MATH_EXP_CONSTANT_COUNT),
            Err(ExternalReferenceError::MathExpConstantOutOfRange { index: 9, len: 9 })
        );
    }

    #[test]
    fn test_tear_down_is_idempotent() {
        let mut consts = ExternalConstants::set_up();
        consts.initialize_math_exp_data();
        consts.tear_down_math_exp_data();
        assert!(!consts.is_math_exp_data_initialized());
        assert!(consts.math_exp_tables().is_none());
        consts.tear_down_math_exp_data();

        // Rebuilds on next use.
        assert!(consts.math_exp_constant_address(0).is_ok());
        assert!(consts.is_math_exp_data_initialized());
    }
}
