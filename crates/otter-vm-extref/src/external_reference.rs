//! External references: addresses outside generated code that it refers to.

use std::fmt;
use std::sync::atomic::AtomicUsize;

use crate::constants::{DoubleConstant, ExternalConstants};
use crate::context::{
    AddressId, BuiltinId, CFunctionId, RuntimeContext, RuntimeField, RuntimeFunctionId,
};
use crate::counters::StatsCounter;
use crate::error::Result;
use crate::ieee;
use crate::redirect::CallType;

/// An address outside generated code: a runtime function, a builtin, a
/// runtime field, a constant or a counter.
///
/// Two references are equal exactly when their addresses are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExternalReference {
    address: usize,
}

impl ExternalReference {
    /// Wrap a raw address.
    pub const fn from_address(address: usize) -> Self {
        Self { address }
    }

    /// The referenced address.
    pub const fn address(self) -> usize {
        self.address
    }

    /// Entry of a runtime function, redirected as a builtin call.
    pub fn runtime_function(ctx: &RuntimeContext, id: RuntimeFunctionId) -> Result<Self> {
        let f = ctx.runtime_function(id)?;
        Ok(Self::from_address(ctx.redirect(f.entry, CallType::BuiltinCall)))
    }

    /// Address of a builtin.
    pub fn builtin(ctx: &RuntimeContext, id: BuiltinId) -> Result<Self> {
        Ok(Self::from_address(ctx.builtin(id)?.address))
    }

    /// Address of a builtin, looked up by name.
    pub fn builtin_by_name(ctx: &RuntimeContext, name: &str) -> Result<Self> {
        Ok(Self::from_address(ctx.builtin_by_name(name)?.address))
    }

    /// Entry of a C function, redirected as a builtin call.
    pub fn c_function(ctx: &RuntimeContext, id: CFunctionId) -> Result<Self> {
        let f = ctx.c_function(id)?;
        Ok(Self::from_address(ctx.redirect(f.address, CallType::BuiltinCall)))
    }

    /// An API callback, redirected with the given convention.
    pub fn api_function(ctx: &RuntimeContext, address: usize, call_type: CallType) -> Self {
        Self::from_address(ctx.redirect(address, call_type))
    }

    /// Cell of a stats counter.
    pub fn counter(counter: &StatsCounter) -> Self {
        Self::from_address(counter.internal_pointer())
    }

    /// The runtime data block itself.
    pub fn isolate_address(ctx: &RuntimeContext) -> Self {
        Self::from_address(ctx.data_address())
    }

    /// A slot of the runtime address table.
    pub fn from_address_id(ctx: &RuntimeContext, id: AddressId) -> Self {
        Self::from_cell(ctx.data().address_slot(id))
    }

    /// A runtime field.
    pub fn runtime_field(ctx: &RuntimeContext, field: RuntimeField) -> Self {
        Self::from_cell(ctx.data().field(field))
    }

    /// Start of the roots array.
    pub fn roots_array_start(ctx: &RuntimeContext) -> Self {
        Self::from_address(ctx.data().roots().as_ptr() as usize)
    }

    /// Deoptimization entry trampoline.
    pub fn for_deopt_entry(entry: usize) -> Self {
        Self::from_address(entry)
    }

    fn from_cell(cell: &AtomicUsize) -> Self {
        Self::from_address(cell as *const AtomicUsize as usize)
    }

    fn double_constant(constants: &ExternalConstants, which: DoubleConstant) -> Self {
        Self::from_address(constants.double_address(which))
    }

    /// `-2^31` as a double.
    pub fn address_of_min_int(constants: &ExternalConstants) -> Self {
        Self::double_constant(constants, DoubleConstant::MinInt)
    }

    /// `0.5`
    pub fn address_of_one_half(constants: &ExternalConstants) -> Self {
        Self::double_constant(constants, DoubleConstant::OneHalf)
    }

    /// `-0.5`
    pub fn address_of_minus_one_half(constants: &ExternalConstants) -> Self {
        Self::double_constant(constants, DoubleConstant::MinusOneHalf)
    }

    /// `-Infinity`
    pub fn address_of_negative_infinity(constants: &ExternalConstants) -> Self {
        Self::double_constant(constants, DoubleConstant::NegativeInfinity)
    }

    /// The hole NaN bit pattern.
    pub fn address_of_the_hole_nan(constants: &ExternalConstants) -> Self {
        Self::double_constant(constants, DoubleConstant::TheHoleNan)
    }

    /// `2^32` as a double.
    pub fn address_of_uint32_bias(constants: &ExternalConstants) -> Self {
        Self::double_constant(constants, DoubleConstant::Uint32Bias)
    }

    /// One of the math-exp constants, initializing the tables on first use.
    pub fn math_exp_constants(constants: &ExternalConstants, index: usize) -> Result<Self> {
        Ok(Self::from_address(constants.math_exp_constant_address(index)?))
    }

    /// The math-exp mantissa table, initializing the tables on first use.
    pub fn math_exp_log_table(constants: &ExternalConstants) -> Result<Self> {
        Ok(Self::from_address(constants.math_exp_log_table_address()?))
    }

    /// `f64 ** f64` helper.
    pub fn power_double_double_function(ctx: &RuntimeContext) -> Self {
        let f: extern "C" fn(f64, f64) -> f64 = ieee::power_double_double_entry;
        Self::from_address(ctx.redirect(f as usize, CallType::BuiltinFpFpCall))
    }

    /// `f64 ** i32` helper.
    pub fn power_double_int_function(ctx: &RuntimeContext) -> Self {
        let f: extern "C" fn(f64, i32) -> f64 = ieee::power_double_int_entry;
        Self::from_address(ctx.redirect(f as usize, CallType::BuiltinFpIntCall))
    }

    /// `f64 % f64` helper.
    pub fn mod_two_doubles_operation(ctx: &RuntimeContext) -> Self {
        let f: extern "C" fn(f64, f64) -> f64 = ieee::modulo_entry;
        Self::from_address(ctx.redirect(f as usize, CallType::BuiltinFpFpCall))
    }

    /// Render with the name the context knows for this address, if any.
    pub fn display_with(self, ctx: &RuntimeContext) -> DisplayWith<'_> {
        DisplayWith { reference: self, ctx }
    }
}

macro_rules! runtime_field_refs {
    ($($(#[$meta:meta])* $fn_name:ident => $field:ident),+ $(,)?) => {
        impl ExternalReference {
            $(
                $(#[$meta])*
                pub fn $fn_name(ctx: &RuntimeContext) -> Self {
                    Self::runtime_field(ctx, RuntimeField::$field)
                }
            )+
        }
    };
}

runtime_field_refs! {
    /// JS stack limit
    address_of_stack_limit => StackLimit,
    /// Real JS stack limit
    address_of_real_stack_limit => RealStackLimit,
    /// RegExp stack limit
    address_of_regexp_stack_limit => RegexpStackLimit,
    /// Start of new space
    new_space_start => NewSpaceStart,
    /// New space mask
    new_space_mask => NewSpaceMask,
    /// New space allocation top
    new_space_allocation_top_address => NewSpaceAllocationTop,
    /// New space allocation limit
    new_space_allocation_limit_address => NewSpaceAllocationLimit,
    /// Old space allocation top
    old_space_allocation_top_address => OldSpaceAllocationTop,
    /// Old space allocation limit
    old_space_allocation_limit_address => OldSpaceAllocationLimit,
    /// Store buffer top
    store_buffer_top => StoreBufferTop,
    /// Handle scope next
    handle_scope_next_address => HandleScopeNext,
    /// Handle scope limit
    handle_scope_limit_address => HandleScopeLimit,
    /// Handle scope level
    handle_scope_level_address => HandleScopeLevel,
    /// Scheduled exception
    scheduled_exception_address => ScheduledException,
    /// Pending message object
    address_of_pending_message_obj => PendingMessageObject,
    /// Profiler flag
    is_profiling_address => IsProfiling,
    /// Debugger flag
    debug_is_active_address => DebugIsActive,
    /// Date cache stamp
    date_cache_stamp => DateCacheStamp,
    /// Stress deopt countdown
    stress_deopt_count => StressDeoptCount,
    /// Allocation sites list head
    allocation_sites_list_address => AllocationSitesList,
}

impl fmt::Display for ExternalReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.address)
    }
}

/// [`ExternalReference`] rendered against a [`RuntimeContext`].
pub struct DisplayWith<'a> {
    reference: ExternalReference,
    ctx: &'a RuntimeContext,
}

impl fmt::Display for DisplayWith<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference)?;
        if let Some(func) = self.ctx.runtime_function_for_entry(self.reference.address) {
            write!(f, " <{}.entry>", func.name)?;
        } else if let Some(name) = self.ctx.name_of_address(self.reference.address) {
            write!(f, " ({name})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExternalReferenceError;
    use crate::redirect::TrampolineRedirector;
    use std::sync::Arc;

    #[test]
    fn test_equality_is_address_only() {
        let ctx = RuntimeContext::builder().build();
        ctx.data().store(RuntimeField::StackLimit, 0x8000);
        ctx.data().store(RuntimeField::RealStackLimit, 0x8000);
        let a = ExternalReference::address_of_stack_limit(&ctx);
        let b = ExternalReference::address_of_real_stack_limit(&ctx);
        assert_ne!(a, b);
        assert_eq!(a, ExternalReference::address_of_stack_limit(&ctx));
    }

    #[test]
    fn test_runtime_field_points_at_live_cell() {
        let ctx = RuntimeContext::builder().build();
        let top = ExternalReference::new_space_allocation_top_address(&ctx);
        ctx.data().store(RuntimeField::NewSpaceAllocationTop, 0x1234);
        // SAFETY: the address is a cell of ctx's runtime data, alive for ctx's lifetime.
        let cell = unsafe { &*(top.address() as *const AtomicUsize) };
        assert_eq!(cell.load(std::sync::atomic::Ordering::Relaxed), 0x1234);
    }

    #[test]
    fn test_double_constants() {
        let constants = ExternalConstants::set_up();
        let half = ExternalReference::address_of_one_half(&constants);
        // SAFETY: double constant cells live as long as `constants`.
        assert_eq!(unsafe { *(half.address() as *const f64) }, 0.5);
        let hole = ExternalReference::address_of_the_hole_nan(&constants);
        // SAFETY: as above.
        let bits = unsafe { *(hole.address() as *const u64) };
        assert_eq!(bits, crate::constants::HOLE_NAN_INT64);
    }

    #[test]
    fn test_math_exp_constants_out_of_range() {
        let constants = ExternalConstants::set_up();
        assert!(ExternalReference::math_exp_constants(&constants, 0).is_ok());
        assert!(matches!(
            ExternalReference::math_exp_constants(&constants, 9),
            Err(ExternalReferenceError::MathExpConstantOutOfRange { index: 9, .. })
        ));
        assert!(ExternalReference::math_exp_log_table(&constants).is_ok());
    }

    #[test]
    fn test_math_helpers_are_redirected() {
        let ctx = RuntimeContext::builder()
            .redirector(TrampolineRedirector::new())
            .build();
        let pow = ExternalReference::power_double_double_function(&ctx);
        let pow_int = ExternalReference::power_double_int_function(&ctx);
        let modulo = ExternalReference::mod_two_doubles_operation(&ctx);
        assert_ne!(pow, pow_int);
        assert_ne!(pow, modulo);
        assert_eq!(pow, ExternalReference::power_double_double_function(&ctx));
    }

    #[test]
    fn test_display() {
        let ctx = RuntimeContext::builder()
            .runtime_function(RuntimeFunctionId(4), "StackGuard", 0x4000, 0)
            .constants(Arc::new(ExternalConstants::set_up()))
            .build();
        let r = ExternalReference::runtime_function(&ctx, RuntimeFunctionId(4)).unwrap();
        assert_eq!(r.to_string(), "0x4000");
        assert_eq!(
            r.display_with(&ctx).to_string(),
            "0x4000 <StackGuard.entry>"
        );
        let plain = ExternalReference::from_address(0x10);
        assert_eq!(plain.display_with(&ctx).to_string(), "0x10");
    }

    #[test]
    fn test_counter_reference() {
        let counter = StatsCounter::new("c:test");
        let r = ExternalReference::counter(&counter);
        assert_eq!(r.address(), counter.internal_pointer());
    }
}
