//! External reference registry tests
//!
//! Exercises references across a full runtime context:
//! - Address-only equality
//! - Name resolution through redirection
//! - Shared constants across contexts

use otter_vm_extref::{
    AddressId, BuiltinId, CFunctionId, CallType, ExternalConstants, ExternalReference,
    RuntimeContext, RuntimeField, RuntimeFunctionId, StatsCounter, TrampolineRedirector,
};
use proptest::prelude::*;
use rustc_hash::FxHashSet;
use std::sync::Arc;

fn simulator_context() -> RuntimeContext {
    RuntimeContext::builder()
        .runtime_function(RuntimeFunctionId(0), "StackGuard", 0x10_0000, 0)
        .runtime_function(RuntimeFunctionId(1), "Throw", 0x10_1000, 1)
        .builtin(BuiltinId(0), "ArrayPush", 0x20_0000)
        .builtin(BuiltinId(1), "ArrayPop", 0x20_1000)
        .c_function(CFunctionId(0), "array_push_slow", 0x30_0000)
        .redirector(TrampolineRedirector::new())
        .roots(16)
        .build()
}

// ============================================================================
// Equality
// ============================================================================

#[test]
fn test_equal_values_distinct_fields_are_distinct_references() {
    let ctx = simulator_context();
    ctx.data().store(RuntimeField::StackLimit, 0x7fff_0000);
    ctx.data().store(RuntimeField::RealStackLimit, 0x7fff_0000);

    let limit = ExternalReference::address_of_stack_limit(&ctx);
    let real_limit = ExternalReference::address_of_real_stack_limit(&ctx);

    assert_ne!(limit, real_limit);
    assert_eq!(limit, ExternalReference::address_of_stack_limit(&ctx));
}

#[test]
fn test_every_runtime_location_is_unique() {
    let ctx = simulator_context();
    let mut seen = FxHashSet::default();
    for &field in RuntimeField::ALL {
        assert!(seen.insert(ExternalReference::runtime_field(&ctx, field)));
    }
    for &id in AddressId::ALL {
        assert!(seen.insert(ExternalReference::from_address_id(&ctx, id)));
    }
    assert!(seen.insert(ExternalReference::roots_array_start(&ctx)));
    assert!(seen.insert(ExternalReference::isolate_address(&ctx)));
}

#[test]
fn test_isolate_address_differs_from_first_field() {
    let ctx = simulator_context();
    let isolate = ExternalReference::isolate_address(&ctx);
    let stack_limit = ExternalReference::address_of_stack_limit(&ctx);
    assert_ne!(isolate, stack_limit);
    assert_eq!(ctx.name_of_address(isolate.address()).as_deref(), Some("runtime_data"));
    assert_eq!(
        ctx.name_of_address(stack_limit.address()).as_deref(),
        Some("RuntimeField::StackLimit")
    );
}

#[test]
fn test_redirected_runtime_function_is_stable() {
    let ctx = simulator_context();
    let a = ExternalReference::runtime_function(&ctx, RuntimeFunctionId(0)).unwrap();
    let b = ExternalReference::runtime_function(&ctx, RuntimeFunctionId(0)).unwrap();
    let c = ExternalReference::runtime_function(&ctx, RuntimeFunctionId(1)).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_ne!(a.address(), 0x10_0000);
}

// ============================================================================
// Naming
// ============================================================================

#[test]
fn test_names_resolve_through_trampolines() {
    let ctx = simulator_context();
    let guard = ExternalReference::runtime_function(&ctx, RuntimeFunctionId(0)).unwrap();
    assert_eq!(
        guard.display_with(&ctx).to_string(),
        format!("{guard} <StackGuard.entry>")
    );

    let slow = ExternalReference::c_function(&ctx, CFunctionId(0)).unwrap();
    assert_eq!(
        ctx.name_of_address(slow.address()).as_deref(),
        Some("array_push_slow")
    );

    let push = ExternalReference::builtin_by_name(&ctx, "ArrayPush").unwrap();
    assert_eq!(push, ExternalReference::builtin(&ctx, BuiltinId(0)).unwrap());
    assert_eq!(
        ctx.name_of_address(push.address()).as_deref(),
        Some("Builtin::ArrayPush")
    );
}

#[test]
fn test_api_function_uses_call_type() {
    let ctx = simulator_context();
    let direct = ExternalReference::api_function(&ctx, 0x40_0000, CallType::DirectApiCall);
    let profiling = ExternalReference::api_function(&ctx, 0x40_0000, CallType::ProfilingApiCall);
    assert_ne!(direct, profiling);
}

// ============================================================================
// Constants
// ============================================================================

#[test]
fn test_constants_shared_between_contexts() {
    let constants = Arc::new(ExternalConstants::set_up());
    let a = RuntimeContext::builder().constants(constants.clone()).build();
    let b = RuntimeContext::builder().constants(constants.clone()).build();

    let min_int = ExternalReference::address_of_min_int(a.constants());
    assert_eq!(min_int, ExternalReference::address_of_min_int(b.constants()));
    assert_eq!(
        a.name_of_address(min_int.address()).as_deref(),
        Some("LDoubleConstant::min_int")
    );

    let log_a = ExternalReference::math_exp_log_table(a.constants()).unwrap();
    let log_b = ExternalReference::math_exp_log_table(b.constants()).unwrap();
    assert_eq!(log_a, log_b);
}

#[test]
fn test_counter_reference_tracks_cell() {
    let counter = StatsCounter::new("c:Otter.RelocRecords");
    let reference = ExternalReference::counter(&counter);
    counter.increment(3);
    // SAFETY: the counter is alive and the reference points at its cell.
    let value = unsafe { *(reference.address() as *const i32) };
    assert_eq!(value, 3);
}

proptest! {
    #[test]
    fn prop_equality_follows_address(a in any::<usize>(), b in any::<usize>()) {
        let ra = ExternalReference::from_address(a);
        let rb = ExternalReference::from_address(b);
        prop_assert_eq!(ra == rb, a == b);
        prop_assert_eq!(ra.to_string(), format!("{a:#x}"));
    }
}
