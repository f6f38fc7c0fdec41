#![cfg(feature = "jit")]

//! Native stub tests
//!
//! Crossings whose callees and callers are real `extern "C"` functions,
//! bridged by Cranelift-generated call-out and entry stubs. Signatures that
//! need stack words pass more integer arguments than any host preset has
//! registers, and caller sets are filled from the computed placement, so the
//! same tests hold on every host preset.
//!
//! # Running Tests
//! ```bash
//! cargo test -p sharecall-engine --features jit --test jit_tests
//! ```

use std::sync::Arc;

use sharecall_abi::{Param, Signature, StorageClass, TargetDesc, ValueType};
use sharecall_engine::jit::{take_fault, CraneliftInvoker, EntryCompiler};
use sharecall_engine::{
    install_thunk, AdapterEngine, AdapterKey, CallTarget, Direction, EngineConfig, Fault, LocationSet, MarshalKind,
    NativeInvoker,
};

fn native_engine() -> AdapterEngine {
    AdapterEngine::native(EngineConfig::default().with_target(TargetDesc::host())).unwrap()
}

/// `fn(T) -> i64` with `T` a type variable instantiated as u32
fn double_u32() -> Signature {
    Signature::new(Param::concrete(ValueType::int(8)), vec![Param::variable(ValueType::uint(4))])
}

extern "C" fn shared_double(value: *const u32) -> i64 {
    unsafe { *value as i64 * 2 }
}

extern "C" fn normal_double(value: u32) -> i64 {
    value as i64 * 2
}

extern "C" fn add3(a: u64, b: u64, c: u64) -> u64 {
    a + b * 10 + c * 100
}

#[test]
fn test_invoker_calls_shared_callee() {
    let engine = native_engine();
    let key = AdapterKey {
        signature: double_u32(),
        direction: Direction::SharedToNormal,
        target: CallTarget::Direct(shared_double as usize),
    };
    let thunk = engine.thunk(&key).unwrap();
    assert_eq!(thunk.invoker_name(), "cranelift");

    let mut caller = LocationSet::new();
    caller.int_regs[0] = 21;
    unsafe { thunk.call(&mut caller, 0) };
    assert_eq!(caller.int_regs[0] as i64, 42);
}

#[test]
fn test_invoker_calls_normal_callee() {
    let engine = native_engine();
    let key = AdapterKey {
        signature: double_u32(),
        direction: Direction::NormalToShared,
        target: CallTarget::Direct(normal_double as usize),
    };
    let thunk = engine.thunk(&key).unwrap();

    let value: u32 = 1_000_000;
    let mut caller = LocationSet::new();
    caller.int_regs[0] = &value as *const u32 as u64;
    unsafe { thunk.call(&mut caller, 0) };
    assert_eq!(caller.int_regs[0] as i64, 2_000_000);
}

#[test]
fn test_invoker_passes_several_registers() {
    let invoker = CraneliftInvoker::host().unwrap();
    let mut frame = LocationSet::new();
    frame.int_regs[..3].copy_from_slice(&[1, 2, 3]);
    unsafe { sharecall_engine::NativeInvoker::invoke(&invoker, add3 as usize, &mut frame, 0) };
    assert_eq!(frame.int_regs[0], 321);
    assert_eq!(invoker.stub_count(), 1);
}

#[test]
fn test_native_entry_round_trip() {
    let engine = native_engine();
    let entries = EntryCompiler::host().unwrap();
    let key = AdapterKey {
        signature: double_u32(),
        direction: Direction::SharedToNormal,
        target: CallTarget::Direct(shared_double as usize),
    };
    let entry = entries.compile(&engine, &key, 0).unwrap();

    let native: extern "C" fn(u64) -> i64 = unsafe { std::mem::transmute(entry.code()) };
    assert_eq!(native(21), 42);
    assert_eq!(native(500), 1000);
    assert!(take_fault().is_none());
}

#[test]
fn test_native_entry_parks_faults() {
    let engine = native_engine();
    let entries = EntryCompiler::host().unwrap();
    let key = AdapterKey {
        signature: double_u32(),
        direction: Direction::SharedToNormal,
        target: CallTarget::Indirect,
    };
    // A null generic context is a null indirect target
    let entry = entries.compile(&engine, &key, 0).unwrap();
    assert!(Arc::ptr_eq(entry.thunk(), &engine.thunk(&key).unwrap()));

    let native: extern "C" fn(u64) -> i64 = unsafe { std::mem::transmute(entry.code()) };
    assert_eq!(native(21), 0);
    assert_eq!(take_fault(), Some(Fault::NullTarget));
}

#[test]
fn test_native_entry_bakes_generic_context() {
    let engine = native_engine();
    let entries = EntryCompiler::host().unwrap();
    let key = AdapterKey {
        signature: double_u32(),
        direction: Direction::SharedToNormal,
        target: CallTarget::Indirect,
    };
    let entry = entries.compile(&engine, &key, shared_double as usize).unwrap();
    assert_eq!(entry.generic_context(), shared_double as usize);

    let native: extern "C" fn(u64) -> i64 = unsafe { std::mem::transmute(entry.code()) };
    assert_eq!(native(7), 14);
}

// ===== Stack words, float registers, sub-word expansion =====

/// `fn(u64 x8, T, T, f64) -> f64` with `T` a type variable instantiated as u8
fn spill_mixed() -> Signature {
    let mut params = vec![Param::concrete(ValueType::uint(8)); 8];
    params.push(Param::variable(ValueType::uint(1)));
    params.push(Param::variable(ValueType::uint(1)));
    params.push(Param::concrete(ValueType::Float64));
    Signature::new(Param::concrete(ValueType::Float64), params)
}

#[allow(clippy::too_many_arguments)]
extern "C" fn normal_spill_mixed(
    a0: u64,
    a1: u64,
    a2: u64,
    a3: u64,
    a4: u64,
    a5: u64,
    a6: u64,
    a7: u64,
    x: u8,
    y: u8,
    scale: f64,
) -> f64 {
    (a0 + a1 + a2 + a3 + a4 + a5 + a6 + a7) as f64 + x as f64 * 1000.0 + y as f64 * 100_000.0 + scale
}

#[test]
fn test_invoker_passes_stack_words_and_floats() {
    let engine = native_engine();
    let key = AdapterKey {
        signature: spill_mixed(),
        direction: Direction::NormalToShared,
        target: CallTarget::Direct(normal_spill_mixed as usize),
    };
    let (caller_info, callee_info) = engine.call_infos(&key.signature, key.direction).unwrap();
    // both sub-word values land in the callee's stack area
    assert!(matches!(callee_info.args[8].storage, StorageClass::StackSlot { .. }));
    assert!(matches!(callee_info.args[9].storage, StorageClass::StackSlot { .. }));

    let thunk = engine.thunk(&key).unwrap();
    let expands = thunk
        .program()
        .moves
        .iter()
        .filter(|mv| matches!(mv.marshal, MarshalKind::ExpandByRefToByVal { value_size: 1, .. }))
        .count();
    assert_eq!(expands, 2);
    assert!(thunk.program().callee_stack_usage > 0);

    // bytes past the value are never read
    let x = [2u8, 0xff, 0xff, 0xff];
    let y = [7u8, 0xff, 0xff, 0xff];
    let mut words: Vec<u64> = (1..=8).collect();
    words.push(x.as_ptr() as u64);
    words.push(y.as_ptr() as u64);
    words.push(0.5f64.to_bits());

    let mut caller = LocationSet::new();
    for (arg, word) in caller_info.args.iter().zip(words) {
        caller.write_word(arg.storage.first_location().unwrap(), word);
    }
    unsafe { thunk.call(&mut caller, 0) };
    assert_eq!(f64::from_bits(caller.float_regs[0]), 702_036.5);
}

// ===== Panics at the entry boundary =====

struct ExplodingInvoker;

impl NativeInvoker for ExplodingInvoker {
    fn name(&self) -> &str {
        "exploding"
    }

    unsafe fn invoke(&self, _target: usize, _frame: &mut LocationSet, _stack_bytes: u32) {
        panic!("backend exploded");
    }
}

#[test]
fn test_native_entry_contains_foreign_panics() {
    let engine = native_engine();
    let key = AdapterKey {
        signature: double_u32(),
        direction: Direction::SharedToNormal,
        target: CallTarget::Direct(shared_double as usize),
    };
    let program = Arc::clone(&engine.program(&key).unwrap().program);
    let thunk = Arc::new(install_thunk(program, Arc::new(ExplodingInvoker)));
    let entry = EntryCompiler::host().unwrap().compile_thunk(thunk, 0, 0).unwrap();

    let native: extern "C" fn(u64) -> i64 = unsafe { std::mem::transmute(entry.code()) };
    assert_eq!(native(21), 0);
    assert_eq!(take_fault(), Some(Fault::Panicked));
    // the entry stays usable after a contained panic
    assert_eq!(native(4), 0);
    assert_eq!(take_fault(), Some(Fault::Panicked));
}
