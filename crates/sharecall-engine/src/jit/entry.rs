//! Native entry stubs
//!
//! An entry stub is the address handed to native callers in place of the
//! real target. It has the caller convention's register shape:
//!
//! ```text
//! fn(retbuf?, r0..rN, f0..fM, stack[0..W]) -> (r0..rR, f0..fS)
//!     frame = zeroed LocationSet on the stub's stack
//!     store every incoming cell into frame
//!     dispatch(thunk, &frame, generic_context)
//!     return the frame's return registers
//! ```
//!
//! Nothing may unwind through native frames, so the dispatcher catches every
//! panic, zeroes the return registers, and parks the fault for
//! [`take_fault`]. A panic without a fault payload is parked as
//! [`Fault::Panicked`].

use std::cell::Cell;
use std::sync::Arc;

use cranelift_codegen::ir::{types, AbiParam, InstBuilder, MemFlags, Signature, StackSlotData, StackSlotKind};
use parking_lot::Mutex;
use sharecall_abi::TargetDesc;

use super::{iconst_ptr, stack_words, FrameShape, JitError, StubModule};
use crate::engine::AdapterEngine;
use crate::runtime::cache::AdapterKey;
use crate::runtime::fault::{catch_any, Fault};
use crate::runtime::location::{LocationSet, FLOAT_REGS_OFFSET, INT_REGS_OFFSET, STACK_OFFSET};
use crate::runtime::thunk::TransitionThunk;

thread_local! {
    static LAST_FAULT: Cell<Option<Fault>> = const { Cell::new(None) };
}

/// Take the fault raised by the last native entry call on this thread
pub fn take_fault() -> Option<Fault> {
    LAST_FAULT.with(|f| f.take())
}

unsafe extern "C" fn dispatch_entry(thunk: *const TransitionThunk, frame: *mut LocationSet, generic_context: usize) {
    let thunk = &*thunk;
    let frame = &mut *frame;
    if let Err(fault) = catch_any(|| unsafe { thunk.call(frame, generic_context) }) {
        tracing::debug!(%fault, "fault in native entry");
        frame.int_regs.fill(0);
        frame.float_regs.fill(0);
        LAST_FAULT.with(|f| f.set(Some(fault)));
    }
}

/// A generated native entry point bound to one thunk
pub struct NativeEntry {
    code: *const u8,
    thunk: Arc<TransitionThunk>,
    generic_context: usize,
}

impl NativeEntry {
    /// Address native callers call
    pub fn code(&self) -> *const u8 {
        self.code
    }

    /// Thunk this entry dispatches to
    pub fn thunk(&self) -> &Arc<TransitionThunk> {
        &self.thunk
    }

    /// Generic context baked into the entry
    pub fn generic_context(&self) -> usize {
        self.generic_context
    }
}

// The code is immutable and the thunk is Send + Sync
unsafe impl Send for NativeEntry {}
unsafe impl Sync for NativeEntry {}

impl std::fmt::Debug for NativeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeEntry")
            .field("code", &self.code)
            .field("thunk", &self.thunk)
            .field("generic_context", &self.generic_context)
            .finish()
    }
}

/// Generates native entry stubs for one target
pub struct EntryCompiler {
    shape: FrameShape,
    stubs: Mutex<StubModule>,
}

impl EntryCompiler {
    /// Entry compiler for the host convention
    pub fn host() -> Result<Self, JitError> {
        Self::for_target(&TargetDesc::host())
    }

    /// Entry compiler whose stubs capture the registers `target` describes
    pub fn for_target(target: &TargetDesc) -> Result<Self, JitError> {
        Ok(EntryCompiler { shape: FrameShape::for_target(target)?, stubs: Mutex::new(StubModule::new()?) })
    }

    /// Native entry for the boundary `key`, dispatching through `engine`'s thunk
    pub fn compile(
        &self,
        engine: &AdapterEngine,
        key: &AdapterKey,
        generic_context: usize,
    ) -> Result<NativeEntry, JitError> {
        let thunk = engine.thunk(key)?;
        let (caller, _) = engine.call_infos(&key.signature, key.direction)?;
        self.compile_thunk(thunk, caller.stack_usage, generic_context)
    }

    /// Native entry for `thunk`, capturing `caller_stack_bytes` of incoming stack arguments
    pub fn compile_thunk(
        &self,
        thunk: Arc<TransitionThunk>,
        caller_stack_bytes: u32,
        generic_context: usize,
    ) -> Result<NativeEntry, JitError> {
        let shape = self.shape;
        let words = stack_words(caller_stack_bytes);
        let thunk_ptr = Arc::as_ptr(&thunk) as usize;

        let mut stubs = self.stubs.lock();
        let call_conv = stubs.call_conv();
        let sig = shape.native_signature(call_conv, words);

        let mut dispatch_sig = Signature::new(call_conv);
        dispatch_sig.params.extend((0..3).map(|_| AbiParam::new(types::I64)));

        let code = stubs.define("entry", sig, |builder, params| {
            let flags = MemFlags::trusted();
            let size = std::mem::size_of::<LocationSet>() as u32;
            let slot = builder.create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, size, 3));

            let zero = builder.ins().iconst(types::I64, 0);
            for offset in (0..size as i32).step_by(8) {
                builder.ins().stack_store(zero, slot, offset);
            }

            let mut params = params.iter().copied();
            if let Some(index) = shape.return_buffer {
                if let Some(value) = params.next() {
                    builder.ins().stack_store(value, slot, INT_REGS_OFFSET + 8 * index as i32);
                }
            }
            for (i, value) in params.by_ref().take(shape.int_args).enumerate() {
                builder.ins().stack_store(value, slot, INT_REGS_OFFSET + 8 * i as i32);
            }
            for (i, value) in params.by_ref().take(shape.float_args).enumerate() {
                builder.ins().stack_store(value, slot, FLOAT_REGS_OFFSET + 8 * i as i32);
            }
            for (w, value) in params.enumerate() {
                builder.ins().stack_store(value, slot, STACK_OFFSET + 8 * w as i32);
            }

            let frame = builder.ins().stack_addr(types::I64, slot, 0);
            let thunk_arg = iconst_ptr(builder, thunk_ptr);
            let context_arg = iconst_ptr(builder, generic_context);
            let dispatch = iconst_ptr(builder, dispatch_entry as usize);
            let sig_ref = builder.import_signature(dispatch_sig);
            builder.ins().call_indirect(sig_ref, dispatch, &[thunk_arg, frame, context_arg]);

            let mut results = Vec::with_capacity(shape.int_rets + shape.float_rets);
            for i in 0..shape.int_rets {
                results.push(builder.ins().load(types::I64, flags, frame, INT_REGS_OFFSET + 8 * i as i32));
            }
            for i in 0..shape.float_rets {
                results.push(builder.ins().load(types::F64, flags, frame, FLOAT_REGS_OFFSET + 8 * i as i32));
            }
            builder.ins().return_(&results);
        })?;

        tracing::debug!(
            direction = %thunk.program().direction,
            words,
            generic_context,
            "generated native entry"
        );
        Ok(NativeEntry { code, thunk, generic_context })
    }
}

// The JIT module is only touched under the stub mutex
unsafe impl Send for EntryCompiler {}
unsafe impl Sync for EntryCompiler {}
