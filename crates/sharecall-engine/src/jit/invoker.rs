//! Call-out stubs
//!
//! One stub per stack-word count, shaped by the target's register counts:
//!
//! ```text
//! extern "C" fn(target: usize, frame: *mut LocationSet)
//!     load  retbuf?, r0..rN, f0..fM, stack[0..W] from frame
//!     call_indirect target
//!     store results into frame.int_regs[..] / frame.float_regs[..]
//! ```

use cranelift_codegen::ir::{types, AbiParam, InstBuilder, MemFlags, Signature};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use sharecall_abi::TargetDesc;

use super::{stack_words, FrameShape, JitError, StubModule};
use crate::runtime::fault::{raise, Fault};
use crate::runtime::location::{LocationSet, FLOAT_REGS_OFFSET, INT_REGS_OFFSET, STACK_OFFSET};
use crate::runtime::thunk::{InvokerError, NativeInvoker};

type CallOutFn = unsafe extern "C" fn(target: usize, frame: *mut LocationSet);

/// [`NativeInvoker`] that calls native code through generated stubs
pub struct CraneliftInvoker {
    shape: FrameShape,
    target_name: String,
    /// Stack-word count → finalized stub address
    by_words: RwLock<FxHashMap<usize, usize>>,
    module: Mutex<StubModule>,
}

impl CraneliftInvoker {
    /// Invoker for the host convention
    pub fn host() -> Result<Self, JitError> {
        Self::for_target(&TargetDesc::host())
    }

    /// Invoker whose stubs move the registers `target` describes
    pub fn for_target(target: &TargetDesc) -> Result<Self, JitError> {
        let shape = FrameShape::for_target(target)?;
        Ok(CraneliftInvoker {
            shape,
            target_name: target.name.clone(),
            by_words: RwLock::new(FxHashMap::default()),
            module: Mutex::new(StubModule::new()?),
        })
    }

    /// Number of call-out stubs generated so far
    pub fn stub_count(&self) -> usize {
        self.by_words.read().len()
    }

    fn cached(&self, words: usize) -> Option<CallOutFn> {
        let addr = *self.by_words.read().get(&words)?;
        // SAFETY: every cached address was defined with the CallOutFn signature
        Some(unsafe { std::mem::transmute::<usize, CallOutFn>(addr) })
    }

    /// Call-out stub for `words` stack words, generating it on first use
    fn stub(&self, words: usize) -> Result<CallOutFn, JitError> {
        if let Some(stub) = self.cached(words) {
            return Ok(stub);
        }

        let mut module = self.module.lock();
        // Another thread may have generated it while we waited
        if let Some(stub) = self.cached(words) {
            return Ok(stub);
        }

        let shape = self.shape;
        let call_conv = module.call_conv();
        let callee_sig = shape.native_signature(call_conv, words);
        let mut sig = Signature::new(call_conv);
        sig.params.push(AbiParam::new(types::I64)); // target
        sig.params.push(AbiParam::new(types::I64)); // frame

        let code = module.define("call_out", sig, |builder, params| {
            let (target, frame) = (params[0], params[1]);
            let flags = MemFlags::trusted();
            let mut args = Vec::with_capacity(callee_sig.params.len());

            if let Some(index) = shape.return_buffer {
                let offset = INT_REGS_OFFSET + 8 * index as i32;
                args.push(builder.ins().load(types::I64, flags, frame, offset));
            }
            for i in 0..shape.int_args {
                args.push(builder.ins().load(types::I64, flags, frame, INT_REGS_OFFSET + 8 * i as i32));
            }
            for i in 0..shape.float_args {
                args.push(builder.ins().load(types::F64, flags, frame, FLOAT_REGS_OFFSET + 8 * i as i32));
            }
            for w in 0..words {
                args.push(builder.ins().load(types::I64, flags, frame, STACK_OFFSET + 8 * w as i32));
            }

            let sig_ref = builder.import_signature(callee_sig.clone());
            let call = builder.ins().call_indirect(sig_ref, target, &args);
            let results = builder.inst_results(call).to_vec();

            for (i, value) in results[..shape.int_rets].iter().enumerate() {
                builder.ins().store(flags, *value, frame, INT_REGS_OFFSET + 8 * i as i32);
            }
            for (i, value) in results[shape.int_rets..].iter().enumerate() {
                builder.ins().store(flags, *value, frame, FLOAT_REGS_OFFSET + 8 * i as i32);
            }
            builder.ins().return_(&[]);
        })?;

        tracing::debug!(target_name = %self.target_name, words, "generated call-out stub");
        self.by_words.write().insert(words, code as usize);
        // SAFETY: defined above with the CallOutFn signature
        Ok(unsafe { std::mem::transmute::<*const u8, CallOutFn>(code) })
    }
}

impl NativeInvoker for CraneliftInvoker {
    fn name(&self) -> &str {
        "cranelift"
    }

    fn prepare(&self, stack_bytes: u32) -> Result<(), InvokerError> {
        self.stub(stack_words(stack_bytes)).map(|_| ()).map_err(|e| {
            tracing::error!(target_name = %self.target_name, stack_bytes, error = %e, "call-out stub generation failed");
            InvokerError { invoker: self.name().to_string(), stack_bytes, reason: e.to_string() }
        })
    }

    unsafe fn invoke(&self, target: usize, frame: &mut LocationSet, stack_bytes: u32) {
        let words = stack_words(stack_bytes);
        match self.stub(words) {
            Ok(stub) => stub(target, frame as *mut LocationSet),
            Err(e) => {
                tracing::error!(error = %e, words, "no call-out stub");
                raise(Fault::StubUnavailable { words: words as u32 })
            }
        }
    }
}

// The JIT module is only touched under its mutex, and finalized code is immutable
unsafe impl Send for CraneliftInvoker {}
unsafe impl Sync for CraneliftInvoker {}
