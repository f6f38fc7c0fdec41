//! Cranelift-generated native stubs
//!
//! Two kinds of stub bridge location sets and physical registers:
//!
//! - **Call-out** ([`CraneliftInvoker`]): loads a callee location set into
//!   argument registers and stack words, calls the target, and stores the
//!   return registers back.
//! - **Entry** ([`EntryCompiler`]): a native function that captures its
//!   incoming registers into a location set on its own frame and hands it to
//!   a transition thunk.
//!
//! Both treat every argument register as a full 64-bit cell, so the stubs
//! depend only on the target's register counts, never on a signature.

pub mod entry;
pub mod invoker;

use std::sync::Arc;

use cranelift_codegen::ir::{self, AbiParam, ArgumentPurpose, InstBuilder};
use cranelift_codegen::isa::{CallConv, TargetIsa};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module};
use sharecall_abi::{ReturnBufferPlacement, TargetDesc};
use target_lexicon::PointerWidth;

use crate::config::EngineConfig;
use crate::engine::{AdapterEngine, EngineError};
use crate::runtime::location::{MAX_FLOAT_REGS, MAX_INT_REGS, MAX_STACK_WORDS, RETURN_FLOAT_REGS, RETURN_INT_REGS};

pub use entry::{take_fault, EntryCompiler, NativeEntry};
pub use invoker::CraneliftInvoker;

/// Error generating native stubs
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    /// The native ISA could not be configured
    #[error("Backend error: {0}")]
    Backend(String),

    /// Declaring, defining or finalizing a stub failed
    #[error("Module error: {0}")]
    Module(#[from] cranelift_module::ModuleError),

    /// Register counts beyond what a location set holds
    #[error("Target '{0}' does not fit in a location set")]
    UnsupportedTarget(String),

    /// The thunk behind an entry could not be produced
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// ISA for the host machine
pub fn host_isa() -> Result<Arc<dyn TargetIsa>, JitError> {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("opt_level", "speed")
        .map_err(|e| JitError::Backend(format!("Failed to set opt_level: {}", e)))?;
    // Stubs are called through raw addresses only
    flag_builder
        .set("is_pic", "false")
        .map_err(|e| JitError::Backend(format!("Failed to set is_pic: {}", e)))?;

    let flags = settings::Flags::new(flag_builder);

    let isa = cranelift_native::builder()
        .map_err(|e| JitError::Backend(format!("Failed to create native ISA builder: {}", e)))?
        .finish(flags)
        .map_err(|e| JitError::Backend(format!("Failed to finish ISA: {}", e)))?;

    // Location set cells are 64-bit words
    match isa.triple().pointer_width() {
        Ok(PointerWidth::U64) => Ok(isa),
        _ => Err(JitError::UnsupportedTarget(isa.triple().to_string())),
    }
}

impl AdapterEngine {
    /// Engine whose thunks call native code through generated stubs for `config.target`
    pub fn native(config: EngineConfig) -> Result<Self, JitError> {
        let invoker = CraneliftInvoker::for_target(&config.target)?;
        Ok(AdapterEngine::with_config(config, Arc::new(invoker)))
    }
}

/// Register counts a native stub moves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameShape {
    /// Integer argument registers
    pub int_args: usize,
    /// Float argument registers
    pub float_args: usize,
    /// Integer return registers
    pub int_rets: usize,
    /// Float return registers
    pub float_rets: usize,
    /// Integer cell of the dedicated return-buffer register, if any
    pub return_buffer: Option<usize>,
}

impl FrameShape {
    pub(crate) fn for_target(target: &TargetDesc) -> Result<Self, JitError> {
        let return_buffer = match target.return_buffer {
            ReturnBufferPlacement::DedicatedRegister { index } => Some(index as usize),
            ReturnBufferPlacement::FirstArgument => None,
        };
        let shape = FrameShape {
            int_args: target.int_arg_regs as usize,
            float_args: target.float_arg_regs as usize,
            int_rets: target.int_ret_regs as usize,
            float_rets: target.float_ret_regs as usize,
            return_buffer,
        };
        if shape.int_args > MAX_INT_REGS
            || shape.float_args > MAX_FLOAT_REGS
            || shape.int_rets > RETURN_INT_REGS
            || shape.float_rets > RETURN_FLOAT_REGS
            || shape.return_buffer.is_some_and(|i| i >= MAX_INT_REGS)
        {
            return Err(JitError::UnsupportedTarget(target.name.clone()));
        }
        Ok(shape)
    }

    /// Native signature taking every argument cell plus `stack_words` stack words.
    ///
    /// Parameter order: return buffer, integer registers, float registers,
    /// stack words.
    pub(crate) fn native_signature(&self, call_conv: CallConv, stack_words: usize) -> ir::Signature {
        let mut sig = ir::Signature::new(call_conv);
        if self.return_buffer.is_some() {
            sig.params.push(AbiParam::special(ir::types::I64, ArgumentPurpose::StructReturn));
        }
        sig.params.extend((0..self.int_args).map(|_| AbiParam::new(ir::types::I64)));
        sig.params.extend((0..self.float_args).map(|_| AbiParam::new(ir::types::F64)));
        sig.params.extend((0..stack_words).map(|_| AbiParam::new(ir::types::I64)));
        sig.returns.extend((0..self.int_rets).map(|_| AbiParam::new(ir::types::I64)));
        sig.returns.extend((0..self.float_rets).map(|_| AbiParam::new(ir::types::F64)));
        sig
    }
}

/// Number of stack words needed for `stack_bytes`
pub(crate) fn stack_words(stack_bytes: u32) -> usize {
    (stack_bytes.div_ceil(8) as usize).min(MAX_STACK_WORDS)
}

/// JIT module that stubs are defined into
pub(crate) struct StubModule {
    module: JITModule,
    builder_ctx: FunctionBuilderContext,
    next_id: u32,
}

impl StubModule {
    pub(crate) fn new() -> Result<Self, JitError> {
        let isa = host_isa()?;
        let builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        Ok(StubModule {
            module: JITModule::new(builder),
            builder_ctx: FunctionBuilderContext::new(),
            next_id: 0,
        })
    }

    pub(crate) fn call_conv(&self) -> CallConv {
        self.module.isa().default_call_conv()
    }

    /// Define, finalize, and return the address of one stub.
    ///
    /// `body` receives the builder positioned in the entry block and the
    /// function's parameters; it must emit the terminator.
    pub(crate) fn define(
        &mut self,
        prefix: &str,
        sig: ir::Signature,
        body: impl FnOnce(&mut FunctionBuilder<'_>, &[ir::Value]),
    ) -> Result<*const u8, JitError> {
        let name = format!("{}_{}", prefix, self.next_id);
        self.next_id += 1;

        let id = self.module.declare_function(&name, Linkage::Local, &sig)?;
        let mut ctx = self.module.make_context();
        ctx.func.signature = sig;
        {
            let mut builder = FunctionBuilder::new(&mut ctx.func, &mut self.builder_ctx);
            let block = builder.create_block();
            builder.append_block_params_for_function_params(block);
            builder.switch_to_block(block);
            builder.seal_block(block);
            let params = builder.block_params(block).to_vec();
            body(&mut builder, &params);
            builder.finalize();
        }
        self.module.define_function(id, &mut ctx)?;
        self.module.clear_context(&mut ctx);
        self.module.finalize_definitions()?;

        tracing::trace!(stub = %name, "defined native stub");
        Ok(self.module.get_finalized_function(id))
    }
}

/// Emit an `i64` constant for a host pointer or integer
pub(crate) fn iconst_ptr(builder: &mut FunctionBuilder<'_>, value: usize) -> ir::Value {
    builder.ins().iconst(ir::types::I64, value as i64)
}
