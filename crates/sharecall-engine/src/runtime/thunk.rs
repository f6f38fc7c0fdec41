//! Transition thunks
//!
//! A thunk is the callable that sits at a convention boundary. Each call:
//!   caller LocationSet → interpret() → callee LocationSet → NativeInvoker::invoke()
//!   → adapt_return() → caller LocationSet holds the result
//!
//! The destination set lives on the thunk's own frame. Getting physical
//! registers into and out of location sets is the invoker's job
//! ([`FrameInvoker`] for frame-convention callees, `jit::CraneliftInvoker` for
//! native code).

use std::sync::Arc;

use crate::adapter::interpreter::interpret;
use crate::adapter::program::AdapterProgram;
use crate::adapter::ret::adapt_return;
use crate::runtime::location::LocationSet;

/// Entry point of code that takes its arguments as a location set
///
/// The callee reads its arguments from the set and leaves its return
/// registers in it.
pub type FrameEntryFn = unsafe extern "C" fn(frame: *mut LocationSet);

/// An invoker cannot make calls of some shape
#[derive(Debug, thiserror::Error)]
#[error("Invoker '{invoker}' cannot call with {stack_bytes} stack bytes: {reason}")]
pub struct InvokerError {
    /// Name of the invoker
    pub invoker: String,
    /// Stack-argument bytes of the rejected shape
    pub stack_bytes: u32,
    /// What went wrong
    pub reason: String,
}

/// Performs the real call once the callee's location set is ready
pub trait NativeInvoker: Send + Sync {
    /// Invoker name (for diagnostics)
    fn name(&self) -> &str;

    /// Get ready for calls with `stack_bytes` of stack arguments.
    ///
    /// Runs before a thunk is installed, so anything that can fail (code
    /// generation, say) fails here instead of inside `invoke`.
    fn prepare(&self, _stack_bytes: u32) -> Result<(), InvokerError> {
        Ok(())
    }

    /// Call `target` with the arguments in `frame`, leaving the callee's
    /// return registers in `frame`.
    ///
    /// # Safety
    ///
    /// `target` must be callable with the register and stack shape `frame`
    /// and `stack_bytes` describe.
    unsafe fn invoke(&self, target: usize, frame: &mut LocationSet, stack_bytes: u32);
}

/// Invoker for callees that use the [`FrameEntryFn`] convention
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameInvoker;

impl NativeInvoker for FrameInvoker {
    fn name(&self) -> &str {
        "frame"
    }

    unsafe fn invoke(&self, target: usize, frame: &mut LocationSet, _stack_bytes: u32) {
        let entry: FrameEntryFn = std::mem::transmute(target);
        entry(frame as *mut LocationSet);
    }
}

/// The callable installed at one convention boundary
pub struct TransitionThunk {
    program: Arc<AdapterProgram>,
    invoker: Arc<dyn NativeInvoker>,
}

impl TransitionThunk {
    /// Cross the boundary: `caller` holds the arguments in the caller's
    /// convention on entry and the return value in the caller's convention
    /// on exit.
    ///
    /// # Safety
    ///
    /// The arguments in `caller` must be valid for the program's signature,
    /// and the resolved target must accept the callee convention.
    pub unsafe fn call(&self, caller: &mut LocationSet, generic_context: usize) {
        let mut callee = LocationSet::new();
        let target = interpret(&self.program, caller, &mut callee, generic_context);
        self.invoker.invoke(target, &mut callee, self.program.callee_stack_usage);
        adapt_return(&self.program, caller, &callee);
    }

    /// Program this thunk executes
    pub fn program(&self) -> &Arc<AdapterProgram> {
        &self.program
    }

    /// Name of the invoker performing the real call
    pub fn invoker_name(&self) -> &str {
        self.invoker.name()
    }
}

impl std::fmt::Debug for TransitionThunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionThunk")
            .field("direction", &self.program.direction)
            .field("moves", &self.program.moves.len())
            .field("invoker", &self.invoker.name())
            .finish()
    }
}

/// Build the thunk for `program`
pub fn install_thunk(program: Arc<AdapterProgram>, invoker: Arc<dyn NativeInvoker>) -> TransitionThunk {
    tracing::trace!(
        direction = %program.direction,
        moves = program.moves.len(),
        invoker = invoker.name(),
        "installing transition thunk"
    );
    TransitionThunk { program, invoker }
}
