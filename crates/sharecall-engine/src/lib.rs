//! Sharecall Cross-Convention Call Adapter
//!
//! Bridges calls between the **normal** calling convention (fully concrete,
//! instantiation-specific code) and the **shared** convention (generic code
//! where value-type type variables travel by reference).
//!
//! - **Adapter**: move-program compiler, move interpreter, and return adapter
//!   (`adapter` module)
//! - **Runtime**: location sets, faults, transition thunks, and the program
//!   cache (`runtime` module)
//! - **Engine**: facade tying placement, building, caching, and thunk
//!   installation together (`engine` module)
//! - **JIT**: Cranelift-generated native stubs (`jit` module, `jit` feature)
//!
//! # Example
//!
//! ```rust,ignore
//! use sharecall_abi::{Param, Signature, ValueType};
//! use sharecall_engine::{AdapterEngine, AdapterKey, CallTarget, Direction, FrameInvoker};
//!
//! let engine = AdapterEngine::new(Arc::new(FrameInvoker));
//! let key = AdapterKey {
//!     signature: Signature::new(Param::variable(ValueType::uint(1)), vec![Param::variable(ValueType::uint(1))]),
//!     direction: Direction::SharedToNormal,
//!     target: CallTarget::Direct(shared_identity as usize),
//! };
//! let thunk = engine.thunk(&key)?;
//! unsafe { thunk.call(&mut caller_frame, 0) };
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod adapter;
pub mod runtime;
pub mod config;
pub mod engine;

#[cfg(feature = "jit")]
pub mod jit;

pub use adapter::compiler::{build_adapter, BuildError};
pub use adapter::interpreter::interpret;
pub use adapter::program::{
    AdapterProgram, ArgId, CallTarget, Direction, FloatWidth, MarshalKind, MoveDescriptor, ReturnArea,
    ReturnMarshal, ReturnShape, SubWordWidth, VerifyError,
};
pub use adapter::ret::adapt_return;
pub use config::{ConfigError, EngineConfig};
pub use engine::{AdapterEngine, EngineError};
pub use runtime::cache::{AdapterKey, Insert, ProgramCache, ProgramEntry};
pub use runtime::fault::{catch_any, catch_fault, Fault};
pub use runtime::location::LocationSet;
pub use runtime::thunk::{install_thunk, FrameEntryFn, FrameInvoker, InvokerError, NativeInvoker, TransitionThunk};
