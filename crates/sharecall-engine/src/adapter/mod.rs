//! Move programs
//!
//! The adapter pipeline, leaf to root:
//!   (caller CallInfo, callee CallInfo) → build_adapter() → AdapterProgram
//!   AdapterProgram + caller LocationSet → interpret() → callee LocationSet + target
//!   callee LocationSet (after the call) → adapt_return() → caller LocationSet
//!
//! Programs hold only relative locations and are reusable for every call
//! across the same boundary.

pub mod program;
pub mod compiler;
pub mod interpreter;
pub mod ret;
