//! Sharecall Call Placement Model
//!
//! Classifies a method signature into a [`CallInfo`] under one calling
//! convention: where every argument and the return value physically live
//! (registers, stack slots, register groups, float aggregates, or behind a
//! reference).
//!
//! Two conventions exist for every logical signature:
//! - **Normal**: the fully concrete convention used by instantiation-specific code
//! - **Shared**: the convention used by generically-compiled code, where
//!   value-type type variables travel by reference
//!
//! The classifier is a pure function of `(Signature, ConventionTag, TargetDesc)`;
//! [`PlacementCache`] memoizes it for the process lifetime.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod ty;
pub mod storage;
pub mod target;
pub mod classify;
pub mod cache;
pub mod error;

pub use ty::{HfaShape, Param, Signature, Signedness, ValueType, MAX_VALUE_ALIGN, MAX_VALUE_SIZE};
pub use storage::{
    align_to, Area, ArgPlacement, ByteSpan, CallInfo, ConventionTag, Location, RegBank,
    StorageClass, FLOAT_REG_CELLS, INT_REG_CELLS, RETURN_FLOAT_CELLS, RETURN_INT_CELLS, STACK_CELLS, WORD,
};
pub use target::{ReturnBufferPlacement, StackPacking, SubSlotPlacement, TargetDesc};
pub use classify::{CallPlacement, Classifier};
pub use cache::PlacementCache;
pub use error::PlacementError;
