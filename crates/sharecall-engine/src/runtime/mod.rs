//! Call-time runtime
//!
//! Everything that runs while a call crosses between conventions: the
//! stack-resident location sets, the fault path, transition thunks, and the
//! program cache that owns them.

pub mod location;
pub mod fault;
pub mod thunk;
pub mod cache;
