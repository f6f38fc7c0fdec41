//! Call-time faults
//!
//! A crossing performs the same dereferences a direct call would, one level of
//! indirection later, so it fails the same way: it never returns normally.
//! Faults unwind with a typed [`Fault`] payload that the embedding runtime (or
//! a test) can recover with `std::panic::catch_unwind` and `downcast_ref`.

/// A fault raised while crossing conventions
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    /// Virtual or delegate dispatch found a null receiver
    #[error("null receiver in virtual dispatch")]
    NullReceiver,
    /// A by-reference argument pointed nowhere
    #[error("null by-reference source for argument {arg}")]
    NullReference {
        /// Caller argument index
        arg: u16,
    },
    /// The resolved call target was null
    #[error("null indirect call target")]
    NullTarget,
    /// The caller passed a null buffer for an indirect return
    #[error("null return buffer")]
    NullReturnBuffer,
    /// The invoker has no way to make a call with this many stack words
    #[error("no call-out stub for {words} stack words")]
    StubUnavailable {
        /// Stack words of the call
        words: u32,
    },
    /// A panic without a fault payload reached a native boundary
    #[error("panic while crossing conventions")]
    Panicked,
}

/// Raise `fault` on the platform unwind path
#[cold]
#[inline(never)]
pub fn raise(fault: Fault) -> ! {
    std::panic::panic_any(fault)
}

/// Run `f`, returning the fault it raised if any
///
/// Panics that do not carry a [`Fault`] are resumed unchanged.
pub fn catch_fault<R>(f: impl FnOnce() -> R) -> Result<R, Fault> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<Fault>() {
            Ok(fault) => Err(*fault),
            Err(other) => std::panic::resume_unwind(other),
        },
    }
}

/// Run `f`, turning every panic into a fault
///
/// For boundaries no unwind may cross. Panics that do not carry a [`Fault`]
/// are logged and reported as [`Fault::Panicked`].
pub fn catch_any<R>(f: impl FnOnce() -> R) -> Result<R, Fault> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<Fault>() {
            Ok(fault) => Err(*fault),
            Err(other) => {
                let message = other
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| other.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("non-string payload");
                tracing::error!(payload = message, "panic caught at native boundary");
                Err(Fault::Panicked)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catch_fault() {
        assert_eq!(catch_fault(|| 7), Ok(7));
        assert_eq!(catch_fault(|| raise(Fault::NullTarget)), Err::<(), _>(Fault::NullTarget));
    }

    #[test]
    #[should_panic(expected = "not a fault")]
    fn test_foreign_panic_is_resumed() {
        let _ = catch_fault(|| panic!("not a fault"));
    }

    #[test]
    fn test_catch_any_contains_foreign_panics() {
        assert_eq!(catch_any(|| 7), Ok(7));
        assert_eq!(catch_any::<()>(|| raise(Fault::NullReceiver)), Err(Fault::NullReceiver));
        assert_eq!(catch_any::<()>(|| panic!("index out of range")), Err(Fault::Panicked));
        let owned = String::from("formatted");
        assert_eq!(catch_any::<()>(move || panic!("{}", owned)), Err(Fault::Panicked));
    }
}
