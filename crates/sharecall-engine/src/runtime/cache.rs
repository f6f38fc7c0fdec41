//! Program cache
//!
//! Stores adapter programs indexed by (signature, direction, call target).
//! Building a program is a pure function of its key, so concurrent first
//! callers may both build; the first insert wins and the others adopt the
//! published entry. Each entry owns the once-installed thunk for its program.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use sharecall_abi::Signature;

use crate::adapter::program::{AdapterProgram, CallTarget, Direction};
use crate::runtime::thunk::{install_thunk, NativeInvoker, TransitionThunk};

/// Identity of one convention boundary
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdapterKey {
    /// Logical signature of the call
    pub signature: Signature,
    /// Which way the call crosses
    pub direction: Direction,
    /// How the callee is found
    pub target: CallTarget,
}

/// Entry in the program cache
pub struct ProgramEntry {
    /// The published program
    pub program: Arc<AdapterProgram>,
    /// Thunk, installed on first crossing
    thunk: OnceCell<Arc<TransitionThunk>>,
}

impl ProgramEntry {
    fn new(program: AdapterProgram) -> Self {
        ProgramEntry { program: Arc::new(program), thunk: OnceCell::new() }
    }

    /// The thunk for this program, installing it with `invoker` on first use
    pub fn thunk(&self, invoker: &Arc<dyn NativeInvoker>) -> Arc<TransitionThunk> {
        let thunk = self
            .thunk
            .get_or_init(|| Arc::new(install_thunk(Arc::clone(&self.program), Arc::clone(invoker))));
        Arc::clone(thunk)
    }

    /// Whether the thunk has been installed
    pub fn has_thunk(&self) -> bool {
        self.thunk.get().is_some()
    }
}

/// Outcome of [`ProgramCache::insert`]
#[derive(Clone)]
pub enum Insert {
    /// The program was published under its key
    Published(Arc<ProgramEntry>),
    /// Another program was already published; the caller adopts it
    Adopted(Arc<ProgramEntry>),
    /// The cache is full
    Full,
}

impl Insert {
    /// The entry now published for the key, if any
    pub fn entry(self) -> Option<Arc<ProgramEntry>> {
        match self {
            Insert::Published(entry) | Insert::Adopted(entry) => Some(entry),
            Insert::Full => None,
        }
    }
}

/// Thread-safe cache of adapter programs
pub struct ProgramCache {
    /// Key → published entry
    entries: RwLock<FxHashMap<AdapterKey, Arc<ProgramEntry>>>,
    /// Inserts that lost a race and adopted the winner's entry
    adopted: AtomicUsize,
    /// Maximum number of entries
    max_entries: usize,
}

impl ProgramCache {
    /// Create a cache holding at most `max_entries` programs
    pub fn new(max_entries: usize) -> Self {
        ProgramCache {
            entries: RwLock::new(FxHashMap::default()),
            adopted: AtomicUsize::new(0),
            max_entries,
        }
    }

    /// Look up the published entry for `key`
    pub fn lookup(&self, key: &AdapterKey) -> Option<Arc<ProgramEntry>> {
        self.entries.read().get(key).cloned()
    }

    /// Publish `program` for `key`.
    ///
    /// If another thread already published an entry for `key`, that entry is
    /// adopted and `program` is dropped.
    pub fn insert(&self, key: AdapterKey, program: AdapterProgram) -> Insert {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&key) {
            self.adopted.fetch_add(1, Ordering::Relaxed);
            return Insert::Adopted(Arc::clone(existing));
        }
        if entries.len() >= self.max_entries {
            return Insert::Full;
        }
        let entry = Arc::new(ProgramEntry::new(program));
        entries.insert(key, Arc::clone(&entry));
        Insert::Published(entry)
    }

    /// Check if a program is published for `key`
    pub fn contains(&self, key: &AdapterKey) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Number of published programs
    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Number of inserts that adopted an existing entry
    pub fn adopted_count(&self) -> usize {
        self.adopted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::program::ReturnMarshal;
    use crate::runtime::thunk::FrameInvoker;
    use sharecall_abi::{Param, ValueType};

    fn key(target: usize) -> AdapterKey {
        AdapterKey {
            signature: Signature::new(Param::variable(ValueType::int(4)), vec![]),
            direction: Direction::SharedToNormal,
            target: CallTarget::Direct(target),
        }
    }

    fn make_dummy_program(target: usize) -> AdapterProgram {
        AdapterProgram {
            direction: Direction::SharedToNormal,
            moves: vec![],
            arg_count: 0,
            callee_stack_usage: 0,
            return_marshal: ReturnMarshal::None,
            return_area: None,
            call_target: CallTarget::Direct(target),
            receiver: None,
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let cache = ProgramCache::new(16);
        assert!(cache.lookup(&key(1)).is_none());

        let entry = cache.insert(key(1), make_dummy_program(1)).entry().unwrap();
        assert!(cache.contains(&key(1)));
        assert!(Arc::ptr_eq(&entry, &cache.lookup(&key(1)).unwrap()));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_second_insert_adopts_first() {
        let cache = ProgramCache::new(16);
        let Insert::Published(first) = cache.insert(key(1), make_dummy_program(1)) else {
            panic!("first insert should publish");
        };
        let Insert::Adopted(second) = cache.insert(key(1), make_dummy_program(1)) else {
            panic!("second insert should adopt");
        };
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.adopted_count(), 1);
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_cache_full() {
        let cache = ProgramCache::new(2);
        assert!(cache.insert(key(1), make_dummy_program(1)).entry().is_some());
        assert!(cache.insert(key(2), make_dummy_program(2)).entry().is_some());
        // Cache is now full (2/2)
        assert!(matches!(cache.insert(key(3), make_dummy_program(3)), Insert::Full));
        // Existing keys are still served
        assert!(matches!(cache.insert(key(2), make_dummy_program(2)), Insert::Adopted(_)));
        assert_eq!(cache.entry_count(), 2);
    }

    #[test]
    fn test_thunk_installed_once() {
        let cache = ProgramCache::new(4);
        let entry = cache.insert(key(1), make_dummy_program(1)).entry().unwrap();
        assert!(!entry.has_thunk());
        let invoker: Arc<dyn NativeInvoker> = Arc::new(FrameInvoker);
        let a = entry.thunk(&invoker);
        let b = entry.thunk(&invoker);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(entry.has_thunk());
    }
}
