//! Placement cache
//!
//! Memoizes [`CallInfo`] per (signature, convention) for the lifetime of the
//! cache, one map per convention so a hit borrows the signature. Classification is pure, so two threads missing on the same key at
//! once both compute it and the first insert wins.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::classify::CallPlacement;
use crate::error::PlacementError;
use crate::storage::{CallInfo, ConventionTag};
use crate::target::TargetDesc;
use crate::ty::Signature;

/// Thread-safe memo of computed placements
pub struct PlacementCache<P: CallPlacement> {
    placement: P,
    /// Signature → normal-convention placement
    normal: RwLock<FxHashMap<Signature, Arc<CallInfo>>>,
    /// Signature → shared-convention placement
    shared: RwLock<FxHashMap<Signature, Arc<CallInfo>>>,
    /// Number of times classification actually ran
    computed: AtomicUsize,
}

impl<P: CallPlacement> PlacementCache<P> {
    /// Wrap a placement model
    pub fn new(placement: P) -> Self {
        PlacementCache {
            placement,
            normal: RwLock::new(FxHashMap::default()),
            shared: RwLock::new(FxHashMap::default()),
            computed: AtomicUsize::new(0),
        }
    }

    fn entries(&self, convention: ConventionTag) -> &RwLock<FxHashMap<Signature, Arc<CallInfo>>> {
        match convention {
            ConventionTag::Normal => &self.normal,
            ConventionTag::Shared => &self.shared,
        }
    }

    /// Placement of `sig` under `convention`, computing it on first use
    pub fn get(&self, sig: &Signature, convention: ConventionTag) -> Result<Arc<CallInfo>, PlacementError> {
        let entries = self.entries(convention);
        if let Some(info) = entries.read().get(sig) {
            return Ok(Arc::clone(info));
        }

        let info = Arc::new(self.placement.compute_call_info(sig, convention)?);
        self.computed.fetch_add(1, Ordering::Relaxed);

        let mut entries = entries.write();
        let entry = entries.entry(sig.clone()).or_insert(info);
        Ok(Arc::clone(entry))
    }

    /// Target of the wrapped placement model
    pub fn target(&self) -> &TargetDesc {
        self.placement.target()
    }

    /// Number of cached placements
    pub fn len(&self) -> usize {
        self.normal.read().len() + self.shared.read().len()
    }

    /// Whether nothing has been cached yet
    pub fn is_empty(&self) -> bool {
        self.normal.read().is_empty() && self.shared.read().is_empty()
    }

    /// Number of classifications performed (including lost races)
    pub fn computed(&self) -> usize {
        self.computed.load(Ordering::Relaxed)
    }
}
