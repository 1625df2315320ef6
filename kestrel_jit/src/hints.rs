//! Call-site inlining hint caches.
//!
//! The interpreter records which method a virtual or interface call site
//! actually invoked; the compiler later reads the hint to speculate when
//! inlining. A hint is keyed by a hash of the call-site PC masked into a
//! fixed power-of-two array, so unrelated sites may collide and overwrite
//! each other. The cache is advisory; a stale or missing hint only costs
//! optimization quality. Class unloading invalidates the whole cache.

use std::sync::atomic::{AtomicU32, Ordering};

use kestrel_core::MethodId;

/// Slots of the virtual-call hint cache. Power of two.
pub const VIRTUAL_HINT_SLOTS: usize = 128;
/// Slots of the interface-call hint cache. Power of two.
pub const INTERFACE_HINT_SLOTS: usize = 64;

const EMPTY: u32 = u32::MAX;

/// Bounded, owned hint cache: array plus mask.
#[derive(Debug)]
pub struct InlineHintCache {
    slots: Box<[AtomicU32]>,
    mask: usize,
}

impl InlineHintCache {
    /// `capacity` must be a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two());
        let slots = (0..capacity).map(|_| AtomicU32::new(EMPTY)).collect();
        Self {
            slots,
            mask: capacity - 1,
        }
    }

    /// Record that the call site keyed by `site` invoked `target`.
    #[inline]
    pub fn record(&self, site: usize, target: MethodId) {
        self.slots[site & self.mask].store(target.0, Ordering::Relaxed);
    }

    /// The last recorded target for the call site keyed by `site`.
    #[inline]
    pub fn lookup(&self, site: usize) -> Option<MethodId> {
        match self.slots[site & self.mask].load(Ordering::Relaxed) {
            EMPTY => None,
            raw => Some(MethodId(raw)),
        }
    }

    /// Drop every hint. Called when class unloading may have invalidated
    /// recorded targets.
    pub fn invalidate_all(&self) {
        for slot in self.slots.iter() {
            slot.store(EMPTY, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
