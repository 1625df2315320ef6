//! Monitor subsystem contract.
//!
//! The engine owns no lock state. It asks for a fast (non-blocking,
//! allowed to fail) acquire or release at method boundaries and falls back
//! to the general blocking entry points, which may allocate, block and run
//! GC (the caller marks itself GC-safe around them). Whatever path acquired
//! a monitor, the engine guarantees release is attempted exactly once per
//! acquisition, on every exit path.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use kestrel_core::ObjRef;

use crate::env::ExecEnv;

pub trait MonitorOps: Send + Sync {
    /// Cheap best-effort acquire. Failure means "take the slow path", not
    /// an error. On hosts without thin locks this may always fail.
    fn fast_try_lock(&self, obj: ObjRef) -> bool;

    /// Cheap best-effort release; failure routes to the slow path.
    fn fast_try_unlock(&self, obj: ObjRef) -> bool;

    /// General blocking acquire. The calling thread is GC-safe for the
    /// duration. Returns false only on resource failure (e.g. lock record
    /// allocation), which the engine surfaces as OutOfMemoryError.
    fn lock(&self, env: &mut ExecEnv, obj: ObjRef) -> bool;

    /// General release, GC-safe. Returns false only on resource failure.
    fn unlock(&self, env: &mut ExecEnv, obj: ObjRef) -> bool;
}

// =============================================================================
// HashMonitor
// =============================================================================

/// Reference [`MonitorOps`] implementation: a table of per-object entry
/// counts behind one mutex. Single owner per VM thread model, recursion
/// counted. `force_slow` makes every fast path fail, for hosts (and tests)
/// without cheap thin locks.
#[derive(Debug, Default)]
pub struct HashMonitor {
    entries: Mutex<FxHashMap<ObjRef, u32>>,
    force_slow: bool,
}

impl HashMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fast path fails; all traffic goes through the blocking
    /// entry points.
    pub fn with_forced_slow_path() -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            force_slow: true,
        }
    }

    /// Current entry count of `obj`.
    pub fn entry_count(&self, obj: ObjRef) -> u32 {
        self.entries.lock().get(&obj).copied().unwrap_or(0)
    }

    /// Total held monitors.
    pub fn held_count(&self) -> usize {
        self.entries.lock().len()
    }

    fn acquire(&self, obj: ObjRef) -> bool {
        *self.entries.lock().entry(obj).or_insert(0) += 1;
        true
    }

    fn release(&self, obj: ObjRef) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(&obj) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                entries.remove(&obj);
                true
            }
            None => false,
        }
    }
}

impl MonitorOps for HashMonitor {
    fn fast_try_lock(&self, obj: ObjRef) -> bool {
        !self.force_slow && self.acquire(obj)
    }

    fn fast_try_unlock(&self, obj: ObjRef) -> bool {
        !self.force_slow && self.release(obj)
    }

    fn lock(&self, env: &mut ExecEnv, obj: ObjRef) -> bool {
        debug_assert!(env.is_gc_safe());
        self.acquire(obj)
    }

    fn unlock(&self, env: &mut ExecEnv, obj: ObjRef) -> bool {
        debug_assert!(env.is_gc_safe());
        self.release(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_lock_unlock() {
        let m = HashMonitor::new();
        let obj = ObjRef::from_raw(0x10);
        assert!(m.fast_try_lock(obj));
        assert_eq!(m.entry_count(obj), 1);
        assert!(m.fast_try_lock(obj));
        assert_eq!(m.entry_count(obj), 2);
        assert!(m.fast_try_unlock(obj));
        assert!(m.fast_try_unlock(obj));
        assert_eq!(m.entry_count(obj), 0);
        assert_eq!(m.held_count(), 0);
    }

    #[test]
    fn test_unlock_of_unheld_fails() {
        let m = HashMonitor::new();
        assert!(!m.fast_try_unlock(ObjRef::from_raw(0x10)));
    }

    #[test]
    fn test_forced_slow_path_fails_fast_ops() {
        let m = HashMonitor::with_forced_slow_path();
        let obj = ObjRef::from_raw(0x10);
        assert!(!m.fast_try_lock(obj));
        assert!(!m.fast_try_unlock(obj));
        // No state leaked by the failed fast paths.
        assert_eq!(m.entry_count(obj), 0);
    }
}
