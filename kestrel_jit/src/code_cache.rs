//! Code cache: method → compiled-descriptor registry.
//!
//! Read-mostly shared state. The compiler backend inserts and removes
//! descriptors; every execution thread does lock-free-ish lookups through
//! a read lock on the hot path. Memory management of the machine code
//! itself (allocation, eviction budgets) belongs to the backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use kestrel_core::MethodId;

use crate::descriptor::CompiledMethodDescriptor;

#[derive(Debug, Default)]
pub struct CodeCache {
    map: RwLock<FxHashMap<MethodId, Arc<CompiledMethodDescriptor>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Lookup statistics, for tuning.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeCacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register compiled code for a method, replacing any previous code.
    pub fn insert(
        &self,
        descriptor: CompiledMethodDescriptor,
    ) -> Option<Arc<CompiledMethodDescriptor>> {
        let method = descriptor.method();
        self.map.write().insert(method, Arc::new(descriptor))
    }

    /// Descriptor for `method`, if compiled.
    pub fn lookup(&self, method: MethodId) -> Option<Arc<CompiledMethodDescriptor>> {
        let found = self.map.read().get(&method).cloned();
        match &found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    #[inline]
    pub fn is_compiled(&self, method: MethodId) -> bool {
        self.map.read().contains_key(&method)
    }

    /// Drop a method's compiled code (decompilation).
    pub fn remove(&self, method: MethodId) -> Option<Arc<CompiledMethodDescriptor>> {
        self.map.write().remove(&method)
    }

    /// Compiled entry offset mapped to `bytecode_pc` of `method`, with the
    /// descriptor it belongs to. Backend query used by OSR decisions.
    pub fn entry_for_java_pc(
        &self,
        method: MethodId,
        bytecode_pc: u32,
    ) -> Option<(Arc<CompiledMethodDescriptor>, u32)> {
        let cmd = self.map.read().get(&method).cloned()?;
        let offset = cmd.pc_map().java_to_compiled(bytecode_pc)?;
        Some((cmd, offset))
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    pub fn stats(&self) -> CodeCacheStats {
        CodeCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcmap::{PcMap, PcMapEntry};

    #[test]
    fn test_insert_lookup_remove() {
        let cache = CodeCache::new();
        assert!(cache.lookup(MethodId(1)).is_none());

        cache.insert(CompiledMethodDescriptor::new(MethodId(1), 32, 1, 4));
        assert!(cache.is_compiled(MethodId(1)));
        assert!(cache.lookup(MethodId(1)).is_some());

        cache.remove(MethodId(1));
        assert!(!cache.is_compiled(MethodId(1)));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_entry_for_java_pc() {
        let cache = CodeCache::new();
        let cmd = CompiledMethodDescriptor::new(MethodId(2), 32, 1, 4).with_pc_map(PcMap::new(
            vec![PcMapEntry {
                bytecode_pc: 5,
                code_offset: 12,
                osr_resumable: true,
            }],
        ));
        cache.insert(cmd);

        let (cmd, offset) = cache.entry_for_java_pc(MethodId(2), 5).unwrap();
        assert_eq!(offset, 12);
        assert_eq!(cmd.method(), MethodId(2));
        assert!(cache.entry_for_java_pc(MethodId(2), 6).is_none());
        assert!(cache.entry_for_java_pc(MethodId(9), 5).is_none());
    }

    #[test]
    fn test_reinsert_replaces() {
        let cache = CodeCache::new();
        cache.insert(CompiledMethodDescriptor::new(MethodId(1), 32, 1, 4));
        let old = cache.insert(CompiledMethodDescriptor::new(MethodId(1), 64, 2, 8));
        assert!(old.is_some());
        assert_eq!(cache.lookup(MethodId(1)).unwrap().code_len(), 64);
        assert_eq!(cache.len(), 1);
    }
}
