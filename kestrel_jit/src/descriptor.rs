//! Compiled-method descriptors.
//!
//! One descriptor per compiled method, created by the compiler backend and
//! immutable afterwards except for the entry counter. The execution bridge
//! reads frame shape, stack maps, inlining info and PC mapping from here;
//! the machine code itself stays behind the backend seam.

use std::sync::atomic::{AtomicU32, Ordering};

use kestrel_core::MethodId;

use crate::inlining::InliningInfo;
use crate::pcmap::PcMap;
use crate::stackmap::CompiledStackMaps;

#[derive(Debug)]
pub struct CompiledMethodDescriptor {
    method: MethodId,
    /// Compiled-code length in offset units.
    code_len: u32,
    /// Local-variable words of the compiled frame shape (inlined callees'
    /// locals included).
    max_locals: u16,
    /// Total frame words: locals plus spill area plus operand stack. Fixed
    /// at compile time; no safepoint may exceed it.
    capacity: u16,
    /// Fixed operand-stack adjustment the prologue applies. OSR bypasses
    /// the prologue and must apply it by hand.
    spill_words: u16,
    /// Code offset where interpreter-initiated calls enter.
    interp_entry: u32,
    stack_maps: CompiledStackMaps,
    inlining: Option<InliningInfo>,
    pc_map: PcMap,
    /// Racy entry counter feeding the decompilation policy.
    entry_count: AtomicU32,
    /// Pinned code (e.g. copied helper stubs) is never decompiled and its
    /// entries are not counted.
    evictable: bool,
}

impl CompiledMethodDescriptor {
    pub fn new(method: MethodId, code_len: u32, max_locals: u16, capacity: u16) -> Self {
        debug_assert!(max_locals <= capacity);
        Self {
            method,
            code_len,
            max_locals,
            capacity,
            spill_words: 0,
            interp_entry: 0,
            stack_maps: CompiledStackMaps::default(),
            inlining: None,
            pc_map: PcMap::default(),
            entry_count: AtomicU32::new(0),
            evictable: true,
        }
    }

    pub fn with_spill_words(mut self, words: u16) -> Self {
        self.spill_words = words;
        self
    }

    pub fn with_interp_entry(mut self, code_offset: u32) -> Self {
        self.interp_entry = code_offset;
        self
    }

    pub fn with_stack_maps(mut self, maps: CompiledStackMaps) -> Self {
        self.stack_maps = maps;
        self
    }

    pub fn with_inlining(mut self, info: InliningInfo) -> Self {
        self.inlining = Some(info);
        self
    }

    pub fn with_pc_map(mut self, map: PcMap) -> Self {
        self.pc_map = map;
        self
    }

    pub fn pinned(mut self) -> Self {
        self.evictable = false;
        self
    }

    #[inline]
    pub fn method(&self) -> MethodId {
        self.method
    }

    #[inline]
    pub fn code_len(&self) -> u32 {
        self.code_len
    }

    #[inline]
    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }

    #[inline]
    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    #[inline]
    pub fn spill_words(&self) -> u16 {
        self.spill_words
    }

    #[inline]
    pub fn interp_entry(&self) -> u32 {
        self.interp_entry
    }

    #[inline]
    pub fn stack_maps(&self) -> &CompiledStackMaps {
        &self.stack_maps
    }

    #[inline]
    pub fn inlining(&self) -> Option<&InliningInfo> {
        self.inlining.as_ref()
    }

    #[inline]
    pub fn pc_map(&self) -> &PcMap {
        &self.pc_map
    }

    #[inline]
    pub fn is_evictable(&self) -> bool {
        self.evictable
    }

    /// Count one entry into this code. Evictable code only; pinned code is
    /// outside the decompilation policy's reach.
    #[inline]
    pub fn count_entry(&self) {
        if self.evictable {
            self.entry_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn entry_count(&self) -> u32 {
        self.entry_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_count_evictable() {
        let cmd = CompiledMethodDescriptor::new(MethodId(0), 64, 2, 8);
        cmd.count_entry();
        cmd.count_entry();
        assert_eq!(cmd.entry_count(), 2);
    }

    #[test]
    fn test_entry_count_pinned_not_counted() {
        let cmd = CompiledMethodDescriptor::new(MethodId(0), 64, 2, 8).pinned();
        cmd.count_entry();
        assert_eq!(cmd.entry_count(), 0);
        assert!(!cmd.is_evictable());
    }

    #[test]
    fn test_builder_fields() {
        let cmd = CompiledMethodDescriptor::new(MethodId(3), 128, 4, 16)
            .with_spill_words(2)
            .with_interp_entry(8);
        assert_eq!(cmd.method(), MethodId(3));
        assert_eq!(cmd.max_locals(), 4);
        assert_eq!(cmd.capacity(), 16);
        assert_eq!(cmd.spill_words(), 2);
        assert_eq!(cmd.interp_entry(), 8);
        assert!(cmd.inlining().is_none());
    }
}
