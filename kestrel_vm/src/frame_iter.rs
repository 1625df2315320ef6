//! Iterating the logical activations of one compiled frame.
//!
//! Inlining merges callee activations into the caller's physical frame, so
//! one compiled frame can stand for several logical method activations. The
//! iterator walks the inlining entries whose compiled-code range contains
//! the frame's PC, innermost first, and always ends at the physically
//! pushed outermost activation. To recover source call order, traverse the
//! visited activations backwards.

use std::sync::Arc;

use kestrel_core::MethodId;
use kestrel_jit::descriptor::CompiledMethodDescriptor;
use kestrel_jit::inlining::{InliningEntry, FRAMEFLAG_ARTIFICIAL};
use kestrel_jit::CodeCache;

use crate::frame::FrameKind;
use crate::stack::{FrameId, SlotAddr, VmStack};

/// Which logical activation the cursor addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// An inlined activation, read-only; `usize` is its inlining-table
    /// index.
    Inlined(usize),
    /// The outermost, physically pushed activation.
    Outer,
}

/// Where a synchronized activation keeps its locked monitor object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCell {
    /// The physical frame's receiver cell.
    Receiver,
    /// A local word of the enclosing frame (inlined activations save the
    /// receiver into their local area).
    Local(SlotAddr),
}

/// Stack-local cursor over one compiled frame's activations. Never
/// persisted; construct, walk, drop.
#[derive(Debug, Clone)]
pub struct FrameIterator {
    frame: FrameId,
    method: MethodId,
    cmd: Arc<CompiledMethodDescriptor>,
    pc_offset: u32,
    /// −1 before the first activation; `num_entries` is the outermost
    /// sentinel.
    index: i32,
    num_entries: i32,
}

impl FrameIterator {
    /// Build a cursor positioned before the first activation matching the
    /// frame's current PC.
    pub fn new(stack: &VmStack, frame: FrameId, cmd: Arc<CompiledMethodDescriptor>) -> Self {
        let f = stack.frame(frame);
        debug_assert!(f.kind == FrameKind::Compiled);
        debug_assert!(cmd.method() == f.method);
        debug_assert!(!f.at_return_sentinel());
        let num_entries = cmd.inlining().map_or(0, |info| info.len()) as i32;
        Self {
            frame,
            method: f.method,
            cmd,
            pc_offset: f.pc,
            index: -1,
            num_entries,
        }
    }

    #[inline]
    fn entry(&self, index: i32) -> &InliningEntry {
        &self.cmd.inlining().expect("no inlining table").entries()[index as usize]
    }

    /// Advance to the next activation, skipping `skip` additional matches.
    ///
    /// With `skip_artificial`, compiler-synthesized activations (and an
    /// artificial outermost frame) are passed over. `pop` is accepted for
    /// call-site symmetry with frame popping but performs no frame
    /// mutation here. Returns whether the cursor still addresses an
    /// activation.
    pub fn advance(
        &mut self,
        skip: u32,
        skip_artificial: bool,
        pop: bool,
        stack: &VmStack,
    ) -> bool {
        let mut skip = skip as i32;
        let mut found;
        loop {
            self.index += 1;
            found = false;
            while self.index < self.num_entries {
                let e = self.entry(self.index);
                if e.contains(self.pc_offset) && !(skip_artificial && e.is_artificial()) {
                    found = true;
                    break;
                }
                self.index += 1;
            }
            if found {
                skip -= 1;
                if skip > 0 {
                    continue;
                }
            }
            break;
        }

        if self.index == self.num_entries
            && skip_artificial
            && stack.frame(self.frame).flags & FRAMEFLAG_ARTIFICIAL != 0
        {
            self.index += 1;
        }

        if !found && skip > 0 {
            // Normally still at the sentinel here; an artificial outermost
            // frame was already stepped past above.
            debug_assert!(self.index >= self.num_entries);
            self.index += 1;
        }

        let _ = pop;

        self.index <= self.num_entries
    }

    /// Advance one activation (artificial ones skipped).
    #[inline]
    pub fn next(&mut self, stack: &VmStack) -> bool {
        self.advance(0, true, false, stack)
    }

    /// Advance one activation while logically popping the one just left.
    #[inline]
    pub fn pop(&mut self, stack: &VmStack) -> bool {
        self.advance(0, true, true, stack)
    }

    /// Total activations reachable from here, the outermost included.
    /// Consumes the cursor's position.
    pub fn count(&mut self, skip_artificial: bool, stack: &VmStack) -> u32 {
        let mut count = 0;
        while self.advance(0, skip_artificial, false, stack) {
            count += 1;
        }
        count
    }

    /// The activation the cursor addresses.
    #[inline]
    pub fn activation(&self) -> Activation {
        debug_assert!(self.index >= 0 && self.index <= self.num_entries);
        if self.index < self.num_entries {
            Activation::Inlined(self.index as usize)
        } else {
            Activation::Outer
        }
    }

    #[inline]
    pub fn is_inlined(&self) -> bool {
        matches!(self.activation(), Activation::Inlined(_))
    }

    /// Only the outermost activation can run exception handlers; inlined
    /// activations' handlers were compiled into the enclosing method.
    #[inline]
    pub fn handles_exceptions(&self) -> bool {
        matches!(self.activation(), Activation::Outer)
    }

    /// Current activation's method.
    pub fn method(&self) -> MethodId {
        match self.activation() {
            Activation::Outer => self.method,
            Activation::Inlined(i) => {
                let e = self.entry(i as i32);
                debug_assert!(e.contains(self.pc_offset));
                e.method
            }
        }
    }

    /// Bytecode PC of the current activation. Inlined activations have no
    /// materialized bytecode PC.
    pub fn java_pc(&self, stack: &VmStack) -> Option<u32> {
        match self.activation() {
            Activation::Outer => self
                .cmd
                .pc_map()
                .compiled_to_java(stack.frame(self.frame).pc),
            Activation::Inlined(_) => None,
        }
    }

    /// Redirect the outermost activation to `bytecode_pc`.
    ///
    /// Legal only at the outermost activation: an inlined activation is
    /// read-only, and rewriting its PC would corrupt control flow.
    pub fn set_java_pc(&self, stack: &mut VmStack, bytecode_pc: u32) {
        debug_assert!(
            matches!(self.activation(), Activation::Outer),
            "pc of an inlined activation is read-only"
        );
        if let Some(offset) = self.cmd.pc_map().java_to_compiled(bytecode_pc) {
            stack.frame_mut(self.frame).pc = offset;
        } else {
            debug_assert!(false, "bytecode pc {bytecode_pc} is not mapped");
        }
    }

    /// Address of the current activation's first local word.
    pub fn locals_base(&self, stack: &VmStack) -> SlotAddr {
        let first_local = match self.activation() {
            Activation::Outer => 0,
            Activation::Inlined(i) => self.entry(i as i32).first_local,
        };
        let f = stack.frame(self.frame);
        SlotAddr {
            chunk: f.chunk(),
            index: f.base() + first_local as u32,
        }
    }

    /// Where the current activation keeps its locked monitor object.
    pub fn sync_object(&self, stack: &VmStack) -> SyncCell {
        match self.activation() {
            Activation::Outer => SyncCell::Receiver,
            Activation::Inlined(i) => {
                let e = self.entry(i as i32);
                let f = stack.frame(self.frame);
                SyncCell::Local(SlotAddr {
                    chunk: f.chunk(),
                    index: f.base() + (e.first_local + e.sync_object_word) as u32,
                })
            }
        }
    }

    /// Current activation's flags.
    pub fn flags(&self, stack: &VmStack) -> u8 {
        match self.activation() {
            Activation::Outer => stack.frame(self.frame).flags,
            Activation::Inlined(i) => {
                let e = self.entry(i as i32);
                debug_assert!(e.contains(self.pc_offset));
                e.flags
            }
        }
    }

    /// Set the outermost activation's flags. Inlined activations are
    /// read-only.
    pub fn set_flags(&self, stack: &mut VmStack, flags: u8) {
        debug_assert!(
            matches!(self.activation(), Activation::Outer),
            "flags of an inlined activation are read-only"
        );
        stack.frame_mut(self.frame).flags = flags;
    }

    /// Whether the current activation's compiled-code range contains
    /// `code_offset`. For the outermost activation every in-method offset
    /// qualifies.
    pub fn contains_pc(&self, code_offset: u32) -> bool {
        match self.activation() {
            Activation::Outer => {
                debug_assert!(code_offset < self.cmd.code_len());
                true
            }
            Activation::Inlined(i) => self.entry(i as i32).contains(code_offset),
        }
    }

    /// The physical frame, addressable only from the outermost activation.
    pub fn physical_frame(&self) -> FrameId {
        debug_assert!(matches!(self.activation(), Activation::Outer));
        self.frame
    }
}

/// Innermost logical method of a frame: for a compiled frame the method of
/// the innermost inlined activation at its PC, else the frame's own method.
pub fn frame_method(stack: &VmStack, cache: &CodeCache, frame: FrameId) -> MethodId {
    let f = stack.frame(frame);
    if f.kind == FrameKind::Compiled {
        if let Some(cmd) = cache.lookup(f.method) {
            if let Some(info) = cmd.inlining() {
                if let Some(entry) = info.innermost_at(f.pc) {
                    return entry.method;
                }
            }
        }
    }
    f.method
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::MethodId;
    use kestrel_jit::inlining::InliningInfo;

    fn entry(start: u32, end: u32, method: u32, first_local: u16, flags: u8) -> InliningEntry {
        InliningEntry {
            start_offset: start,
            end_offset: end,
            method: MethodId(method),
            first_local,
            sync_object_word: 0,
            flags,
        }
    }

    fn compiled_frame(
        stack: &mut VmStack,
        cmd: &Arc<CompiledMethodDescriptor>,
        pc: u32,
    ) -> FrameId {
        let pushed = stack
            .push_frame(
                FrameKind::Compiled,
                cmd.method(),
                0,
                cmd.max_locals(),
                cmd.capacity(),
                None,
            )
            .unwrap();
        stack.frame_mut(pushed.frame).pc = pc;
        pushed.frame
    }

    fn cmd_with_entries(entries: Vec<InliningEntry>) -> Arc<CompiledMethodDescriptor> {
        Arc::new(
            CompiledMethodDescriptor::new(MethodId(0), 64, 6, 16)
                .with_inlining(InliningInfo::new(entries)),
        )
    }

    #[test]
    fn test_no_inlining_single_activation() {
        let mut stack = VmStack::new();
        let cmd = Arc::new(CompiledMethodDescriptor::new(MethodId(0), 64, 2, 8));
        let frame = compiled_frame(&mut stack, &cmd, 10);

        let mut iter = FrameIterator::new(&stack, frame, cmd.clone());
        assert_eq!(iter.count(false, &stack), 1);

        let mut iter = FrameIterator::new(&stack, frame, cmd);
        assert!(iter.next(&stack));
        assert_eq!(iter.activation(), Activation::Outer);
        assert_eq!(iter.method(), MethodId(0));
        assert!(iter.handles_exceptions());
        assert!(!iter.next(&stack));
    }

    #[test]
    fn test_inlined_walk_innermost_first() {
        // pc 12 is inside both entries; entry order is innermost-first.
        let cmd = cmd_with_entries(vec![entry(10, 20, 2, 4, 0), entry(0, 40, 1, 2, 0)]);
        let mut stack = VmStack::new();
        let frame = compiled_frame(&mut stack, &cmd, 12);

        let mut iter = FrameIterator::new(&stack, frame, cmd.clone());
        let mut methods = Vec::new();
        while iter.advance(0, false, false, &stack) {
            methods.push(iter.method());
        }
        assert_eq!(methods, vec![MethodId(2), MethodId(1), MethodId(0)]);

        let mut iter = FrameIterator::new(&stack, frame, cmd);
        assert_eq!(iter.count(false, &stack), 3);
    }

    #[test]
    fn test_pc_outside_inlined_ranges() {
        let cmd = cmd_with_entries(vec![entry(10, 20, 2, 4, 0), entry(0, 40, 1, 2, 0)]);
        let mut stack = VmStack::new();
        let frame = compiled_frame(&mut stack, &cmd, 45);

        let mut iter = FrameIterator::new(&stack, frame, cmd);
        assert_eq!(iter.count(false, &stack), 1);
    }

    #[test]
    fn test_skip_artificial_entries() {
        let cmd = cmd_with_entries(vec![
            entry(0, 40, 2, 4, FRAMEFLAG_ARTIFICIAL),
            entry(0, 40, 1, 2, 0),
        ]);
        let mut stack = VmStack::new();
        let frame = compiled_frame(&mut stack, &cmd, 5);

        let mut iter = FrameIterator::new(&stack, frame, cmd.clone());
        assert_eq!(iter.count(true, &stack), 2);
        let mut iter = FrameIterator::new(&stack, frame, cmd.clone());
        assert_eq!(iter.count(false, &stack), 3);

        let mut iter = FrameIterator::new(&stack, frame, cmd);
        assert!(iter.next(&stack));
        assert_eq!(iter.method(), MethodId(1));
    }

    #[test]
    fn test_skip_artificial_outer_frame() {
        let cmd = Arc::new(CompiledMethodDescriptor::new(MethodId(0), 64, 2, 8));
        let mut stack = VmStack::new();
        let frame = compiled_frame(&mut stack, &cmd, 0);
        stack.frame_mut(frame).flags |= FRAMEFLAG_ARTIFICIAL;

        let mut iter = FrameIterator::new(&stack, frame, cmd.clone());
        assert_eq!(iter.count(true, &stack), 0);
        let mut iter = FrameIterator::new(&stack, frame, cmd);
        assert_eq!(iter.count(false, &stack), 1);
    }

    #[test]
    fn test_locals_base_per_activation() {
        let cmd = cmd_with_entries(vec![entry(10, 20, 2, 4, 0), entry(0, 40, 1, 2, 0)]);
        let mut stack = VmStack::new();
        let frame = compiled_frame(&mut stack, &cmd, 12);
        let base = stack.frame(frame).base();

        let mut iter = FrameIterator::new(&stack, frame, cmd);
        assert!(iter.advance(0, false, false, &stack));
        assert_eq!(iter.locals_base(&stack).index, base + 4);
        assert!(iter.advance(0, false, false, &stack));
        assert_eq!(iter.locals_base(&stack).index, base + 2);
        assert!(iter.advance(0, false, false, &stack));
        assert_eq!(iter.locals_base(&stack).index, base);
        assert_eq!(iter.sync_object(&stack), SyncCell::Receiver);
    }

    #[test]
    fn test_sync_object_of_inlined_activation() {
        let mut e = entry(0, 40, 1, 2, 0);
        e.sync_object_word = 1;
        let cmd = cmd_with_entries(vec![e]);
        let mut stack = VmStack::new();
        let frame = compiled_frame(&mut stack, &cmd, 4);
        let base = stack.frame(frame).base();

        let mut iter = FrameIterator::new(&stack, frame, cmd);
        assert!(iter.advance(0, false, false, &stack));
        match iter.sync_object(&stack) {
            SyncCell::Local(addr) => assert_eq!(addr.index, base + 3),
            SyncCell::Receiver => panic!("expected local sync cell"),
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn test_set_java_pc_on_inlined_asserts() {
        let cmd = cmd_with_entries(vec![entry(0, 40, 1, 2, 0)]);
        let mut stack = VmStack::new();
        let frame = compiled_frame(&mut stack, &cmd, 4);
        let mut iter = FrameIterator::new(&stack, frame, cmd);
        assert!(iter.advance(0, false, false, &stack));
        assert!(iter.is_inlined());
        iter.set_java_pc(&mut stack, 0);
    }

    #[test]
    fn test_frame_method_innermost() {
        let cache = CodeCache::new();
        let cmd = CompiledMethodDescriptor::new(MethodId(0), 64, 6, 16)
            .with_inlining(InliningInfo::new(vec![entry(10, 20, 2, 4, 0)]));
        cache.insert(cmd);

        let mut stack = VmStack::new();
        let pushed = stack
            .push_frame(FrameKind::Compiled, MethodId(0), 0, 6, 16, None)
            .unwrap();
        stack.frame_mut(pushed.frame).pc = 12;
        assert_eq!(frame_method(&stack, &cache, pushed.frame), MethodId(2));

        stack.frame_mut(pushed.frame).pc = 30;
        assert_eq!(frame_method(&stack, &cache, pushed.frame), MethodId(0));
    }
}
