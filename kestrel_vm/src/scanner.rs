//! Compiled-frame GC root scanner.
//!
//! Called by the collector once per compiled frame. Reports every live
//! reference slot exactly once (never a dead slot, never a duplicate)
//! by walking the safepoint's bitmap over the locals and operand stack,
//! plus the monitor cells and declaring classes of every logical
//! activation the frame stands for.
//!
//! Outgoing call-argument words are owned by whichever frame treats them
//! as *incoming*: the caller skips its top `param_words` exactly when a
//! non-native callee frame exists to cover them.

use smallvec::SmallVec;
use tracing::trace;

use kestrel_core::{ClassId, Slot};

use crate::env::ExecEnv;
use crate::frame_iter::{FrameIterator, SyncCell};
use crate::stack::FrameId;

/// GC callback: receives every live reference slot and every
/// to-be-reported declaring class.
pub trait RootVisitor {
    fn visit_slot(&mut self, slot: &mut Slot);
    fn visit_class(&mut self, class: ClassId);
}

impl ExecEnv {
    /// Scan one compiled frame. `callee` is the frame pushed above it, if
    /// any; `None` means this is the thread's innermost frame.
    pub fn scan_compiled_frame(
        &mut self,
        frame: FrameId,
        callee: Option<FrameId>,
        visitor: &mut dyn RootVisitor,
    ) {
        let f = *self.stack.frame(frame);
        debug_assert!(f.is_compiled());
        let Some(cmd) = self.jit().code_cache().lookup(f.method) else {
            debug_assert!(false, "compiled frame without a descriptor");
            return;
        };
        let mb = self.methods().get(f.method).clone();
        let max_locals = cmd.max_locals();

        trace!(
            method = mb.name(),
            pc = f.pc,
            max_locals,
            "scanning compiled frame"
        );

        // A frame parked at its return sentinel has consumed its last
        // safepoint; only the result words (one reference at the bottom of
        // the frame, if any) and the receiver are still live.
        if f.at_return_sentinel() {
            debug_assert!(callee.is_none());
            if mb.return_kind().is_reference() {
                let slot = self.stack.slot_mut(f.frame_word(0));
                if !slot.is_null_ref() {
                    visitor.visit_slot(slot);
                }
            }
            if mb.is_synchronized() {
                visitor.visit_slot(&mut self.stack.frame_mut(frame).receiver);
            }
            return;
        }

        // Resolve the safepoint map. A miss is legal only mid-unwind: the
        // operand stack is being discarded, and the locals that matter are
        // described at whatever handler the exception transfers to.
        let mut map_offset = f.pc;
        if cmd.stack_maps().lookup(map_offset).is_none() {
            debug_assert!(
                self.is_unwinding(frame),
                "no stack map at offset {} outside exception unwind",
                map_offset
            );

            let handler_offset = cmd
                .pc_map()
                .compiled_to_java(f.pc)
                .and_then(|bc| mb.innermost_handler_for(bc))
                .and_then(|handler_bc| cmd.pc_map().java_to_compiled(handler_bc));

            let Some(handler_offset) = handler_offset else {
                // No handler here: the frame is getting blown away. Null
                // the locals so a stale reference cannot be mistaken for a
                // caller argument, then report only the monitor cells
                // still owed an unlock.
                for word in 0..max_locals {
                    self.stack.slot_mut(f.frame_word(word)).clear();
                }
                self.scan_sync_cells(frame, &cmd, visitor, None);
                return;
            };

            // The handler's own safepoint describes the surviving locals.
            // Activations between the faulting PC and the handler are
            // being unwound: their monitor cells are the only roots left.
            debug_assert!(cmd.stack_maps().lookup(handler_offset).is_some());
            self.scan_sync_cells(frame, &cmd, visitor, Some(handler_offset));
            map_offset = handler_offset;
        }

        let Some(view) = cmd.stack_maps().lookup(map_offset) else {
            return;
        };
        debug_assert!(view.total_words >= max_locals);

        // Locals, then the operand stack: the bitmap is consecutive over
        // both ranges.
        let own_params = match callee {
            // Innermost frame, or calling out through a native boundary:
            // the outgoing arguments are still ours to report.
            None => true,
            Some(c) => self.stack.frame(c).is_transition(),
        };
        let scan_words = if own_params {
            view.total_words
        } else {
            view.total_words - view.param_words
        };

        for word in 0..max_locals.min(scan_words) {
            if view.is_live(word) {
                let slot = self.stack.slot_mut(f.frame_word(word));
                if !slot.is_null_ref() {
                    visitor.visit_slot(slot);
                }
            }
        }
        for word in max_locals..scan_words {
            if view.is_live(word) {
                let slot = self.stack.slot_mut(f.frame_word(word));
                if !slot.is_null_ref() {
                    visitor.visit_slot(slot);
                }
            }
        }

        // Declaring classes of every activation, for class-unloading
        // safety. Unconditionally rooted classes need no report.
        let mut iter = FrameIterator::new(&self.stack, frame, cmd.clone());
        let mut seen: SmallVec<[ClassId; 8]> = SmallVec::new();
        while iter.advance(0, false, false, &self.stack) {
            let class = self.methods().get(iter.method()).class();
            if !seen.contains(&class) {
                seen.push(class);
                if !self.classes().get(class).is_rooted() {
                    visitor.visit_class(class);
                }
            }
        }

        // And last, the physical receiver of a synchronized outermost
        // method.
        if mb.is_synchronized() {
            visitor.visit_slot(&mut self.stack.frame_mut(frame).receiver);
        }
    }

    /// Report the monitor cells of synchronized activations.
    ///
    /// With `until_offset`, only activations *not* containing that offset
    /// are reported: those between the faulting PC and the handler's
    /// activation, which are being unwound. Without it, every activation
    /// reports (the whole frame is being discarded).
    fn scan_sync_cells(
        &mut self,
        frame: FrameId,
        cmd: &std::sync::Arc<kestrel_jit::CompiledMethodDescriptor>,
        visitor: &mut dyn RootVisitor,
        until_offset: Option<u32>,
    ) {
        let mut iter = FrameIterator::new(&self.stack, frame, cmd.clone());
        let mut reached_handler = false;
        while iter.advance(0, false, false, &self.stack) {
            if let Some(offset) = until_offset {
                if iter.contains_pc(offset) {
                    reached_handler = true;
                    break;
                }
            }
            if self.methods().get(iter.method()).is_synchronized() {
                match iter.sync_object(&self.stack) {
                    SyncCell::Receiver => {
                        visitor.visit_slot(&mut self.stack.frame_mut(frame).receiver);
                    }
                    SyncCell::Local(addr) => {
                        let slot = self.stack.slot_mut(addr);
                        visitor.visit_slot(slot);
                    }
                }
            }
        }
        debug_assert!(until_offset.is_none() || reached_handler);
    }
}

// =============================================================================
// Tests
// =============================================================================
