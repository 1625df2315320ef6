//! On-stack replacement.
//!
//! Promotes a live interpreted activation to its compiled form without
//! returning from it. The interpreted frame is re-shaped in place into a
//! compiled frame; the receiver rides out the swap in the env's scratch
//! root, so no collection can observe a half-converted frame with the
//! monitor object uncovered. Legal only at compiler-declared resumable
//! bytecode PCs; anything else is a VM-internal contract bug, not a
//! recoverable condition.

use kestrel_core::{Slot, VmException};
use tracing::trace;

use crate::env::ExecEnv;
use crate::frame::FrameKind;
use crate::invoke::{return_to_compiled, CompiledResult};
use crate::stack::SlotAddr;

/// Replace the current interpreted frame with a compiled one and resume at
/// the compiled code mapped to `bytecode_pc`.
pub fn osr_enter(env: &mut ExecEnv, bytecode_pc: u32) -> CompiledResult {
    let Some(frame) = env.stack.current() else {
        debug_assert!(false, "on-stack replacement without a frame");
        return CompiledResult::Return;
    };
    let old = *env.stack.frame(frame);
    debug_assert!(old.kind == FrameKind::Java);
    let method = old.method;

    let Some(cmd) = env.jit().code_cache().lookup(method) else {
        debug_assert!(false, "on-stack replacement of an uncompiled method");
        env.throw(VmException::internal("frame replacement without code"));
        return CompiledResult::Exception;
    };
    let mb = env.methods().get(method).clone();

    // Pin the method against decompilation while the frame is in flux.
    env.set_invoke_guard(method);

    // The receiver leaves the frame before the swap and returns after it;
    // the scratch root keeps it visible throughout.
    debug_assert!(env.sync_scratch().is_null_ref());
    env.set_sync_scratch(old.receiver);

    let replaced = match env.stack.replace_frame(
        FrameKind::Compiled,
        method,
        cmd.max_locals(),
        cmd.capacity(),
    ) {
        Ok(replaced) => replaced,
        Err(_) => {
            // Callers verify the replacement fits before entering; this is
            // not a runtime condition.
            debug_assert!(false, "pre-verified frame replacement failed");
            env.set_sync_scratch(Slot::ZERO);
            env.clear_invoke_guard();
            env.throw(VmException::stack_overflow(mb.name().to_string()));
            return CompiledResult::Exception;
        }
    };

    if replaced.relocated {
        // The swap grew the stack: carry the interpreted locals into the
        // new chunk, and drop the old chunk if the frame was all it held.
        let new_base = {
            let f = env.stack.frame(frame);
            SlotAddr {
                chunk: f.chunk(),
                index: f.base(),
            }
        };
        env.stack.copy_words(
            SlotAddr {
                chunk: replaced.old_chunk,
                index: replaced.old_base,
            },
            new_base,
            mb.max_locals() as u32,
        );
        if replaced.old_base == 0 {
            env.stack.release_chunk(replaced.old_chunk);
        }
        trace!(
            method = mb.name(),
            bytecode_pc,
            "osr: interpreted to compiled across stack chunk"
        );
    } else {
        trace!(method = mb.name(), bytecode_pc, "osr: interpreted to compiled");
    }

    // Receiver back in its cell; scratch root cleared.
    let saved = env.sync_scratch();
    env.stack.frame_mut(frame).receiver = saved;
    env.set_sync_scratch(Slot::ZERO);

    let Some(entry) = cmd.pc_map().java_to_compiled_strict(bytecode_pc) else {
        env.clear_invoke_guard();
        env.throw(VmException::internal(format!(
            "bytecode pc {bytecode_pc} is not a resumable entry point"
        )));
        return CompiledResult::Exception;
    };

    // OSR bypasses the method prologue, so its fixed operand-stack
    // adjustment is applied by hand.
    {
        let f = env.stack.frame_mut(frame);
        f.pc = entry;
        f.tos = f.opstack_base() + cmd.spill_words() as u32;
    }

    env.clear_invoke_guard();
    cmd.count_entry();

    // From here the frame is a perfectly ordinary compiled frame.
    return_to_compiled(env, None)
}
