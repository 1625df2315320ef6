//! The invocation trampoline.
//!
//! A cooperative state machine on the current thread's own stack: one
//! explicit loop dispatches interpreted ⇄ compiled ⇄ native calls so that
//! tier crossings never grow the host call stack. Each iteration either
//! transfers control into compiled code, hands a method back to the
//! interpreter (`NewMb`/`NewTransition`), or finishes with `Return` /
//! `Exception`. Internal codes never leak past the caller; `Exception`
//! always travels with a pending `VmException` on the env.

use kestrel_core::{InvokerKind, MethodId, ObjRef, Slot, VmException};
use tracing::trace;

use crate::env::{CniArgs, CniResult, ExecEnv};
use crate::frame::{FrameKind, PC_GC_AT_RETURN};
use crate::stack::SlotAddr;

/// What the engine reports to the compiled-code entry stub that called it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompiledResult {
    /// Control returned to a non-compiled caller; result words already
    /// transferred.
    Return,
    /// The target must be run by the external interpreter.
    NewMb(MethodId),
    /// A native transition frame is on top; the interpreter takes over.
    NewTransition(MethodId),
    /// A pending exception must unwind. Never swallowed, never retried
    /// here.
    Exception,
}

enum EngineState {
    /// Inspect the next target; `None` means the current frame is
    /// returning.
    CheckTarget(Option<MethodId>),
    /// Dispatch on the target's invoker kind. `args_base` is the chunk
    /// index of the first outgoing argument word in the current frame.
    Dispatch {
        target: MethodId,
        args_base: u32,
    },
    /// Transfer control into the current (compiled) frame at its pc.
    ReturnToCompiled,
}

/// Run the trampoline starting from `target` (the method a compiled or
/// interpreted caller wants invoked, its arguments on the current frame's
/// operand stack), or from a returning frame when `target` is `None`.
pub fn invoke_compiled(env: &mut ExecEnv, target: Option<MethodId>) -> CompiledResult {
    let mut state = EngineState::CheckTarget(target);
    loop {
        state = match state {
            EngineState::CheckTarget(None) => match handle_return(env) {
                Flow::Continue(next) => next,
                Flow::Done(result) => return result,
            },
            EngineState::CheckTarget(Some(target)) => {
                let Some(frame) = env.stack.current() else {
                    debug_assert!(false, "invocation without a frame");
                    return CompiledResult::Return;
                };
                let args = env.methods().get(target).args_size() as u32;
                let args_base = env.stack.frame(frame).tos - args;
                EngineState::Dispatch { target, args_base }
            }
            EngineState::Dispatch { target, args_base } => {
                match dispatch(env, target, args_base) {
                    Flow::Continue(next) => next,
                    Flow::Done(result) => return result,
                }
            }
            EngineState::ReturnToCompiled => {
                let Some(frame) = env.stack.current() else {
                    debug_assert!(false, "no frame to resume");
                    return CompiledResult::Return;
                };
                debug_assert!(env.stack.frame(frame).is_compiled());
                let exec = env.exec();
                EngineState::CheckTarget(exec.run(env, frame, None))
            }
        };
    }
}

/// Resume a compiled frame (delivering `exception` to its handler when
/// present) and keep trampolining from whatever it does next. Entry point
/// for the interpreter returning into compiled code and for OSR.
pub fn return_to_compiled(env: &mut ExecEnv, exception: Option<ObjRef>) -> CompiledResult {
    let Some(frame) = env.stack.current() else {
        debug_assert!(false, "no frame to resume");
        return CompiledResult::Return;
    };
    debug_assert!(env.stack.frame(frame).is_compiled());
    let exec = env.exec();
    let next = exec.run(env, frame, exception);
    invoke_compiled(env, next)
}

enum Flow {
    Continue(EngineState),
    Done(CompiledResult),
}

// =============================================================================
// Returning
// =============================================================================

fn handle_return(env: &mut ExecEnv) -> Flow {
    // Exception first: the frame state may be stale when one is pending.
    if env.has_pending() {
        return Flow::Done(CompiledResult::Exception);
    }

    let Some(frame) = env.stack.current() else {
        debug_assert!(false, "return without a frame");
        return Flow::Done(CompiledResult::Return);
    };
    let f = *env.stack.frame(frame);

    // A transition frame on top means a native boundary crossing, not a
    // method return.
    if f.is_transition() {
        return Flow::Done(CompiledResult::NewTransition(f.method));
    }

    debug_assert!(f.is_compiled());
    let mb = env.methods().get(f.method).clone();
    trace!(method = mb.name(), "compiled method returning");

    if mb.is_synchronized() {
        let receiver = f.receiver.as_ref();
        let monitor = env.monitor();
        if !monitor.fast_try_unlock(receiver) {
            // Park the frame at its return sentinel so a collection during
            // the blocking release still sees the result words.
            env.stack.frame_mut(frame).pc = PC_GC_AT_RETURN;
            let ok = env.gc_safe_exec(|env| monitor.unlock(env, receiver));
            if !ok {
                env.throw(VmException::out_of_memory("monitor release"));
                return Flow::Done(CompiledResult::Exception);
            }
        }
    }

    env.stack.pop_frame(mb.return_kind().words());

    match env.stack.current() {
        Some(caller) if env.stack.frame(caller).is_compiled() => {
            Flow::Continue(EngineState::ReturnToCompiled)
        }
        _ => Flow::Done(CompiledResult::Return),
    }
}

// =============================================================================
// Dispatch
// =============================================================================

fn dispatch(env: &mut ExecEnv, target: MethodId, args_base: u32) -> Flow {
    let mb = env.methods().get(target).clone();
    match mb.invoker() {
        InvokerKind::Java => invoke_java(env, target, args_base),
        InvokerKind::Cni => invoke_cni(env, target, args_base),
        InvokerKind::Jni => {
            trace!(method = mb.name(), "invoking framed native method");
            let invoke = env.jni_invoke();
            if invoke(env, target) {
                Flow::Continue(EngineState::ReturnToCompiled)
            } else {
                debug_assert!(env.has_pending());
                Flow::Done(CompiledResult::Exception)
            }
        }
        InvokerKind::Abstract => {
            env.throw(VmException::abstract_method(qualified_name(env, target)));
            Flow::Done(CompiledResult::Exception)
        }
        InvokerKind::NonPublicMiranda => {
            env.throw(VmException::illegal_access(format!(
                "access non-public method {} through an interface",
                qualified_name(env, target)
            )));
            Flow::Done(CompiledResult::Exception)
        }
        InvokerKind::MissingInterfaceMiranda => {
            env.throw(VmException::abstract_method(qualified_name(env, target)));
            Flow::Done(CompiledResult::Exception)
        }
        InvokerKind::LazyNative => {
            // Resolution may block and allocate.
            let resolved = match env.resolver() {
                Some(resolver) => env.gc_safe_exec(|env| resolver.resolve(env, target)),
                None => false,
            };
            if !resolved {
                env.throw(VmException::unsatisfied_link(qualified_name(env, target)));
                return Flow::Done(CompiledResult::Exception);
            }
            // The resolver re-kinded the method; dispatch again on the
            // same argument window.
            debug_assert!(env.methods().get(target).invoker() != InvokerKind::LazyNative);
            Flow::Continue(EngineState::Dispatch { target, args_base })
        }
    }
}

fn invoke_java(env: &mut ExecEnv, target: MethodId, args_base: u32) -> Flow {
    let mb = env.methods().get(target).clone();
    let config = env.jit().config().clone();

    let Some(cmd) = env.jit().code_cache().lookup(target) else {
        // Hand the call to the interpreter. This crossing makes the callee
        // more desirable to compile; the interpreter-transition cost is
        // added back because the interpreter's own bookkeeping will
        // subtract it again; the invocation must count as one mixed
        // crossing, not also as an interpreted one.
        let old = mb.invoke_cost();
        let cost =
            (old - config.mixed_transition_cost + config.interpreter_transition_cost).max(0);
        if cost != old {
            mb.set_invoke_cost(cost);
        }
        return Flow::Done(CompiledResult::NewMb(target));
    };

    let Some(caller) = env.stack.current() else {
        debug_assert!(false, "invocation without a frame");
        return Flow::Done(CompiledResult::Return);
    };
    let caller_frame = *env.stack.frame(caller);

    // The symmetric half of the cost bookkeeping: an interpreted caller
    // entering compiled code becomes more desirable to compile. A
    // transition frame has no method to account to (and may carry an
    // abstract placeholder).
    if !caller_frame.is_transition() {
        env.methods()
            .get(caller_frame.method)
            .nudge_invoke_cost(config.mixed_transition_cost);
    }

    let receiver = if mb.is_static() {
        env.classes().get(mb.class()).mirror()
    } else {
        env.stack
            .slot(SlotAddr {
                chunk: caller_frame.chunk(),
                index: args_base,
            })
            .as_ref()
    };

    // Pin the target so a decompilation pass during a GC-safe window
    // cannot pull the code out from under the frame being built.
    env.set_invoke_guard(target);

    let pushed = match env.stack.push_frame(
        FrameKind::Compiled,
        target,
        mb.args_size(),
        cmd.max_locals(),
        cmd.capacity(),
        Some(SlotAddr {
            chunk: caller_frame.chunk(),
            index: args_base,
        }),
    ) {
        Ok(pushed) => pushed,
        Err(_) => {
            env.clear_invoke_guard();
            env.throw(VmException::stack_overflow(qualified_name(env, target)));
            return Flow::Done(CompiledResult::Exception);
        }
    };
    let callee = pushed.frame;

    // Enter through the interpreted-call entry point.
    env.stack.frame_mut(callee).pc = cmd.interp_entry();
    trace!(
        method = mb.name(),
        relocated = pushed.relocated,
        "invoking compiled method"
    );

    if mb.is_synchronized() {
        let monitor = env.monitor();
        if !monitor.fast_try_lock(receiver) {
            let ok = env.gc_safe_exec(|env| monitor.lock(env, receiver));
            if !ok {
                // Back the callee frame out; the caller still owns the
                // argument words, nothing partial survives.
                env.stack.discard_frame();
                env.clear_invoke_guard();
                env.throw(VmException::out_of_memory("monitor record allocation"));
                return Flow::Done(CompiledResult::Exception);
            }
        }
        env.stack.frame_mut(callee).receiver = Slot::from_ref(receiver);
    }

    // Argument handoff: only now that the callee frame covers the argument
    // words as incoming locals does the caller's top of stack retract
    // below them. Exactly one frame owns them at every point.
    env.stack.frame_mut(caller).tos = args_base;

    env.clear_invoke_guard();
    cmd.count_entry();
    Flow::Continue(EngineState::ReturnToCompiled)
}

fn invoke_cni(env: &mut ExecEnv, target: MethodId, args_base: u32) -> Flow {
    let mb = env.methods().get(target).clone();
    let Some(code) = env.cni_code(target) else {
        debug_assert!(false, "frameless native method without registered code");
        env.throw(VmException::unsatisfied_link(qualified_name(env, target)));
        return Flow::Done(CompiledResult::Exception);
    };
    let Some(frame) = env.stack.current() else {
        debug_assert!(false, "invocation without a frame");
        return Flow::Done(CompiledResult::Return);
    };
    let chunk = env.stack.frame(frame).chunk();

    trace!(method = mb.name(), "invoking frameless native method");
    let result = code(
        env,
        CniArgs {
            frame,
            base: SlotAddr {
                chunk,
                index: args_base,
            },
            argc: mb.args_size(),
        },
    );

    match result {
        CniResult::Words(words) => {
            debug_assert!(env.stack.current() == Some(frame));
            env.stack.frame_mut(frame).tos = args_base + words as u32;
            Flow::Continue(EngineState::ReturnToCompiled)
        }
        CniResult::NewTransition => {
            // Pop the invoker's arguments, then report the transition
            // frame the native method pushed.
            env.stack.frame_mut(frame).tos = args_base;
            let Some(top) = env.stack.current() else {
                debug_assert!(false, "transition result without a frame");
                return Flow::Done(CompiledResult::Return);
            };
            let top_frame = env.stack.frame(top);
            debug_assert!(top_frame.is_transition());
            Flow::Done(CompiledResult::NewTransition(top_frame.method))
        }
        CniResult::NewMb(next) => {
            debug_assert!(env.stack.current() == Some(frame));
            // The new target consumes the same argument window; publish a
            // top of stack that covers its arguments.
            let next_args = env.methods().get(next).args_size() as u32;
            env.stack.frame_mut(frame).tos = args_base + next_args;
            Flow::Continue(EngineState::Dispatch {
                target: next,
                args_base,
            })
        }
        CniResult::Exception => {
            debug_assert!(env.has_pending());
            Flow::Done(CompiledResult::Exception)
        }
    }
}

fn qualified_name(env: &ExecEnv, method: MethodId) -> String {
    let mb = env.methods().get(method);
    format!(
        "{}.{}",
        env.classes().get(mb.class()).name(),
        mb.name()
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Engine behavior is exercised end to end in the crate's integration
    // tests; here only the result plumbing that needs no fixture.

    #[test]
    fn test_compiled_result_eq() {
        assert_eq!(CompiledResult::Return, CompiledResult::Return);
        assert_ne!(
            CompiledResult::NewMb(MethodId(1)),
            CompiledResult::NewMb(MethodId(2))
        );
    }
}
