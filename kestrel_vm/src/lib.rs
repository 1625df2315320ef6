//! Kestrel execution bridge: the layer that lets bytecode run interpreted
//! or compiled with identical observable semantics across the boundary.
//!
//! The pieces, leaves first: frames and the chunked frame stack, the
//! iterator over a compiled frame's (possibly inlined) logical activations,
//! the GC root scanner for compiled frames, the invocation trampoline
//! dispatching interpreted ⇄ compiled ⇄ native calls, and on-stack
//! replacement.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod env;
pub mod frame;
pub mod frame_iter;
pub mod invoke;
pub mod monitor;
pub mod osr;
pub mod scanner;
pub mod stack;

pub use env::{CniArgs, CniMethod, CniResult, CompiledExec, ExecEnv, JniInvoke, NativeResolver};
pub use frame::{Frame, FrameKind, PC_GC_AT_RETURN};
pub use frame_iter::{frame_method, Activation, FrameIterator, SyncCell};
pub use invoke::{invoke_compiled, return_to_compiled, CompiledResult};
pub use monitor::{HashMonitor, MonitorOps};
pub use osr::osr_enter;
pub use scanner::RootVisitor;
pub use stack::{FrameId, PushedFrame, ReplacedFrame, SlotAddr, StackLimitExceeded, VmStack};
