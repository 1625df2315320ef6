//! Per-thread execution environment.
//!
//! One `ExecEnv` per VM thread: the thread's frame stack, its pending
//! exception, the scratch GC root used during frame replacement, and the
//! seams to the external collaborators (compiled-code trampoline, monitor
//! subsystem, native resolution, JNI invocation). The engine is never
//! re-entered on behalf of another thread.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use kestrel_core::{ClassTable, MethodId, MethodTable, ObjRef, Slot, VmException};
use kestrel_jit::JitState;

use crate::frame_iter::{frame_method, FrameIterator};
use crate::monitor::MonitorOps;
use crate::stack::{FrameId, SlotAddr, VmStack};

// =============================================================================
// Collaborator seams
// =============================================================================

/// The machine-code trampoline seam.
///
/// `run` transfers control into compiled code for `frame` at the frame's
/// current pc (delivering `exception` to a handler instead when one is
/// pending) and comes back in one of two ways: `Some(target)` when the
/// code wants a method invoked (its arguments pushed on the frame's
/// operand stack), or `None` when the method is returning, its result
/// words left at the bottom of the frame with the top of stack just above
/// them.
pub trait CompiledExec: Send + Sync {
    fn run(&self, env: &mut ExecEnv, frame: FrameId, exception: Option<ObjRef>)
        -> Option<MethodId>;
}

/// Resolves a lazily-bound native method: looks the code up (may block and
/// allocate; the caller is GC-safe), registers it, and re-kinds the method.
/// Returns false with a pending exception on failure.
pub trait NativeResolver: Send + Sync {
    fn resolve(&self, env: &mut ExecEnv, method: MethodId) -> bool;
}

/// Arguments of a frameless (CNI) native call: they sit on the calling
/// frame's operand stack, and the result words are written back in place.
#[derive(Debug, Clone, Copy)]
pub struct CniArgs {
    pub frame: FrameId,
    pub base: SlotAddr,
    pub argc: u16,
}

/// Result protocol of a frameless native method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CniResult {
    /// Returned `n` result words, written at the argument base.
    Words(u16),
    /// The native method pushed a transition frame; the interpreter takes
    /// over.
    NewTransition,
    /// Re-dispatch to another method on the same argument window.
    NewMb(MethodId),
    /// A pending exception was raised.
    Exception,
}

/// Frameless native method.
pub type CniMethod = fn(&mut ExecEnv, CniArgs) -> CniResult;

/// Framed (JNI) invocation helper: black box that builds the native frame,
/// calls out, pops the arguments and pushes any result. False means a
/// pending exception.
pub type JniInvoke = fn(&mut ExecEnv, MethodId) -> bool;

fn unlinked_jni(env: &mut ExecEnv, method: MethodId) -> bool {
    let name = env.methods().get(method).name().to_string();
    env.throw(VmException::unsatisfied_link(name));
    false
}

// =============================================================================
// ExecEnv
// =============================================================================

pub struct ExecEnv {
    pub stack: VmStack,
    methods: Arc<MethodTable>,
    classes: Arc<ClassTable>,
    jit: Arc<JitState>,
    monitor: Arc<dyn MonitorOps>,
    exec: Arc<dyn CompiledExec>,
    cni: FxHashMap<MethodId, CniMethod>,
    jni_invoke: JniInvoke,
    resolver: Option<Arc<dyn NativeResolver>>,
    pending: Option<VmException>,
    /// Scratch root covering the receiver while a frame is replaced.
    sync_scratch: Slot,
    gc_safe: bool,
    /// Pins a method against decompilation across GC-safe points while its
    /// frame is under construction.
    invoke_guard: Option<MethodId>,
}

impl ExecEnv {
    pub fn new(
        stack: VmStack,
        methods: Arc<MethodTable>,
        classes: Arc<ClassTable>,
        jit: Arc<JitState>,
        monitor: Arc<dyn MonitorOps>,
        exec: Arc<dyn CompiledExec>,
    ) -> Self {
        Self {
            stack,
            methods,
            classes,
            jit,
            monitor,
            exec,
            cni: FxHashMap::default(),
            jni_invoke: unlinked_jni,
            resolver: None,
            pending: None,
            sync_scratch: Slot::ZERO,
            gc_safe: false,
            invoke_guard: None,
        }
    }

    #[inline]
    pub fn methods(&self) -> &Arc<MethodTable> {
        &self.methods
    }

    #[inline]
    pub fn classes(&self) -> &Arc<ClassTable> {
        &self.classes
    }

    #[inline]
    pub fn jit(&self) -> &Arc<JitState> {
        &self.jit
    }

    #[inline]
    pub fn monitor(&self) -> Arc<dyn MonitorOps> {
        self.monitor.clone()
    }

    #[inline]
    pub(crate) fn exec(&self) -> Arc<dyn CompiledExec> {
        self.exec.clone()
    }

    /// Register the code of a frameless native method.
    pub fn register_cni(&mut self, method: MethodId, code: CniMethod) {
        self.cni.insert(method, code);
    }

    #[inline]
    pub(crate) fn cni_code(&self, method: MethodId) -> Option<CniMethod> {
        self.cni.get(&method).copied()
    }

    pub fn set_jni_invoke(&mut self, invoke: JniInvoke) {
        self.jni_invoke = invoke;
    }

    #[inline]
    pub(crate) fn jni_invoke(&self) -> JniInvoke {
        self.jni_invoke
    }

    pub fn set_resolver(&mut self, resolver: Arc<dyn NativeResolver>) {
        self.resolver = Some(resolver);
    }

    #[inline]
    pub(crate) fn resolver(&self) -> Option<Arc<dyn NativeResolver>> {
        self.resolver.clone()
    }

    // =========================================================================
    // Exceptions
    // =========================================================================

    /// Make `exception` pending. An already-pending exception is not
    /// replaced: the first failure wins, later ones were consequences.
    pub fn throw(&mut self, exception: VmException) {
        if self.pending.is_none() {
            self.pending = Some(exception);
        }
    }

    #[inline]
    pub fn pending(&self) -> Option<&VmException> {
        self.pending.as_ref()
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn take_pending(&mut self) -> Option<VmException> {
        self.pending.take()
    }

    /// Whether `frame` is the frame currently being unwound: an exception
    /// is pending and `frame` is the thread's current frame.
    pub fn is_unwinding(&self, frame: FrameId) -> bool {
        self.pending.is_some() && self.stack.current() == Some(frame)
    }

    // =========================================================================
    // GC safety
    // =========================================================================

    /// The collector may inspect this thread's stack right now; all frame
    /// bookkeeping is consistent.
    #[inline]
    pub fn is_gc_safe(&self) -> bool {
        self.gc_safe
    }

    /// Run a potentially blocking/allocating operation with the thread
    /// marked GC-safe. Frame bookkeeping must be consistent on entry.
    pub fn gc_safe_exec<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        debug_assert!(!self.gc_safe, "nested gc-safe region");
        self.gc_safe = true;
        let result = f(self);
        self.gc_safe = false;
        result
    }

    // =========================================================================
    // Invocation guard & scratch root
    // =========================================================================

    #[inline]
    pub(crate) fn set_invoke_guard(&mut self, method: MethodId) {
        debug_assert!(self.invoke_guard.is_none());
        self.invoke_guard = Some(method);
    }

    #[inline]
    pub(crate) fn clear_invoke_guard(&mut self) {
        self.invoke_guard = None;
    }

    /// The method whose frame is currently under construction, pinned
    /// against decompilation.
    #[inline]
    pub fn invoke_guard(&self) -> Option<MethodId> {
        self.invoke_guard
    }

    #[inline]
    pub(crate) fn sync_scratch(&self) -> Slot {
        self.sync_scratch
    }

    #[inline]
    pub(crate) fn set_sync_scratch(&mut self, slot: Slot) {
        self.sync_scratch = slot;
    }

    /// Report the env-level scratch roots (outside any frame) to the GC.
    pub fn scan_special_roots(&mut self, visitor: &mut dyn crate::scanner::RootVisitor) {
        if !self.sync_scratch.is_null_ref() {
            visitor.visit_slot(&mut self.sync_scratch);
        }
    }

    // =========================================================================
    // Frame queries
    // =========================================================================

    /// Iterator over the logical activations of a compiled frame.
    pub fn frame_iterator(&self, frame: FrameId) -> Option<FrameIterator> {
        let cmd = self.jit.code_cache().lookup(self.stack.frame(frame).method)?;
        Some(FrameIterator::new(&self.stack, frame, cmd))
    }

    /// Innermost logical method of the thread's current frame.
    pub fn current_frame_method(&self) -> Option<MethodId> {
        let frame = self.stack.current()?;
        Some(frame_method(&self.stack, self.jit.code_cache(), frame))
    }
}
