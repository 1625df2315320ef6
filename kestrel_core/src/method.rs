//! Method metadata.
//!
//! A `MethodBlock` is the immutable-mostly descriptor the execution tiers
//! dispatch on. The two mutable pieces are deliberate: the invoker kind is
//! re-written once when a lazily-bound native method is resolved, and the
//! invocation-cost counter is racy profiling data consumed (not decided)
//! by the external compilation policy.

use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::Arc;

use crate::class::ClassId;

/// Index of a method in the [`MethodTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct MethodId(pub u32);

// =============================================================================
// Invoker Kind
// =============================================================================

/// How a method is entered.
///
/// A closed set dispatched with one exhaustive match; there is no ordering
/// relationship between the variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InvokerKind {
    /// Bytecode method; runs interpreted or compiled.
    Java = 0,
    /// Frameless native calling convention.
    Cni = 1,
    /// Framed native calling convention; may call back into the VM.
    Jni = 2,
    /// Abstract method; invocation is always an error.
    Abstract = 3,
    /// Placeholder for a non-public method reached through an interface.
    NonPublicMiranda = 4,
    /// Placeholder for a missing interface method.
    MissingInterfaceMiranda = 5,
    /// Native method whose code has not been looked up yet.
    LazyNative = 6,
}

impl InvokerKind {
    const fn from_u8(value: u8) -> InvokerKind {
        match value {
            0 => InvokerKind::Java,
            1 => InvokerKind::Cni,
            2 => InvokerKind::Jni,
            3 => InvokerKind::Abstract,
            4 => InvokerKind::NonPublicMiranda,
            5 => InvokerKind::MissingInterfaceMiranda,
            _ => InvokerKind::LazyNative,
        }
    }
}

// =============================================================================
// Return Kind
// =============================================================================

/// Static return type of a method, reduced to what the bridge needs:
/// how many result words to transfer and whether they form a GC root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Void,
    /// One non-reference word (int, float, ...).
    Single,
    /// Two words (long, double).
    Wide,
    /// One reference word.
    Reference,
}

impl ReturnKind {
    /// Number of operand-stack words the return value occupies.
    #[inline]
    pub const fn words(self) -> u16 {
        match self {
            ReturnKind::Void => 0,
            ReturnKind::Single | ReturnKind::Reference => 1,
            ReturnKind::Wide => 2,
        }
    }

    #[inline]
    pub const fn is_reference(self) -> bool {
        matches!(self, ReturnKind::Reference)
    }
}

// =============================================================================
// Exception handlers
// =============================================================================

/// One entry of a method's exception-handler table, in bytecode PCs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of the protected range (inclusive).
    pub start_pc: u32,
    /// End of the protected range (exclusive).
    pub end_pc: u32,
    /// Handler entry point.
    pub handler_pc: u32,
}

// =============================================================================
// MethodBlock
// =============================================================================

/// Method access flag: declared `synchronized`.
pub const ACC_SYNCHRONIZED: u8 = 0x01;
/// Method access flag: declared `static`.
pub const ACC_STATIC: u8 = 0x02;

/// Per-method metadata consulted by the invocation engine, the frame
/// iterator and the GC scanner.
#[derive(Debug)]
pub struct MethodBlock {
    name: Arc<str>,
    class: ClassId,
    /// Incoming argument words (receiver included for instance methods).
    args_size: u16,
    /// Local-variable words of the interpreted frame shape.
    max_locals: u16,
    /// Operand-stack words of the interpreted frame shape.
    max_stack: u16,
    access: u8,
    return_kind: ReturnKind,
    /// Rewritten once by lazy native resolution; otherwise fixed.
    invoker: AtomicU8,
    /// Racy invocation-cost counter nudged on tier crossings. Approximate
    /// by design; the compilation policy reads it, nothing depends on an
    /// exact value.
    invoke_cost: AtomicI32,
    handlers: Vec<ExceptionHandler>,
}

impl MethodBlock {
    pub fn new(name: impl Into<Arc<str>>, class: ClassId, invoker: InvokerKind) -> Self {
        Self {
            name: name.into(),
            class,
            args_size: 0,
            max_locals: 0,
            max_stack: 0,
            access: 0,
            return_kind: ReturnKind::Void,
            invoker: AtomicU8::new(invoker as u8),
            invoke_cost: AtomicI32::new(0),
            handlers: Vec::new(),
        }
    }

    pub fn with_args_size(mut self, words: u16) -> Self {
        self.args_size = words;
        self
    }

    pub fn with_locals(mut self, max_locals: u16, max_stack: u16) -> Self {
        self.max_locals = max_locals;
        self.max_stack = max_stack;
        self
    }

    pub fn with_access(mut self, access: u8) -> Self {
        self.access = access;
        self
    }

    pub fn with_return_kind(mut self, kind: ReturnKind) -> Self {
        self.return_kind = kind;
        self
    }

    pub fn with_invoke_cost(mut self, cost: i32) -> Self {
        self.invoke_cost = AtomicI32::new(cost);
        self
    }

    pub fn with_handlers(mut self, handlers: Vec<ExceptionHandler>) -> Self {
        self.handlers = handlers;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn class(&self) -> ClassId {
        self.class
    }

    #[inline]
    pub fn args_size(&self) -> u16 {
        self.args_size
    }

    #[inline]
    pub fn max_locals(&self) -> u16 {
        self.max_locals
    }

    #[inline]
    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    #[inline]
    pub fn is_synchronized(&self) -> bool {
        self.access & ACC_SYNCHRONIZED != 0
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.access & ACC_STATIC != 0
    }

    #[inline]
    pub fn return_kind(&self) -> ReturnKind {
        self.return_kind
    }

    #[inline]
    pub fn invoker(&self) -> InvokerKind {
        InvokerKind::from_u8(self.invoker.load(Ordering::Acquire))
    }

    /// Re-kind the method after native resolution.
    #[inline]
    pub fn set_invoker(&self, kind: InvokerKind) {
        self.invoker.store(kind as u8, Ordering::Release);
    }

    #[inline]
    pub fn invoke_cost(&self) -> i32 {
        self.invoke_cost.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_invoke_cost(&self, cost: i32) {
        self.invoke_cost.store(cost, Ordering::Relaxed);
    }

    /// Nudge the invocation cost toward zero by `delta`, clamping at zero.
    /// Lost updates under a race are acceptable.
    #[inline]
    pub fn nudge_invoke_cost(&self, delta: i32) {
        let old = self.invoke_cost();
        let new = (old - delta).max(0);
        if new != old {
            self.set_invoke_cost(new);
        }
    }

    /// Innermost handler covering `bytecode_pc`, if any.
    ///
    /// The table is ordered innermost-first, so the first covering entry
    /// wins.
    pub fn innermost_handler_for(&self, bytecode_pc: u32) -> Option<u32> {
        self.handlers
            .iter()
            .find(|h| h.start_pc <= bytecode_pc && bytecode_pc < h.end_pc)
            .map(|h| h.handler_pc)
    }
}

// =============================================================================
// MethodTable
// =============================================================================

/// Append-only registry of methods, frozen before execution starts.
#[derive(Debug, Default)]
pub struct MethodTable {
    methods: Vec<Arc<MethodBlock>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, method: MethodBlock) -> MethodId {
        let id = MethodId(self.methods.len() as u32);
        self.methods.push(Arc::new(method));
        id
    }

    #[inline]
    pub fn get(&self, id: MethodId) -> &Arc<MethodBlock> {
        &self.methods[id.0 as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
