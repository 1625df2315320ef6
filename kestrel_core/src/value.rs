//! Stack words and object references.
//!
//! The execution stack is an array of `Slot`s. A slot carries either a raw
//! 32-bit payload or an object reference; wide (64-bit) values occupy two
//! adjacent slots as a lo/hi pair. The GC owns the objects behind `ObjRef`;
//! this crate only moves the handles around and reports their locations.

// =============================================================================
// ObjRef
// =============================================================================

/// Opaque, nullable handle to a heap object owned by the external collector.
///
/// The VM never dereferences an `ObjRef`; it stores them in slots, passes
/// them to the monitor subsystem, and reports their locations to the GC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ObjRef(usize);

impl ObjRef {
    /// The null reference.
    pub const NULL: ObjRef = ObjRef(0);

    /// Construct from a raw handle value. Zero is the null reference.
    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        ObjRef(raw)
    }

    /// Raw handle value.
    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl Default for ObjRef {
    #[inline]
    fn default() -> Self {
        ObjRef::NULL
    }
}

// =============================================================================
// Slot
// =============================================================================

/// One stack word: a local variable or operand-stack slot.
///
/// Only the owning frame's stack map can say whether a slot currently holds
/// a reference or raw data; `Slot` itself is untagged. Accessors are provided
/// for both views so no caller does pointer arithmetic on frame storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Slot(usize);

impl Slot {
    /// A zeroed slot (also the null reference).
    pub const ZERO: Slot = Slot(0);

    /// Slot holding a raw 32-bit payload.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Slot(raw as usize)
    }

    /// Slot holding an object reference.
    #[inline]
    pub const fn from_ref(obj: ObjRef) -> Self {
        Slot(obj.raw())
    }

    /// Raw 32-bit payload view.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0 as u32
    }

    /// Reference view. Only meaningful for slots the stack map marks live.
    #[inline]
    pub const fn as_ref(self) -> ObjRef {
        ObjRef::from_raw(self.0)
    }

    #[inline]
    pub fn set_ref(&mut self, obj: ObjRef) {
        self.0 = obj.raw();
    }

    #[inline]
    pub fn set_raw(&mut self, raw: u32) {
        self.0 = raw as usize;
    }

    /// Clear to null. Used when unwinding blows a frame's locals away.
    #[inline]
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    #[inline]
    pub const fn is_null_ref(self) -> bool {
        self.0 == 0
    }

    /// Split a wide value into its (lo, hi) slot pair.
    #[inline]
    pub const fn wide_pair(value: u64) -> (Slot, Slot) {
        (
            Slot(value as u32 as usize),
            Slot((value >> 32) as u32 as usize),
        )
    }

    /// Reassemble a wide value from its (lo, hi) slot pair.
    #[inline]
    pub const fn wide_value(lo: Slot, hi: Slot) -> u64 {
        (lo.0 as u32 as u64) | ((hi.0 as u32 as u64) << 32)
    }
}

// =============================================================================
// Tests
// =============================================================================
