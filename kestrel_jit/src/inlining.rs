//! Inlining-info tables.
//!
//! When the compiler inlines callees into a method, one physical compiled
//! frame stands for several logical activations. Each entry records the
//! compiled-code range an inlined activation covers, the method it belongs
//! to, and where its locals were placed inside the enclosing frame. Ranges
//! are ordered innermost-first and never overlap for the same depth; a PC
//! therefore selects each matching activation at most once.

use kestrel_core::MethodId;

/// Activation flag: synthesized by the compiler rather than corresponding
/// to a source-level call (e.g. an access helper). Skipped by backtraces.
pub const FRAMEFLAG_ARTIFICIAL: u8 = 0x01;

/// One inlined activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InliningEntry {
    /// First compiled-code offset covered (inclusive).
    pub start_offset: u32,
    /// End of the covered range (exclusive).
    pub end_offset: u32,
    /// The inlined method.
    pub method: MethodId,
    /// Frame word where this activation's locals begin.
    pub first_local: u16,
    /// Local-word offset (relative to `first_local`) of the saved receiver,
    /// meaningful when the inlined method is synchronized.
    pub sync_object_word: u16,
    /// Activation flags (`FRAMEFLAG_ARTIFICIAL`).
    pub flags: u8,
}

impl InliningEntry {
    /// Whether this activation covers `code_offset`.
    #[inline]
    pub fn contains(&self, code_offset: u32) -> bool {
        self.start_offset <= code_offset && code_offset < self.end_offset
    }

    #[inline]
    pub fn is_artificial(&self) -> bool {
        self.flags & FRAMEFLAG_ARTIFICIAL != 0
    }
}

/// The inlining table of one compiled method. Absent entirely when the
/// method contains no inlined code.
#[derive(Debug, Clone)]
pub struct InliningInfo {
    entries: Vec<InliningEntry>,
}

impl InliningInfo {
    /// Entries must be ordered: for any two entries at the same nesting
    /// depth the ranges are disjoint, and an entry's range never partially
    /// overlaps another's.
    pub fn new(entries: Vec<InliningEntry>) -> Self {
        debug_assert!(entries.iter().all(|e| e.start_offset < e.end_offset));
        debug_assert!(Self::ranges_well_formed(&entries));
        Self { entries }
    }

    #[inline]
    pub fn entries(&self) -> &[InliningEntry] {
        &self.entries
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The innermost entry covering `code_offset`, if any.
    pub fn innermost_at(&self, code_offset: u32) -> Option<&InliningEntry> {
        self.entries.iter().find(|e| e.contains(code_offset))
    }

    fn ranges_well_formed(entries: &[InliningEntry]) -> bool {
        // Two ranges either nest or are disjoint; partial overlap is a
        // table-construction bug.
        for (i, a) in entries.iter().enumerate() {
            for b in &entries[i + 1..] {
                let nested = (a.start_offset >= b.start_offset && a.end_offset <= b.end_offset)
                    || (b.start_offset >= a.start_offset && b.end_offset <= a.end_offset);
                let disjoint = a.end_offset <= b.start_offset || b.end_offset <= a.start_offset;
                if !nested && !disjoint {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(start: u32, end: u32, method: u32) -> InliningEntry {
        InliningEntry {
            start_offset: start,
            end_offset: end,
            method: MethodId(method),
            first_local: 0,
            sync_object_word: 0,
            flags: 0,
        }
    }

    #[test]
    fn test_contains_half_open() {
        let e = entry(8, 24, 1);
        assert!(!e.contains(7));
        assert!(e.contains(8));
        assert!(e.contains(23));
        assert!(!e.contains(24));
    }

    #[test]
    fn test_innermost_at_prefers_first_entry() {
        // Innermost-first ordering: the nested callee precedes its caller.
        let info = InliningInfo::new(vec![entry(10, 20, 2), entry(0, 40, 1)]);
        assert_eq!(info.innermost_at(12).unwrap().method, MethodId(2));
        assert_eq!(info.innermost_at(30).unwrap().method, MethodId(1));
        assert!(info.innermost_at(40).is_none());
    }

    #[test]
    fn test_artificial_flag() {
        let mut e = entry(0, 4, 1);
        assert!(!e.is_artificial());
        e.flags |= FRAMEFLAG_ARTIFICIAL;
        assert!(e.is_artificial());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn test_partial_overlap_rejected() {
        let _ = InliningInfo::new(vec![entry(0, 16, 1), entry(8, 24, 2)]);
    }
}
