//! Bytecode-PC ↔ compiled-offset maps.
//!
//! The compiler records, for selected bytecode PCs of the outermost method,
//! the compiled-code offset that corresponds to them. Entries the compiler
//! proved safe to enter mid-method (all interpreter state reconstructible)
//! additionally carry the OSR-resumable mark; on-stack replacement is legal
//! only at those.

/// One mapped point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcMapEntry {
    pub bytecode_pc: u32,
    pub code_offset: u32,
    /// Compiler-declared resumable point: OSR may enter here.
    pub osr_resumable: bool,
}

/// Sorted map of bytecode PCs to compiled-code offsets.
#[derive(Debug, Clone, Default)]
pub struct PcMap {
    /// Sorted by `code_offset`; `bytecode_pc` is monotonic alongside it.
    entries: Vec<PcMapEntry>,
}

impl PcMap {
    pub fn new(mut entries: Vec<PcMapEntry>) -> Self {
        entries.sort_by_key(|e| e.code_offset);
        Self { entries }
    }

    /// Bytecode PC of the mapped point at or immediately before
    /// `code_offset`. A compiled frame parked at a safepoint always sits at
    /// or after a mapped point.
    pub fn compiled_to_java(&self, code_offset: u32) -> Option<u32> {
        match self
            .entries
            .binary_search_by_key(&code_offset, |e| e.code_offset)
        {
            Ok(i) => Some(self.entries[i].bytecode_pc),
            Err(0) => None,
            Err(i) => Some(self.entries[i - 1].bytecode_pc),
        }
    }

    /// Compiled offset mapped to exactly `bytecode_pc`, if any.
    pub fn java_to_compiled(&self, bytecode_pc: u32) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.bytecode_pc == bytecode_pc)
            .map(|e| e.code_offset)
    }

    /// Like [`java_to_compiled`](Self::java_to_compiled), but the point must
    /// exist and be OSR-resumable. Entering compiled code at a
    /// non-resumable PC is a VM-internal contract bug, asserted in debug
    /// builds and undefined in release builds.
    pub fn java_to_compiled_strict(&self, bytecode_pc: u32) -> Option<u32> {
        let entry = self.entries.iter().find(|e| e.bytecode_pc == bytecode_pc);
        debug_assert!(
            entry.is_some_and(|e| e.osr_resumable),
            "bytecode pc {bytecode_pc} is not a resumable entry point"
        );
        entry.filter(|e| e.osr_resumable).map(|e| e.code_offset)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> PcMap {
        PcMap::new(vec![
            PcMapEntry {
                bytecode_pc: 0,
                code_offset: 0,
                osr_resumable: false,
            },
            PcMapEntry {
                bytecode_pc: 7,
                code_offset: 24,
                osr_resumable: true,
            },
            PcMapEntry {
                bytecode_pc: 15,
                code_offset: 60,
                osr_resumable: false,
            },
        ])
    }

    #[test]
    fn test_compiled_to_java_floor() {
        let m = map();
        assert_eq!(m.compiled_to_java(0), Some(0));
        assert_eq!(m.compiled_to_java(24), Some(7));
        assert_eq!(m.compiled_to_java(30), Some(7));
        assert_eq!(m.compiled_to_java(100), Some(15));
    }

    #[test]
    fn test_java_to_compiled_exact() {
        let m = map();
        assert_eq!(m.java_to_compiled(7), Some(24));
        assert_eq!(m.java_to_compiled(8), None);
    }

    #[test]
    fn test_strict_requires_resumable() {
        let m = map();
        assert_eq!(m.java_to_compiled_strict(7), Some(24));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn test_strict_asserts_on_non_resumable() {
        let _ = map().java_to_compiled_strict(15);
    }
}
