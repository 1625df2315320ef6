//! Per-safepoint stack maps for compiled code.
//!
//! Every GC point of a compiled method records which frame words hold live
//! references at that point, as a bitmap walked 16 bits at a time in slot
//! order: locals first, then the operand stack. Small maps keep their single
//! bitmap chunk inline in the entry; wider maps indirect into a shared
//! side table of chunks.
//!
//! Lookup is by exact code offset only; safepoints are discrete, there are
//! no ranges. A miss is not an error: the only legal way to scan a compiled
//! frame whose PC has no map is mid-exception-unwind, and the scanner
//! handles that case itself.

/// Word count above which a map's bitmap spills to the side table.
const INLINE_CHUNK_BITS: u16 = 16;

// =============================================================================
// Entries
// =============================================================================

/// One safepoint's map. `chunk_or_index` is the bitmap itself when
/// `total_words <= 16`, else an index into the side table where
/// `ceil(total_words / 16)` consecutive chunks live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackMapEntry {
    /// Offset of the safepoint from the method's code start.
    pub code_offset: u32,
    /// Frame words the map covers: locals plus operand stack.
    pub total_words: u16,
    /// Trailing words that are outgoing call arguments, owned by the
    /// callee once its frame is in place.
    pub param_words: u16,
    chunk_or_index: u16,
}

/// Decoded view of one safepoint's map.
#[derive(Debug, Clone, Copy)]
pub struct StackMapView<'a> {
    /// Bitmap chunks, low slot in bit 0 of chunk 0.
    chunks: ChunkSource<'a>,
    /// Frame words covered by the bitmap.
    pub total_words: u16,
    /// Outgoing-argument words at the top of the covered range.
    pub param_words: u16,
}

#[derive(Debug, Clone, Copy)]
enum ChunkSource<'a> {
    Inline(u16),
    Spilled(&'a [u16]),
}

impl<'a> StackMapView<'a> {
    /// Whether frame word `slot` holds a live reference at this safepoint.
    #[inline]
    pub fn is_live(&self, slot: u16) -> bool {
        debug_assert!(slot < self.total_words);
        let chunk = match self.chunks {
            ChunkSource::Inline(bits) => bits,
            ChunkSource::Spilled(chunks) => chunks[(slot / INLINE_CHUNK_BITS) as usize],
        };
        chunk & (1 << (slot % INLINE_CHUNK_BITS)) != 0
    }

    /// Iterate the live slots in ascending order.
    pub fn live_slots(&self) -> impl Iterator<Item = u16> + '_ {
        let total = self.total_words;
        (0..total).filter(move |&slot| self.is_live(slot))
    }

    /// Number of live slots.
    pub fn live_count(&self) -> usize {
        self.live_slots().count()
    }
}

// =============================================================================
// CompiledStackMaps
// =============================================================================

/// The stack-map table of one compiled method. Immutable after compilation.
#[derive(Debug, Clone, Default)]
pub struct CompiledStackMaps {
    entries: Vec<StackMapEntry>,
    large: Vec<u16>,
}

impl CompiledStackMaps {
    /// Find the map at exactly `code_offset`.
    ///
    /// Straight linear scan, first match wins; the tables are small and not
    /// sorted. `None` signals the caller is mid-exception-unwind and must
    /// resolve a handler offset instead.
    pub fn lookup(&self, code_offset: u32) -> Option<StackMapView<'_>> {
        let e = self
            .entries
            .iter()
            .find(|e| e.code_offset == code_offset)?;
        let chunks = if e.total_words <= INLINE_CHUNK_BITS {
            ChunkSource::Inline(e.chunk_or_index)
        } else {
            let start = e.chunk_or_index as usize;
            let n = e.total_words.div_ceil(INLINE_CHUNK_BITS) as usize;
            ChunkSource::Spilled(&self.large[start..start + n])
        };
        Some(StackMapView {
            chunks,
            total_words: e.total_words,
            param_words: e.param_words,
        })
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

// =============================================================================
// Builder
// =============================================================================

/// Builder used by the compiler backend while emitting a method.
#[derive(Debug, Default)]
pub struct StackMapsBuilder {
    entries: Vec<StackMapEntry>,
    large: Vec<u16>,
}

impl StackMapsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a safepoint. `live_slots` are the frame words holding
    /// references, in any order; `total_words` is the covered frame extent.
    pub fn add_gc_point(
        &mut self,
        code_offset: u32,
        total_words: u16,
        param_words: u16,
        live_slots: &[u16],
    ) -> &mut Self {
        debug_assert!(param_words <= total_words);
        debug_assert!(live_slots.iter().all(|&s| s < total_words));

        let chunk_or_index = if total_words <= INLINE_CHUNK_BITS {
            let mut bits = 0u16;
            for &slot in live_slots {
                bits |= 1 << slot;
            }
            bits
        } else {
            let start = self.large.len() as u16;
            let n = total_words.div_ceil(INLINE_CHUNK_BITS) as usize;
            self.large.resize(self.large.len() + n, 0);
            for &slot in live_slots {
                let idx = start as usize + (slot / INLINE_CHUNK_BITS) as usize;
                self.large[idx] |= 1 << (slot % INLINE_CHUNK_BITS);
            }
            start
        };

        self.entries.push(StackMapEntry {
            code_offset,
            total_words,
            param_words,
            chunk_or_index,
        });
        self
    }

    pub fn finish(self) -> CompiledStackMaps {
        CompiledStackMaps {
            entries: self.entries,
            large: self.large,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_exact_match_only() {
        let mut b = StackMapsBuilder::new();
        b.add_gc_point(8, 4, 0, &[0, 2]);
        let maps = b.finish();

        let view = maps.lookup(8).unwrap();
        assert!(view.is_live(0));
        assert!(!view.is_live(1));
        assert!(view.is_live(2));
        assert!(!view.is_live(3));

        // No ranges: a nearby offset does not resolve.
        assert!(maps.lookup(7).is_none());
        assert!(maps.lookup(9).is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let mut b = StackMapsBuilder::new();
        b.add_gc_point(4, 2, 0, &[0]);
        b.add_gc_point(4, 2, 0, &[1]);
        let maps = b.finish();

        let view = maps.lookup(4).unwrap();
        assert!(view.is_live(0));
        assert!(!view.is_live(1));
    }

    #[test]
    fn test_param_words_carried() {
        let mut b = StackMapsBuilder::new();
        b.add_gc_point(0, 6, 2, &[4, 5]);
        let maps = b.finish();
        let view = maps.lookup(0).unwrap();
        assert_eq!(view.total_words, 6);
        assert_eq!(view.param_words, 2);
    }

    #[test]
    fn test_large_map_spills_to_side_table() {
        let live: Vec<u16> = vec![0, 15, 16, 17, 39];
        let mut b = StackMapsBuilder::new();
        b.add_gc_point(12, 40, 0, &live);
        // A second large map must not clobber the first one's chunks.
        b.add_gc_point(20, 33, 0, &[32]);
        let maps = b.finish();

        let view = maps.lookup(12).unwrap();
        let got: Vec<u16> = view.live_slots().collect();
        assert_eq!(got, live);
        assert_eq!(view.live_count(), live.len());

        let view = maps.lookup(20).unwrap();
        assert_eq!(view.live_slots().collect::<Vec<_>>(), vec![32]);
    }

    #[test]
    fn test_empty_table() {
        let maps = CompiledStackMaps::default();
        assert!(maps.is_empty());
        assert!(maps.lookup(0).is_none());
    }
}
