//! The chunked frame stack.
//!
//! Frame storage lives in fixed-capacity chunks. A callee frame normally
//! begins exactly where the caller's outgoing arguments sit, adopting them
//! in place as its first locals; when the chunk cannot hold the new frame,
//! a fresh chunk is opened and the copied arguments are relocated into it.
//! Anyone holding slot addresses across a push or replace must re-fetch
//! them afterwards.
//!
//! Growth failure never leaves a partially constructed frame: the limit is
//! checked before any state changes.

use kestrel_core::{MethodId, Slot};
use tracing::trace;

use crate::frame::{Frame, FrameKind};

/// Default chunk capacity in words.
pub const DEFAULT_CHUNK_WORDS: u32 = 1024;

/// Index of a live frame, valid until that frame is popped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameId(pub u32);

/// Absolute address of one stack word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAddr {
    pub chunk: u32,
    pub index: u32,
}

/// Stack growth failure. Surfaced by the engine as a pending
/// StackOverflowError, never a fatal abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackLimitExceeded;

/// Result of pushing a frame.
#[derive(Debug, Clone, Copy)]
pub struct PushedFrame {
    pub frame: FrameId,
    /// The copied arguments moved to a new chunk.
    pub relocated: bool,
}

/// Result of replacing the current frame in place (on-stack replacement).
#[derive(Debug, Clone, Copy)]
pub struct ReplacedFrame {
    /// The frame moved to a new chunk; its locals still sit in the old
    /// storage and must be copied over by the caller.
    pub relocated: bool,
    pub old_chunk: u32,
    pub old_base: u32,
}

#[derive(Debug)]
struct StackChunk {
    slots: Box<[Slot]>,
}

#[derive(Debug)]
pub struct VmStack {
    chunks: Vec<Option<StackChunk>>,
    frames: Vec<Frame>,
    chunk_words: u32,
    max_total_words: Option<u32>,
    allocated_words: u32,
}

impl VmStack {
    pub fn new() -> Self {
        Self::with_chunk_words(DEFAULT_CHUNK_WORDS)
    }

    pub fn with_chunk_words(chunk_words: u32) -> Self {
        Self {
            chunks: Vec::new(),
            frames: Vec::new(),
            chunk_words,
            max_total_words: None,
            allocated_words: 0,
        }
    }

    /// Cap total chunk storage; growth past the cap fails.
    pub fn with_limit(mut self, max_total_words: u32) -> Self {
        self.max_total_words = Some(max_total_words);
        self
    }

    // =========================================================================
    // Frames
    // =========================================================================

    #[inline]
    pub fn current(&self) -> Option<FrameId> {
        if self.frames.is_empty() {
            None
        } else {
            Some(FrameId(self.frames.len() as u32 - 1))
        }
    }

    #[inline]
    pub fn frame(&self, id: FrameId) -> &Frame {
        &self.frames[id.0 as usize]
    }

    #[inline]
    pub fn frame_mut(&mut self, id: FrameId) -> &mut Frame {
        &mut self.frames[id.0 as usize]
    }

    /// The frame `id` will return into, if any.
    #[inline]
    pub fn caller_of(&self, id: FrameId) -> Option<FrameId> {
        if id.0 == 0 {
            None
        } else {
            Some(FrameId(id.0 - 1))
        }
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Push a frame whose first locals adopt the `args_size` words at
    /// `args_base` (the caller's outgoing arguments). Without an anchor the
    /// frame opens after the current frame's operand stack, or in a fresh
    /// chunk for the first frame.
    ///
    /// The caller's top-of-stack is deliberately left untouched; the engine
    /// retracts it below the arguments only once the callee frame fully
    /// owns them, so every word stays covered by exactly one frame's map
    /// at any point.
    pub fn push_frame(
        &mut self,
        kind: FrameKind,
        method: MethodId,
        args_size: u16,
        max_locals: u16,
        capacity: u16,
        args_base: Option<SlotAddr>,
    ) -> Result<PushedFrame, StackLimitExceeded> {
        debug_assert!(args_size <= max_locals || max_locals == 0);
        debug_assert!(max_locals <= capacity);

        let anchor = args_base.or_else(|| {
            self.current().map(|id| {
                let f = self.frame(id);
                SlotAddr {
                    chunk: f.chunk,
                    index: f.tos,
                }
            })
        });

        let (chunk, base, relocated) = match anchor {
            Some(a) if a.index + capacity as u32 <= self.chunk_len(a.chunk) => {
                (a.chunk, a.index, false)
            }
            Some(a) => {
                let chunk = self.alloc_chunk(capacity as u32)?;
                if args_size > 0 {
                    self.copy_words(a, SlotAddr { chunk, index: 0 }, args_size as u32);
                }
                trace!(words = capacity, "frame push grew the stack");
                (chunk, 0, true)
            }
            None => {
                let chunk = self.alloc_chunk(capacity as u32)?;
                (chunk, 0, false)
            }
        };

        let opstack_base = base + max_locals as u32;
        self.frames.push(Frame {
            kind,
            method,
            pc: 0,
            flags: 0,
            receiver: Slot::ZERO,
            chunk,
            base,
            max_locals,
            capacity,
            opstack_base,
            tos: opstack_base,
        });

        Ok(PushedFrame {
            frame: FrameId(self.frames.len() as u32 - 1),
            relocated,
        })
    }

    /// Pop the current frame, transferring `ret_words` result words from
    /// the bottom of the popped frame onto the caller's operand stack.
    pub fn pop_frame(&mut self, ret_words: u16) {
        let Some(popped) = self.frames.pop() else {
            debug_assert!(false, "pop on empty frame stack");
            return;
        };
        debug_assert!(popped.tos >= popped.base + ret_words as u32);

        if let Some(caller) = self.frames.last().copied() {
            let from = SlotAddr {
                chunk: popped.chunk,
                index: popped.tos - ret_words as u32,
            };
            let to = SlotAddr {
                chunk: caller.chunk,
                index: caller.tos,
            };
            if ret_words > 0 {
                self.copy_words(from, to, ret_words as u32);
            }
            if let Some(f) = self.frames.last_mut() {
                f.tos += ret_words as u32;
            }
            if popped.chunk != caller.chunk {
                debug_assert!(popped.base == 0);
                self.release_chunk(popped.chunk);
            }
        } else {
            self.release_chunk(popped.chunk);
        }
    }

    /// Drop the current frame without result transfer. Used to back out of
    /// a call that failed after the frame was pushed.
    pub fn discard_frame(&mut self) {
        let Some(popped) = self.frames.pop() else {
            debug_assert!(false, "discard on empty frame stack");
            return;
        };
        let still_used = self.frames.last().map(|f| f.chunk) == Some(popped.chunk);
        if !still_used {
            self.release_chunk(popped.chunk);
        }
    }

    /// Re-shape the current frame in place for on-stack replacement.
    ///
    /// The frame keeps its identity and its locals base when the chunk can
    /// hold the new capacity; otherwise it moves to a fresh chunk and the
    /// caller must copy the locals over (the old storage is returned for
    /// exactly that). Flags, pc, receiver and operand stack are reset.
    pub fn replace_frame(
        &mut self,
        kind: FrameKind,
        method: MethodId,
        max_locals: u16,
        capacity: u16,
    ) -> Result<ReplacedFrame, StackLimitExceeded> {
        debug_assert!(max_locals <= capacity);
        let Some(old) = self.frames.last().copied() else {
            debug_assert!(false, "replace on empty frame stack");
            return Err(StackLimitExceeded);
        };

        let (chunk, base, relocated) =
            if old.base + capacity as u32 <= self.chunk_len(old.chunk) {
                (old.chunk, old.base, false)
            } else {
                let chunk = self.alloc_chunk(capacity as u32)?;
                trace!(words = capacity, "frame replacement grew the stack");
                (chunk, 0, true)
            };

        let opstack_base = base + max_locals as u32;
        if let Some(f) = self.frames.last_mut() {
            *f = Frame {
                kind,
                method,
                pc: 0,
                flags: 0,
                receiver: Slot::ZERO,
                chunk,
                base,
                max_locals,
                capacity,
                opstack_base,
                tos: opstack_base,
            };
        }

        Ok(ReplacedFrame {
            relocated,
            old_chunk: old.chunk,
            old_base: old.base,
        })
    }

    // =========================================================================
    // Slots
    // =========================================================================

    #[inline]
    pub fn slot(&self, addr: SlotAddr) -> Slot {
        self.chunk(addr.chunk).slots[addr.index as usize]
    }

    #[inline]
    pub fn slot_mut(&mut self, addr: SlotAddr) -> &mut Slot {
        &mut self.chunk_mut(addr.chunk).slots[addr.index as usize]
    }

    /// Push one word onto the current frame's operand stack.
    pub fn push_operand(&mut self, value: Slot) {
        let Some(f) = self.frames.last().copied() else {
            debug_assert!(false, "operand push without a frame");
            return;
        };
        debug_assert!(f.tos < f.base + f.capacity as u32);
        let addr = SlotAddr {
            chunk: f.chunk,
            index: f.tos,
        };
        *self.slot_mut(addr) = value;
        if let Some(f) = self.frames.last_mut() {
            f.tos += 1;
        }
    }

    /// Pop one word off the current frame's operand stack.
    pub fn pop_operand(&mut self) -> Slot {
        let Some(f) = self.frames.last().copied() else {
            debug_assert!(false, "operand pop without a frame");
            return Slot::ZERO;
        };
        debug_assert!(f.tos > f.opstack_base);
        let addr = SlotAddr {
            chunk: f.chunk,
            index: f.tos - 1,
        };
        let value = self.slot(addr);
        if let Some(f) = self.frames.last_mut() {
            f.tos -= 1;
        }
        value
    }

    /// Copy `words` slots between (possibly different) chunks. Ranges in
    /// the same chunk may overlap only in the memmove sense.
    pub fn copy_words(&mut self, from: SlotAddr, to: SlotAddr, words: u32) {
        if words == 0 {
            return;
        }
        if from.chunk == to.chunk {
            let chunk = self.chunk_mut(from.chunk);
            chunk.slots.copy_within(
                from.index as usize..(from.index + words) as usize,
                to.index as usize,
            );
        } else {
            let (lo, hi) = (from.chunk.min(to.chunk), from.chunk.max(to.chunk));
            let (head, tail) = self.chunks.split_at_mut(hi as usize);
            let a = head[lo as usize].as_mut().expect("released chunk");
            let b = tail[0].as_mut().expect("released chunk");
            let (src, dst, s, d) = if from.chunk == lo {
                (a, b, from.index, to.index)
            } else {
                (b, a, from.index, to.index)
            };
            dst.slots[d as usize..(d + words) as usize]
                .copy_from_slice(&src.slots[s as usize..(s + words) as usize]);
        }
    }

    // =========================================================================
    // Chunks
    // =========================================================================

    /// Words of chunk storage currently allocated.
    #[inline]
    pub fn allocated_words(&self) -> u32 {
        self.allocated_words
    }

    #[inline]
    pub fn chunk_len(&self, chunk: u32) -> u32 {
        self.chunk(chunk).slots.len() as u32
    }

    /// Whether `addr` is the first word of its chunk: the chunk holds
    /// nothing below it and can be released once the frame above is gone.
    #[inline]
    pub fn at_chunk_start(&self, addr: SlotAddr) -> bool {
        addr.index == 0
    }

    /// Release a chunk nothing references anymore.
    pub fn release_chunk(&mut self, chunk: u32) {
        debug_assert!(self.frames.iter().all(|f| f.chunk != chunk));
        if let Some(c) = self.chunks[chunk as usize].take() {
            self.allocated_words -= c.slots.len() as u32;
        }
    }

    fn alloc_chunk(&mut self, min_words: u32) -> Result<u32, StackLimitExceeded> {
        let words = min_words.max(self.chunk_words);
        if let Some(limit) = self.max_total_words {
            if self.allocated_words + words > limit {
                return Err(StackLimitExceeded);
            }
        }
        self.allocated_words += words;
        let chunk = StackChunk {
            slots: vec![Slot::ZERO; words as usize].into_boxed_slice(),
        };
        if let Some(free) = self.chunks.iter().position(Option::is_none) {
            self.chunks[free] = Some(chunk);
            Ok(free as u32)
        } else {
            self.chunks.push(Some(chunk));
            Ok(self.chunks.len() as u32 - 1)
        }
    }

    fn chunk(&self, chunk: u32) -> &StackChunk {
        self.chunks[chunk as usize]
            .as_ref()
            .expect("released chunk")
    }

    fn chunk_mut(&mut self, chunk: u32) -> &mut StackChunk {
        self.chunks[chunk as usize]
            .as_mut()
            .expect("released chunk")
    }
}

impl Default for VmStack {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
