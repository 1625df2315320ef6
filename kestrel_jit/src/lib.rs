//! Compiler-integration surface of the Kestrel VM.
//!
//! Everything the execution bridge reads about compiled code lives here:
//! per-safepoint stack maps, inlining-info tables, bytecode↔compiled PC
//! maps, the compiled-method descriptors tying them together, the code
//! cache keyed by method, call-site inlining hint caches, and the numeric
//! compilation-policy configuration. All of it is written by the compiler
//! backend and read-mostly thereafter.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod code_cache;
pub mod config;
pub mod descriptor;
pub mod hints;
pub mod inlining;
pub mod pcmap;
pub mod stackmap;

pub use code_cache::CodeCache;
pub use config::{JitConfig, JitConfigError};
pub use descriptor::CompiledMethodDescriptor;
pub use hints::InlineHintCache;
pub use inlining::{InliningEntry, InliningInfo, FRAMEFLAG_ARTIFICIAL};
pub use pcmap::PcMap;
pub use stackmap::{CompiledStackMaps, StackMapView, StackMapsBuilder};

/// Shared JIT state: configuration plus the tables the invocation engine
/// and GC scanner consult. Owned once per VM, handed around as `Arc`.
#[derive(Debug)]
pub struct JitState {
    config: JitConfig,
    code_cache: CodeCache,
    virtual_hints: InlineHintCache,
    interface_hints: InlineHintCache,
}

impl JitState {
    pub fn new(config: JitConfig) -> Self {
        Self {
            config,
            code_cache: CodeCache::new(),
            virtual_hints: InlineHintCache::new(hints::VIRTUAL_HINT_SLOTS),
            interface_hints: InlineHintCache::new(hints::INTERFACE_HINT_SLOTS),
        }
    }

    #[inline]
    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    #[inline]
    pub fn code_cache(&self) -> &CodeCache {
        &self.code_cache
    }

    #[inline]
    pub fn virtual_hints(&self) -> &InlineHintCache {
        &self.virtual_hints
    }

    #[inline]
    pub fn interface_hints(&self) -> &InlineHintCache {
        &self.interface_hints
    }
}

impl Default for JitState {
    fn default() -> Self {
        Self::new(JitConfig::default())
    }
}
