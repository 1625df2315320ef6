//! Compilation-policy configuration.
//!
//! Numeric tunables consumed by the cost bookkeeping in the execution
//! bridge and by the external compilation policy. Nothing in this crate
//! decides when to compile; these are inputs to whoever does.

use thiserror::Error;

// =============================================================================
// Inlining-policy bits
// =============================================================================

/// Inline virtual calls (devirtualized via hints or CHA).
pub const INLINE_VIRTUAL: u32 = 1 << 0;
/// Inline nonvirtual (static, private, final) calls.
pub const INLINE_NONVIRTUAL: u32 = 1 << 1;
/// Inline synchronized virtual callees.
pub const INLINE_VIRTUAL_SYNC: u32 = 1 << 2;
/// Inline synchronized nonvirtual callees.
pub const INLINE_NONVIRTUAL_SYNC: u32 = 1 << 3;
/// Consult the virtual-call hint cache when inlining.
pub const INLINE_USE_VIRTUAL_HINTS: u32 = 1 << 4;
/// Consult the interface-call hint cache when inlining.
pub const INLINE_USE_INTERFACE_HINTS: u32 = 1 << 5;

const INLINE_DEFAULT: u32 =
    INLINE_VIRTUAL | INLINE_NONVIRTUAL | INLINE_USE_VIRTUAL_HINTS | INLINE_USE_INTERFACE_HINTS;
const INLINE_ALL: u32 = INLINE_DEFAULT;

// =============================================================================
// JitConfig
// =============================================================================

/// The tunables, with the stock defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitConfig {
    /// Cost subtracted per interpreted→interpreted invocation by the
    /// interpreter's own bookkeeping.
    pub interpreter_transition_cost: i32,
    /// Cost subtracted per interpreted⇄compiled crossing, exactly once per
    /// crossing, symmetric for both call directions.
    pub mixed_transition_cost: i32,
    /// Cost subtracted per backwards branch taken while interpreting.
    pub backwards_branch_cost: i32,
    /// Invocation cost at which a method becomes a compilation candidate.
    pub compile_threshold: i32,
    /// Inlining-policy bit set (`INLINE_*`).
    pub what_to_inline: u32,
    pub max_inline_depth: u32,
    pub max_inline_code_len: u32,
    pub min_inline_code_len: u32,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            interpreter_transition_cost: 20,
            mixed_transition_cost: 50,
            backwards_branch_cost: 4,
            compile_threshold: 20000,
            what_to_inline: INLINE_DEFAULT,
            max_inline_depth: 12,
            max_inline_code_len: 68,
            min_inline_code_len: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JitConfigError {
    #[error("unknown option `{0}`")]
    UnknownOption(String),
    #[error("bad value `{value}` for option `{option}`")]
    BadValue { option: String, value: String },
}

impl JitConfig {
    /// Whether an inlining-policy bit is enabled.
    #[inline]
    pub fn inlines(&self, bit: u32) -> bool {
        self.what_to_inline & bit != 0
    }

    /// Parse an option string of the form `key=value,key=value`.
    ///
    /// Numeric keys: `icost`, `mcost`, `bcost`, `climit`, `maxInlineDepth`,
    /// `maxInlineCodeLen`, `minInlineCodeLen`. The `inline` key accepts
    /// `none`, `default`, `all`, or a `+`-joined list of `virtual`,
    /// `nonvirtual`, `vsync`, `nvsync`, `vhints`, `ihints`. Unknown keys
    /// and malformed values are rejected.
    pub fn parse(options: &str) -> Result<Self, JitConfigError> {
        let mut config = Self::default();
        for opt in options.split(',').filter(|s| !s.is_empty()) {
            let (key, value) = opt.split_once('=').ok_or_else(|| {
                JitConfigError::BadValue {
                    option: opt.to_string(),
                    value: String::new(),
                }
            })?;
            let bad = || JitConfigError::BadValue {
                option: key.to_string(),
                value: value.to_string(),
            };
            match key {
                "icost" => config.interpreter_transition_cost = value.parse().map_err(|_| bad())?,
                "mcost" => config.mixed_transition_cost = value.parse().map_err(|_| bad())?,
                "bcost" => config.backwards_branch_cost = value.parse().map_err(|_| bad())?,
                "climit" => config.compile_threshold = value.parse().map_err(|_| bad())?,
                "maxInlineDepth" => config.max_inline_depth = value.parse().map_err(|_| bad())?,
                "maxInlineCodeLen" => {
                    config.max_inline_code_len = value.parse().map_err(|_| bad())?
                }
                "minInlineCodeLen" => {
                    config.min_inline_code_len = value.parse().map_err(|_| bad())?
                }
                "inline" => config.what_to_inline = parse_inline(value).ok_or_else(bad)?,
                _ => return Err(JitConfigError::UnknownOption(key.to_string())),
            }
        }
        Ok(config)
    }
}

fn parse_inline(value: &str) -> Option<u32> {
    match value {
        "none" => return Some(0),
        "default" => return Some(INLINE_DEFAULT),
        "all" => return Some(INLINE_ALL),
        _ => {}
    }
    let mut bits = 0;
    for part in value.split('+') {
        bits |= match part {
            "virtual" => INLINE_VIRTUAL,
            "nonvirtual" => INLINE_NONVIRTUAL,
            "vsync" => INLINE_VIRTUAL_SYNC,
            "nvsync" => INLINE_NONVIRTUAL_SYNC,
            "vhints" => INLINE_USE_VIRTUAL_HINTS,
            "ihints" => INLINE_USE_INTERFACE_HINTS,
            _ => return None,
        };
    }
    Some(bits)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = JitConfig::default();
        assert_eq!(c.interpreter_transition_cost, 20);
        assert_eq!(c.mixed_transition_cost, 50);
        assert_eq!(c.backwards_branch_cost, 4);
        assert_eq!(c.compile_threshold, 20000);
        assert_eq!(c.max_inline_depth, 12);
        assert!(c.inlines(INLINE_VIRTUAL));
        assert!(c.inlines(INLINE_USE_INTERFACE_HINTS));
        assert!(!c.inlines(INLINE_VIRTUAL_SYNC));
    }

    #[test]
    fn test_parse_numeric_options() {
        let c = JitConfig::parse("icost=10,mcost=25,climit=5000").unwrap();
        assert_eq!(c.interpreter_transition_cost, 10);
        assert_eq!(c.mixed_transition_cost, 25);
        assert_eq!(c.compile_threshold, 5000);
        // Untouched keys keep their defaults.
        assert_eq!(c.backwards_branch_cost, 4);
    }

    #[test]
    fn test_parse_inline_sets() {
        let c = JitConfig::parse("inline=none").unwrap();
        assert_eq!(c.what_to_inline, 0);

        let c = JitConfig::parse("inline=virtual+vhints").unwrap();
        assert!(c.inlines(INLINE_VIRTUAL));
        assert!(c.inlines(INLINE_USE_VIRTUAL_HINTS));
        assert!(!c.inlines(INLINE_NONVIRTUAL));
    }

    #[test]
    fn test_parse_rejects_unknown_key() {
        assert_eq!(
            JitConfig::parse("frobnicate=1"),
            Err(JitConfigError::UnknownOption("frobnicate".into()))
        );
    }

    #[test]
    fn test_parse_rejects_bad_value() {
        assert!(matches!(
            JitConfig::parse("icost=banana"),
            Err(JitConfigError::BadValue { .. })
        ));
        assert!(matches!(
            JitConfig::parse("inline=bogus"),
            Err(JitConfigError::BadValue { .. })
        ));
    }

    #[test]
    fn test_parse_empty_is_default() {
        assert_eq!(JitConfig::parse("").unwrap(), JitConfig::default());
    }
}
