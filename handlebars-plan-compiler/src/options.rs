//! Compiler options
//!
//! A static configuration record consumed when compilation starts. It derives serde's
//! `Deserialize` with field defaults so it can be loaded straight from a config file.

use serde::{Deserialize, Serialize};

use crate::escape::Escape;

/// Tag delimiter pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiters {
    pub open: String,
    pub close: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            open: "{{".to_string(),
            close: "}}".to_string(),
        }
    }
}

/// Compiler options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Encoder applied to `{{x}}`; `{{{x}}}` and `{{&x}}` are never encoded
    pub escape: Escape,
    /// A missing variable in an interpolation is a render error
    pub strict: bool,
    /// Allow `length` on lists and strings
    pub property_access: bool,
    /// Emit a standalone partial's indentation once instead of on every line
    pub prevent_indent: bool,
    /// Partials called without a context argument render against an empty map
    pub explicit_partial_context: bool,
    /// Calls to unregistered helpers are compile errors
    pub known_helpers_only: bool,
    /// Keep the whitespace around standalone tags
    pub ignore_standalone: bool,
    /// Resolve partials by name at render time instead of inlining them
    pub runtime_partials: bool,
    /// Guard against unbounded partial recursion at render time
    pub max_partial_depth: usize,
    pub delimiters: Delimiters,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            escape: Escape::Html,
            strict: false,
            property_access: false,
            prevent_indent: false,
            explicit_partial_context: false,
            known_helpers_only: false,
            ignore_standalone: false,
            runtime_partials: false,
            max_partial_depth: 64,
            delimiters: Delimiters::default(),
        }
    }
}
