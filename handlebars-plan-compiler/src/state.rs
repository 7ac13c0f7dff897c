//! State shared by every stage of one compile call

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{error::ParseError, options::Options, plan::Plan, registry::Registry};

/// Feature usage counters recorded while compiling
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub variables: usize,
    /// Paths starting with `../`
    pub parent_paths: usize,
    pub root_paths: usize,
    /// `@index`, `@key`, `@first`, `@last` and friends
    pub special_vars: usize,
    pub helpers: usize,
    pub block_helpers: usize,
    pub subexpressions: usize,
    pub partials: usize,
    pub dynamic_partials: usize,
    pub partial_blocks: usize,
    pub inline_partials: usize,
    pub raw_blocks: usize,
    pub comments: usize,
    pub else_branches: usize,
    pub block_params: usize,
    pub sections: usize,
}

pub(crate) struct CompileState<'r> {
    pub options: &'r Options,
    pub registry: &'r Registry,
    pub errors: Vec<ParseError>,
    pub warnings: Vec<String>,
    pub usage: Usage,
    /// Partials being compiled inline, outermost first
    pub partial_stack: Vec<String>,
    /// Inlined partial plans by name
    pub compiled_partials: HashMap<String, Arc<Plan>>,
    /// Partials dispatched by name at render time
    pub partial_table: IndexMap<String, Arc<Plan>>,
    /// Table entries currently being compiled
    pub pending_partials: HashSet<String>,
    /// Names declared with `{{#*inline}}`, one layer per open block body or partial
    inline_partials: Vec<HashSet<String>>,
    pub dynamic_partials: bool,
}

impl<'r> CompileState<'r> {
    pub fn new(options: &'r Options, registry: &'r Registry) -> Self {
        Self {
            options,
            registry,
            errors: Vec::new(),
            warnings: Vec::new(),
            usage: Usage::default(),
            partial_stack: Vec::new(),
            compiled_partials: HashMap::new(),
            partial_table: IndexMap::new(),
            pending_partials: HashSet::new(),
            inline_partials: vec![HashSet::new()],
            dynamic_partials: false,
        }
    }

    pub fn error(&mut self, error: ParseError) {
        self.errors.push(error);
    }

    pub fn push_inline_layer(&mut self) {
        self.inline_partials.push(HashSet::new());
    }

    pub fn pop_inline_layer(&mut self) {
        self.inline_partials.pop();
    }

    /// Declares an inline partial in the innermost layer; false if that layer already has it
    pub fn declare_inline(&mut self, name: &str) -> bool {
        match self.inline_partials.last_mut() {
            Some(layer) => layer.insert(name.to_string()),
            None => true,
        }
    }

    /// Whether an enclosing block or calling template declared `name`
    pub fn has_inline(&self, name: &str) -> bool {
        self.inline_partials.iter().any(|layer| layer.contains(name))
    }

    pub fn warn(&mut self, warning: String) {
        tracing::debug!(%warning, "compile warning");
        self.warnings.push(warning);
    }
}
