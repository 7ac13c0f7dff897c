//! Render plans
//!
//! A plan is the compiled, immutable form of a template: a tree of output producing nodes
//! that the runtime interprets directly. Section bodies are owned sub-plans, so a plan can
//! be inspected, cloned, shared between threads and serialized.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    escape::Escape,
    expression::{Call, Expr},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub nodes: Vec<Node>,
}

impl Plan {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Inline partials declared directly in this plan
    pub(crate) fn inline_partials(&self) -> impl Iterator<Item = (&String, &Arc<Plan>)> {
        self.nodes.iter().filter_map(|node| match node {
            Node::InlinePartialDef { name, plan } => Some((name, plan)),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Literal(String),
    /// `{{path}}`, encoded with `escape`
    Lookup { expr: Expr, escape: Escape },
    /// `{{helper args}}`, encoded with `escape` unless the helper returns a safe string
    Helper { call: Call, escape: Escape },
    Section(Box<Section>),
    Partial(Box<PartialCall>),
    /// `{{#*inline "name"}}`, registered when the enclosing plan starts rendering
    InlinePartialDef { name: String, plan: Arc<Plan> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub kind: SectionKind,
    pub body: Plan,
    pub inverse: Option<Plan>,
    /// Names declared with `as |a b|`
    pub block_params: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HelperStyle {
    /// Receives an options record and renders its own body
    Handlebars,
    /// Returns a new context for an ordinary section
    Positional,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SectionKind {
    /// `#if` and `#unless`
    If {
        subject: Expr,
        include_zero: Option<Expr>,
        negate: bool,
    },
    With {
        subject: Expr,
    },
    Each {
        subject: Expr,
    },
    /// `{{#path}}`, or `{{^path}}` when inverted
    Value {
        subject: Expr,
        inverted: bool,
    },
    Helper {
        call: Call,
        style: HelperStyle,
        inverted: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PartialTarget {
    /// Compiled into the calling plan
    Embedded(Arc<Plan>),
    /// Looked up in inline partials, then the template's partial table
    Named(String),
    /// Name computed at render time
    Dynamic(Expr),
    /// `{{> @partial-block}}`
    PartialBlock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialCall {
    /// The name as written, for diagnostics
    pub name: String,
    pub target: PartialTarget,
    /// Explicit context argument
    pub context: Option<Expr>,
    /// Merged into the context
    pub hash: IndexMap<String, Expr>,
    /// Prepended to every line of a standalone partial's output
    pub indent: String,
    /// Body of `{{#> name}}...{{/name}}`
    pub block: Option<Arc<Plan>>,
}
