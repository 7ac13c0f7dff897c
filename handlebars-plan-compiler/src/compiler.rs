//! Handlebars template compilation
//!
//! Compiles the validated token stream of a template into a [`Plan`]. The work is:
//!
//! - nesting block bodies and `{{else}}` branches into sections, with `{{else if x}}`
//!   emitted as an `if` nested inside the else branch
//! - deciding for each tag whether it is a builtin block, a registered helper, a call
//!   resolved at render time or a plain lookup
//! - resolving partials: compiled into the calling plan by default, or dispatched by name at
//!   render time when runtime partials are enabled or the name is computed
//!
//! # Examples
//!
//! ```ignore
//! let registry = Registry::new();
//! let compiler = Compiler::new(Options::default(), &registry);
//! let template = compiler.compile("Hello {{name}}!")?;
//! assert_eq!(template.render(&json!({"name": "World"}).into())?, "Hello World!");
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::{
    block::{BUILTINS, BlockArgs},
    error::{CompileError, ParseError},
    escape::Escape,
    expression::{Call, Callee, Expr, ExprParser, Parsed, PartialName, Path},
    options::Options,
    plan::{HelperStyle, Node, PartialCall, PartialTarget, Plan, Section, SectionKind},
    registry::Registry,
    state::CompileState,
    template::Template,
    validator::{Tag, TagKind, Token, validate},
};

/// A block whose closing tag has not been reached yet
struct Scope {
    tag: Tag,
    body: Vec<Node>,
    inverse: Option<Vec<Node>>,
    /// Opened by `{{else if}}`; closed together with its parent
    chained: bool,
}

/// Builds one plan from one token stream
struct PlanBuilder<'s, 'r> {
    state: &'s mut CompileState<'r>,
    root: Vec<Node>,
    open_stack: Vec<Scope>,
}

impl<'s, 'r> PlanBuilder<'s, 'r> {
    fn new(state: &'s mut CompileState<'r>) -> Self {
        Self {
            state,
            root: Vec::new(),
            open_stack: Vec::new(),
        }
    }

    fn nodes(&mut self) -> &mut Vec<Node> {
        match self.open_stack.last_mut() {
            Some(scope) => scope.inverse.as_mut().unwrap_or(&mut scope.body),
            None => &mut self.root,
        }
    }

    fn push(&mut self, node: Node) {
        let nodes = self.nodes();
        if let Node::Literal(text) = &node {
            if let Some(Node::Literal(last)) = nodes.last_mut() {
                last.push_str(text);
                return;
            }
        }
        nodes.push(node);
    }

    fn build(mut self, tokens: Vec<Token>) -> Plan {
        for token in tokens {
            match token {
                Token::Text(text) => self.push(Node::Literal(text)),
                Token::Tag(tag) => self.tag(tag),
            }
        }
        while !self.open_stack.is_empty() {
            self.close();
        }
        Plan::new(self.root)
    }

    fn tag(&mut self, tag: Tag) {
        match &tag.kind {
            TagKind::Variable { raw } => {
                let raw = *raw;
                if let Some(node) = self.variable(tag, raw) {
                    self.push(node);
                }
            }
            TagKind::Comment => (),
            TagKind::Open | TagKind::OpenInverse | TagKind::PartialBlock { .. } => {
                self.open(tag, false)
            }
            TagKind::Inline { name } => {
                if !self.state.declare_inline(name) {
                    self.state.warn(format!(
                        "inline partial '{name}' redefined on line {}",
                        tag.line
                    ));
                }
                self.open(tag, false);
            }
            TagKind::Else { chained } => {
                let chained = *chained;
                self.handle_else(tag, chained);
            }
            TagKind::Close => self.close_tag(),
            TagKind::Partial { name } => {
                let name = name.clone();
                if let Some(node) = self.partial(tag, name, None) {
                    self.push(node);
                }
            }
            TagKind::RawBlock { body } => {
                let body = body.clone();
                let node = self.raw_block(tag, body);
                self.push(node);
            }
        }
    }

    fn open(&mut self, tag: Tag, chained: bool) {
        self.state.push_inline_layer();
        self.open_stack.push(Scope {
            tag,
            body: Vec::new(),
            inverse: None,
            chained,
        });
    }

    fn handle_else(&mut self, tag: Tag, chained: bool) {
        let Some(scope) = self.open_stack.last_mut() else {
            return;
        };
        let accepts_else = matches!(scope.tag.kind, TagKind::Open | TagKind::OpenInverse)
            || matches!(scope.tag.kind, TagKind::Else { chained: true });
        if !accepts_else || scope.inverse.is_some() {
            return;
        }
        scope.inverse = Some(Vec::new());
        self.state.pop_inline_layer();
        self.state.push_inline_layer();
        if chained {
            self.open(tag, true);
        }
    }

    fn close_tag(&mut self) {
        while let Some(chained) = self.open_stack.last().map(|scope| scope.chained) {
            self.close();
            if !chained {
                break;
            }
        }
    }

    fn close(&mut self) {
        let Some(scope) = self.open_stack.pop() else {
            return;
        };
        let Scope {
            tag, body, inverse, ..
        } = scope;
        let body = Plan::new(body);
        let inverse = inverse.map(Plan::new);
        let node = match &tag.kind {
            TagKind::Open | TagKind::Else { .. } => Some(self.section(tag, body, inverse, false)),
            TagKind::OpenInverse => Some(self.section(tag, body, inverse, true)),
            TagKind::PartialBlock { name } => {
                let name = name.clone();
                self.partial(tag, name, Some(Arc::new(body)))
            }
            TagKind::Inline { name } => Some(Node::InlinePartialDef {
                name: name.clone(),
                plan: Arc::new(body),
            }),
            _ => None,
        };
        // a partial block's own inline partials stay visible while the partial compiles
        self.state.pop_inline_layer();
        if let Some(node) = node {
            self.push(node);
        }
    }

    /// Parses the head of a tag as an expression
    fn head_expr(&mut self, tag: &Tag) -> Expr {
        let parsed = ExprParser::new(self.state, &tag.source, tag.line).parse_expr(&tag.parsed.head);
        match parsed {
            Ok(expr) => expr,
            Err(err) => {
                self.state.error(err);
                Expr::this()
            }
        }
    }

    fn head_path(&mut self, tag: &Tag) -> Path {
        let parsed = ExprParser::new(self.state, &tag.source, tag.line).parse_path(&tag.parsed.head);
        match parsed {
            Ok(path) => path,
            Err(err) => {
                self.state.error(err);
                Path::this()
            }
        }
    }

    fn missing_helper(&mut self, tag: &Tag) {
        self.state.error(ParseError::MissingHelper {
            name: tag.parsed.head.clone(),
            tag: tag.source.clone(),
            line: tag.line,
        });
    }

    /// Picks the callee for `{{head args}}`, or `None` for a plain lookup
    fn callee(&mut self, tag: &Tag) -> Option<(Callee, HelperStyle)> {
        let head = tag.parsed.head.as_str();
        let registry = self.state.registry;
        if registry.helpers.contains_key(head) {
            return Some((Callee::Helper(head.to_string()), HelperStyle::Handlebars));
        }
        if registry.block_helpers.contains_key(head) {
            return Some((Callee::Helper(head.to_string()), HelperStyle::Positional));
        }
        if tag.parsed.params.is_empty() && tag.parsed.hash.is_empty() {
            return None;
        }
        if self.state.options.known_helpers_only {
            self.missing_helper(tag);
        }
        Some((Callee::Path(self.head_path(tag)), HelperStyle::Handlebars))
    }

    fn variable(&mut self, tag: Tag, raw: bool) -> Option<Node> {
        if tag.parsed.head.is_empty() {
            self.state.error(ParseError::arguments("empty tag", &tag.source, tag.line));
            return None;
        }
        let escape = if raw {
            Escape::None
        } else {
            self.state.options.escape
        };
        match self.callee(&tag) {
            Some((callee, _)) => {
                self.state.usage.helpers += 1;
                let Parsed { params, hash, .. } = tag.parsed;
                Some(Node::Helper {
                    call: Call {
                        callee,
                        args: params,
                        hash,
                    },
                    escape,
                })
            }
            None => Some(Node::Lookup {
                expr: self.head_expr(&tag),
                escape,
            }),
        }
    }

    fn section(&mut self, tag: Tag, body: Plan, inverse: Option<Plan>, inverted: bool) -> Node {
        let head = tag.parsed.head.as_str();
        let (kind, body, inverse) = match BUILTINS.get(head) {
            Some(factory) => {
                let args = BlockArgs {
                    tag: &tag,
                    params: tag.parsed.params.clone(),
                    hash: tag.parsed.hash.clone(),
                };
                let kind = factory.open(args, self.state);
                // `{{^if x}}` runs the branches the other way round
                if inverted {
                    (kind, inverse.unwrap_or_default(), Some(body))
                } else {
                    (kind, body, inverse)
                }
            }
            None => {
                let kind = match self.callee(&tag) {
                    Some((callee, style)) => {
                        self.state.usage.block_helpers += 1;
                        SectionKind::Helper {
                            call: Call {
                                callee,
                                args: tag.parsed.params.clone(),
                                hash: tag.parsed.hash.clone(),
                            },
                            style,
                            inverted,
                        }
                    }
                    None => SectionKind::Value {
                        subject: self.head_expr(&tag),
                        inverted,
                    },
                };
                (kind, body, inverse)
            }
        };
        Node::Section(Box::new(Section {
            kind,
            body,
            inverse,
            block_params: tag.parsed.block_params,
        }))
    }

    fn raw_block(&mut self, tag: Tag, body: String) -> Node {
        let registry = self.state.registry;
        let head = tag.parsed.head.as_str();
        let style = if registry.helpers.contains_key(head) {
            HelperStyle::Handlebars
        } else if registry.block_helpers.contains_key(head) {
            HelperStyle::Positional
        } else {
            return Node::Literal(body);
        };
        self.state.usage.block_helpers += 1;
        Node::Section(Box::new(Section {
            kind: SectionKind::Helper {
                call: Call {
                    callee: Callee::Helper(head.to_string()),
                    args: Vec::new(),
                    hash: Default::default(),
                },
                style,
                inverted: false,
            },
            body: Plan::new(vec![Node::Literal(body)]),
            inverse: None,
            block_params: Vec::new(),
        }))
    }

    fn partial(&mut self, tag: Tag, name: PartialName, block: Option<Arc<Plan>>) -> Option<Node> {
        let Tag {
            parsed,
            source,
            line,
            indent,
            ..
        } = tag;
        if parsed.params.len() > 1 {
            self.state.error(ParseError::arguments(
                "a partial takes at most one context argument",
                &source,
                line,
            ));
        }
        let (label, target) = match name {
            PartialName::Dynamic(expr) => {
                self.state.dynamic_partials = true;
                (source, PartialTarget::Dynamic(expr))
            }
            PartialName::Static(name) => {
                let target = self.static_partial(&name, block.is_some(), &source, line)?;
                (name, target)
            }
        };
        Some(Node::Partial(Box::new(PartialCall {
            name: label,
            target,
            context: parsed.params.into_iter().next(),
            hash: parsed.hash,
            indent,
            block,
        })))
    }

    fn static_partial(
        &mut self,
        name: &str,
        has_block: bool,
        tag: &str,
        line: usize,
    ) -> Option<PartialTarget> {
        if name == "@partial-block" {
            return Some(PartialTarget::PartialBlock);
        }
        if self.state.has_inline(name) {
            return Some(PartialTarget::Named(name.to_string()));
        }
        if self.state.options.runtime_partials {
            compile_into_table(self.state, name);
            return Some(PartialTarget::Named(name.to_string()));
        }
        if self.state.registry.partial(name).is_none() {
            if has_block {
                // resolved at render time, falling back to the block
                return Some(PartialTarget::Named(name.to_string()));
            }
            self.state.error(ParseError::PartialNotFound {
                name: name.to_string(),
                tag: tag.to_string(),
                line,
            });
            return None;
        }
        Some(match embed(self.state, name) {
            Some(plan) => PartialTarget::Embedded(plan),
            None => PartialTarget::Named(name.to_string()),
        })
    }
}

/// Runs the whole pipeline over one source text
fn compile_source(src: &str, state: &mut CompileState<'_>) -> Plan {
    let tokens = validate(src, state);
    debug!(tokens = tokens.len(), "validated template");
    PlanBuilder::new(state).build(tokens)
}

/// Compiles a partial's source, wrapping its diagnostics with the partial's name
fn compile_partial(state: &mut CompileState<'_>, name: &str, source: &str) -> Arc<Plan> {
    debug!(partial = name, "compiling partial");
    let outer = std::mem::take(&mut state.errors);
    state.push_inline_layer();
    let plan = compile_source(source, state);
    state.pop_inline_layer();
    let inner = std::mem::replace(&mut state.errors, outer);
    state
        .errors
        .extend(inner.into_iter().map(|error| ParseError::InPartial {
            partial: name.to_string(),
            error: Box::new(error),
        }));
    Arc::new(plan)
}

/// Compiles a partial for inlining, refusing recursion
fn embed(state: &mut CompileState<'_>, name: &str) -> Option<Arc<Plan>> {
    if let Some(at) = state.partial_stack.iter().position(|open| open == name) {
        let mut chain = state.partial_stack[at..].to_vec();
        chain.push(name.to_string());
        state.error(ParseError::RecursivePartial {
            chain: chain.join(" -> "),
        });
        return None;
    }
    if let Some(plan) = state.compiled_partials.get(name) {
        return Some(plan.clone());
    }
    let registry = state.registry;
    let source = registry.partial(name)?;
    state.partial_stack.push(name.to_string());
    let plan = compile_partial(state, name, source);
    state.partial_stack.pop();
    state.compiled_partials.insert(name.to_string(), plan.clone());
    Some(plan)
}

/// Compiles a partial once into the table used for render time dispatch
fn compile_into_table(state: &mut CompileState<'_>, name: &str) {
    if state.partial_table.contains_key(name) || !state.pending_partials.insert(name.to_string()) {
        return;
    }
    let registry = state.registry;
    if let Some(source) = registry.partial(name) {
        let plan = compile_partial(state, name, source);
        state.partial_table.insert(name.to_string(), plan);
    }
    state.pending_partials.remove(name);
}

/// Main compiler implementation
pub struct Compiler<'r> {
    options: Options,
    registry: &'r Registry,
}

impl<'r> Compiler<'r> {
    pub fn new(options: Options, registry: &'r Registry) -> Self {
        Self { options, registry }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Compiles a template, reporting every diagnostic found in the full pass
    pub fn compile(&self, src: &str) -> Result<Template, CompileError> {
        debug!(bytes = src.len(), "compiling template");
        let mut state = CompileState::new(&self.options, self.registry);
        let plan = compile_source(src, &mut state);

        if state.dynamic_partials {
            let registry = self.registry;
            for name in registry.partial_names() {
                if self.options.runtime_partials {
                    compile_into_table(&mut state, name);
                } else if let Some(plan) = embed(&mut state, name) {
                    state.partial_table.insert(name.to_string(), plan);
                }
            }
        }

        if !state.errors.is_empty() {
            debug!(errors = state.errors.len(), "template failed to compile");
            return Err(CompileError {
                errors: state.errors,
            });
        }
        debug!(
            nodes = plan.nodes.len(),
            partials = state.partial_table.len(),
            warnings = state.warnings.len(),
            "compiled template"
        );
        Ok(Template::new(
            plan,
            state.partial_table,
            self.registry,
            self.options.clone(),
            state.usage,
            state.warnings,
        ))
    }
}
