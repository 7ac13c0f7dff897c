//! Plan evaluation
//!
//! The runtime walks a [`Plan`] against an input value. It keeps
//!
//! - the stack of enclosing contexts, addressed by `../`
//! - special variable frames (`@index`, `@key`, `@first`, `@last` and caller supplied data),
//!   each linked to the frame it was derived from so `@../index` can walk outwards
//! - block parameter bindings declared with `as |a b|`
//! - inline partial layers and the `@partial-block` stack
//!
//! Every push is undone before control returns to the caller, on error paths too.

use std::{borrow::Cow, rc::Rc, sync::Arc};

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::{
    error::RenderError,
    escape::Escape,
    expression::{Call, Callee, Expr, Path},
    helper::{BlockRenderer, HelperFn, HelperOptions},
    plan::{HelperStyle, Node, PartialCall, PartialTarget, Plan, Section, SectionKind},
    template::Template,
    value::{Map, Value, is_sparse},
};

type Result<T> = std::result::Result<T, RenderError>;

/// Special variables visible to one section body
struct Frame {
    vars: Map,
    parent: Option<Rc<Frame>>,
}

impl Frame {
    /// Looks a variable up here, then in the frames this one was derived from
    fn get(&self, name: &str) -> Option<&Value> {
        let mut frame = Some(self);
        while let Some(current) = frame {
            if let Some(value) = current.vars.get(name) {
                return Some(value);
            }
            frame = current.parent.as_deref();
        }
        None
    }
}

/// The body and else branch handed to a block helper
#[derive(Clone, Copy)]
struct Block<'p> {
    body: Option<&'p Plan>,
    inverse: Option<&'p Plan>,
    block_params: &'p [String],
}

/// State of one render call
pub(crate) struct Runtime<'t> {
    template: &'t Template,
    root: Value,
    /// Enclosing contexts, outermost first
    scopes: Vec<Value>,
    frame: Rc<Frame>,
    bindings: Vec<Map>,
    inline: Vec<IndexMap<String, Arc<Plan>>>,
    partial_blocks: Vec<Arc<Plan>>,
    partial_id: usize,
    depth: usize,
}

impl<'t> Runtime<'t> {
    pub fn new(template: &'t Template, root: Value, seed: Map) -> Self {
        Self {
            template,
            root,
            scopes: Vec::new(),
            frame: Rc::new(Frame {
                vars: seed,
                parent: None,
            }),
            bindings: Vec::new(),
            inline: Vec::new(),
            partial_blocks: Vec::new(),
            partial_id: 0,
            depth: 0,
        }
    }

    pub fn run(mut self) -> Result<String> {
        let template = self.template;
        let mut this = self.root.clone();
        self.render(&template.plan, &mut this)
    }

    fn render(&mut self, plan: &Plan, this: &mut Value) -> Result<String> {
        let mut layer = plan
            .inline_partials()
            .map(|(name, plan)| (name.clone(), plan.clone()))
            .peekable();
        let layered = layer.peek().is_some();
        if layered {
            self.inline.push(layer.collect());
        }
        let mut out = String::new();
        let result = self.render_nodes(plan, this, &mut out);
        if layered {
            self.inline.pop();
        }
        result.map(|()| out)
    }

    fn render_nodes(&mut self, plan: &Plan, this: &mut Value, out: &mut String) -> Result<()> {
        for node in &plan.nodes {
            match node {
                Node::Literal(text) => out.push_str(text),
                Node::Lookup { expr, escape } => {
                    let value = self.lookup(expr, this)?;
                    emit(&value, *escape, out);
                }
                Node::Helper { call, escape } => {
                    let value = self.call(call, this, None)?;
                    emit(&value, *escape, out);
                }
                Node::Section(section) => self.section(section, this, out)?,
                Node::Partial(call) => self.partial(call, this, out)?,
                Node::InlinePartialDef { .. } => (),
            }
        }
        Ok(())
    }

    /// Renders an optional branch against the current context
    fn render_branch(&mut self, plan: Option<&Plan>, this: &mut Value, out: &mut String) -> Result<()> {
        if let Some(plan) = plan {
            out.push_str(&self.render(plan, this)?);
        }
        Ok(())
    }

    /// Renders `plan` with `ctx` as the context, remembering the current one as `../`
    fn render_in(&mut self, plan: &Plan, this: &mut Value, ctx: Option<Value>) -> Result<String> {
        match ctx {
            Some(mut ctx) if ctx != *this => {
                self.scopes.push(this.clone());
                let result = self.render(plan, &mut ctx);
                self.scopes.pop();
                result
            }
            _ => self.render(plan, this),
        }
    }

    fn bind(&mut self, names: &[String], values: Vec<Value>) -> bool {
        if names.is_empty() {
            return false;
        }
        self.bindings
            .push(names.iter().cloned().zip(values).collect());
        true
    }

    fn unbind(&mut self, bound: bool) {
        if bound {
            self.bindings.pop();
        }
    }

    // Values

    fn binding(&self, name: &str) -> Option<&Value> {
        self.bindings.iter().rev().find_map(|names| names.get(name))
    }

    fn property(&self, value: &Value, segment: &str) -> Option<Value> {
        if self.template.options.property_access && segment == "length" {
            value.length()
        } else {
            None
        }
    }

    fn resolve<'a>(&'a self, path: &Path, this: &'a Value) -> Option<Cow<'a, Value>> {
        let (base, rest): (&'a Value, &[String]) = if path.special {
            let (first, rest) = path.segments.split_first()?;
            if first == "root" && path.levels == 0 {
                (&self.root, rest)
            } else {
                let mut frame: &Frame = &self.frame;
                for _ in 0..path.levels {
                    frame = frame.parent.as_deref()?;
                }
                (frame.get(first)?, rest)
            }
        } else if path.levels > 0 {
            let at = self.scopes.len().checked_sub(path.levels)?;
            (self.scopes.get(at)?, path.segments.as_slice())
        } else {
            match path.segments.split_first() {
                Some((first, rest)) => match self.binding(first) {
                    Some(bound) => (bound, rest),
                    None => (this, path.segments.as_slice()),
                },
                None => (this, path.segments.as_slice()),
            }
        };

        let mut current = Cow::Borrowed(base);
        for segment in rest {
            current = match current {
                Cow::Borrowed(value) => match value.get(segment) {
                    Some(next) => Cow::Borrowed(next),
                    None => Cow::Owned(self.property(value, segment)?),
                },
                Cow::Owned(value) => Cow::Owned(match value.get(segment) {
                    Some(next) => next.clone(),
                    None => self.property(&value, segment)?,
                }),
            };
        }
        Some(current)
    }

    fn eval(&mut self, expr: &Expr, this: &mut Value) -> Result<Value> {
        match expr {
            Expr::Path(path) => Ok(self
                .resolve(path, this)
                .map(Cow::into_owned)
                .unwrap_or_default()),
            Expr::Literal { value, .. } => Ok(value.to_value()),
            Expr::Call(call) => self.call(call, this, None),
        }
    }

    fn eval_args(&mut self, call: &Call, this: &mut Value) -> Result<(Vec<Value>, Map)> {
        let args = call
            .args
            .iter()
            .map(|arg| self.eval(arg, this))
            .collect::<Result<Vec<_>>>()?;
        let hash = self.eval_hash(&call.hash, this)?;
        Ok((args, hash))
    }

    fn eval_hash(&mut self, hash: &IndexMap<String, Expr>, this: &mut Value) -> Result<Map> {
        hash.iter()
            .map(|(name, expr)| -> Result<(String, Value)> {
                Ok((name.clone(), self.eval(expr, this)?))
            })
            .collect()
    }

    /// Interpolation: strict mode, and callables invoked without arguments
    fn lookup(&mut self, expr: &Expr, this: &mut Value) -> Result<Value> {
        let Expr::Path(path) = expr else {
            return self.eval(expr, this);
        };
        let value = match self.resolve(path, this) {
            Some(value) => value.into_owned(),
            None if self.template.options.strict => {
                return Err(RenderError::MissingVariable(path.source.clone()));
            }
            None => Value::Null,
        };
        match value {
            Value::Callable(callable) => {
                self.invoke(&path.source, &*callable.0, &[], Map::new(), this, None)
            }
            value => Ok(value),
        }
    }

    // Helpers

    fn invoke(
        &mut self,
        name: &str,
        helper: &HelperFn,
        args: &[Value],
        hash: Map,
        this: &mut Value,
        block: Option<Block<'_>>,
    ) -> Result<Value> {
        trace!(helper = name, args = args.len(), block = block.is_some(), "calling helper");
        let block = block.unwrap_or(Block {
            body: None,
            inverse: None,
            block_params: &[],
        });
        let mut options = HelperOptions {
            name,
            hash,
            this,
            body: block.body,
            inverse: block.inverse,
            block_params: block.block_params,
            renderer: self,
        };
        helper(args, &mut options).map_err(|source| RenderError::Helper {
            name: name.to_string(),
            source,
        })
    }

    fn call(&mut self, call: &Call, this: &mut Value, block: Option<Block<'_>>) -> Result<Value> {
        let (args, hash) = self.eval_args(call, this)?;
        let template = self.template;
        match &call.callee {
            Callee::Helper(name) => {
                if let Some(helper) = template.helpers.get(name) {
                    return self.invoke(name, &**helper, &args, hash, this, block);
                }
                match template.block_helpers.get(name) {
                    Some(helper) => helper(this, &args, &hash).map_err(|source| {
                        RenderError::Helper {
                            name: name.clone(),
                            source,
                        }
                    }),
                    None => Err(RenderError::MissingHelper(name.clone())),
                }
            }
            Callee::Path(path) => {
                let value = self.resolve(path, this).map(Cow::into_owned);
                match value {
                    Some(Value::Callable(callable)) => {
                        self.invoke(&path.source, &*callable.0, &args, hash, this, block)
                    }
                    value if args.is_empty() && hash.is_empty() => Ok(value.unwrap_or_default()),
                    _ => Err(RenderError::MissingHelper(path.source.clone())),
                }
            }
        }
    }

    // Sections

    fn section(&mut self, section: &Section, this: &mut Value, out: &mut String) -> Result<()> {
        let body = &section.body;
        let inverse = section.inverse.as_ref();
        let names = section.block_params.as_slice();
        match &section.kind {
            SectionKind::If {
                subject,
                include_zero,
                negate,
            } => {
                let value = self.eval(subject, this)?;
                let include_zero = match include_zero {
                    Some(expr) => self.eval(expr, this)?.is_truthy(false),
                    None => false,
                };
                let branch = if value.is_truthy(include_zero) != *negate {
                    Some(body)
                } else {
                    inverse
                };
                self.render_branch(branch, this, out)
            }
            SectionKind::With { subject } => {
                let value = self.eval(subject, this)?;
                if value.is_inverted_section() {
                    return self.render_branch(inverse, this, out);
                }
                let bound = self.bind(names, vec![value.clone()]);
                let result = self.render_in(body, this, Some(value));
                self.unbind(bound);
                out.push_str(&result?);
                Ok(())
            }
            SectionKind::Each { subject } => {
                let value = self.eval(subject, this)?;
                self.sec(value, this, body, inverse, names, true, out)
            }
            SectionKind::Value { subject, inverted } => {
                let value = self.eval(subject, this)?;
                if let Value::Callable(callable) = &value {
                    let block = Block::new(body, inverse, names, *inverted);
                    let name = subject.as_path().map_or("", |path| path.source.as_str());
                    let result = self.invoke(name, &*callable.0, &[], Map::new(), this, Some(block))?;
                    out.push_str(&result.render());
                    return Ok(());
                }
                self.value_section(value, *inverted, this, body, inverse, names, out)
            }
            SectionKind::Helper {
                call,
                style: HelperStyle::Handlebars,
                inverted,
            } => {
                let block = Block::new(body, inverse, names, *inverted);
                let result = self.call(call, this, Some(block))?;
                out.push_str(&result.render());
                Ok(())
            }
            SectionKind::Helper {
                call,
                style: HelperStyle::Positional,
                inverted,
            } => {
                let value = self.call(call, this, None)?;
                self.value_section(value, *inverted, this, body, inverse, names, out)
            }
        }
    }

    /// `{{#value}}` and `{{^value}}`
    #[allow(clippy::too_many_arguments)]
    fn value_section(
        &mut self,
        value: Value,
        inverted: bool,
        this: &mut Value,
        body: &Plan,
        inverse: Option<&Plan>,
        names: &[String],
        out: &mut String,
    ) -> Result<()> {
        if !inverted {
            return self.sec(value, this, body, inverse, names, false, out);
        }
        if value.is_inverted_section() {
            return self.render_branch(Some(body), this, out);
        }
        match inverse {
            Some(inverse) => self.sec(value, this, inverse, None, names, false, out),
            None => Ok(()),
        }
    }

    /// Section dispatch on the runtime shape of `value`
    #[allow(clippy::too_many_arguments)]
    fn sec(
        &mut self,
        value: Value,
        this: &mut Value,
        body: &Plan,
        inverse: Option<&Plan>,
        names: &[String],
        each: bool,
        out: &mut String,
    ) -> Result<()> {
        if value.is_empty_collection() {
            return self.render_branch(inverse, this, out);
        }
        let (entries, sparse) = match value {
            Value::Array(items) => (keyed(items), false),
            Value::Iterable(iterable) => (keyed(iterable.iter()), false),
            Value::Object(map) if each => {
                let sparse = is_sparse(&map);
                let entries = map
                    .into_iter()
                    .map(|(key, item)| (Value::String(key), item))
                    .collect();
                (entries, sparse)
            }
            Value::Object(map) => {
                let value = Value::Object(map);
                let bound = self.bind(names, vec![value.clone()]);
                let result = self.render_in(body, this, Some(value));
                self.unbind(bound);
                out.push_str(&result?);
                return Ok(());
            }
            _ if each => return self.render_branch(inverse, this, out),
            Value::Bool(true) => return self.render_branch(Some(body), this, out),
            Value::Null | Value::Bool(false) => return self.render_branch(inverse, this, out),
            mut other => {
                out.push_str(&self.render(body, &mut other)?);
                return Ok(());
            }
        };
        self.iterate(entries, sparse, this, body, names, out)
    }

    fn iterate(
        &mut self,
        entries: Vec<(Value, Value)>,
        sparse: bool,
        this: &mut Value,
        body: &Plan,
        names: &[String],
        out: &mut String,
    ) -> Result<()> {
        let len = entries.len();
        let parent = self.frame.clone();
        self.scopes.push(this.clone());
        let mut result = Ok(());
        for (i, (key, mut item)) in entries.into_iter().enumerate() {
            let mut vars = Map::new();
            vars.insert("first".to_string(), Value::from(i == 0));
            vars.insert("last".to_string(), Value::from(i + 1 == len));
            let index = if sparse { key.clone() } else { Value::from(i) };
            vars.insert("index".to_string(), index);
            vars.insert("key".to_string(), key.clone());
            self.frame = Rc::new(Frame {
                vars,
                parent: Some(parent.clone()),
            });
            let bound = self.bind(names, vec![item.clone(), key]);
            let rendered = self.render(body, &mut item);
            self.unbind(bound);
            match rendered {
                Ok(text) => out.push_str(&text),
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        self.frame = parent;
        self.scopes.pop();
        result
    }

    // Partials

    fn find_partial(&self, name: &str) -> Option<Arc<Plan>> {
        self.inline
            .iter()
            .rev()
            .find_map(|layer| layer.get(name))
            .or_else(|| self.template.partials.get(name))
            .cloned()
    }

    /// The plan to render for `name` and the block to expose as `@partial-block`
    fn dispatch(&self, name: &str, call: &PartialCall) -> Result<(Arc<Plan>, Option<Arc<Plan>>)> {
        debug!(partial = name, depth = self.depth, "dispatching partial");
        match (self.find_partial(name), &call.block) {
            (Some(plan), block) => Ok((plan, block.clone())),
            (None, Some(block)) => Ok((block.clone(), None)),
            (None, None) => Err(RenderError::MissingPartial(name.to_string())),
        }
    }

    fn partial(&mut self, call: &PartialCall, this: &mut Value, out: &mut String) -> Result<()> {
        let (plan, block) = match &call.target {
            PartialTarget::Embedded(plan) => (plan.clone(), call.block.clone()),
            PartialTarget::Named(name) => self.dispatch(name, call)?,
            PartialTarget::Dynamic(expr) => {
                let name = self.eval(expr, this)?.render().into_owned();
                self.dispatch(&name, call)?
            }
            PartialTarget::PartialBlock => match self.partial_blocks.pop() {
                Some(plan) => {
                    let result = self.include(call, &plan, None, this);
                    self.partial_blocks.push(plan);
                    out.push_str(&result?);
                    return Ok(());
                }
                None if self.partial_id == 0 => return Ok(()),
                None => return Err(RenderError::MissingPartial(call.name.clone())),
            },
        };
        out.push_str(&self.include(call, &plan, block, this)?);
        Ok(())
    }

    /// Renders a resolved partial with its context, block and indentation
    fn include(
        &mut self,
        call: &PartialCall,
        plan: &Plan,
        block: Option<Arc<Plan>>,
        this: &mut Value,
    ) -> Result<String> {
        let max = self.template.options.max_partial_depth;
        if self.depth >= max {
            return Err(RenderError::PartialDepth {
                name: call.name.clone(),
                depth: max,
            });
        }

        let mut ctx = match &call.context {
            Some(expr) => self.eval(expr, this)?,
            None if self.template.options.explicit_partial_context => Value::Object(Map::new()),
            None => this.clone(),
        };
        if !call.hash.is_empty() {
            let hash = self.eval_hash(&call.hash, this)?;
            ctx = match ctx {
                Value::Object(mut map) => {
                    map.extend(hash);
                    Value::Object(map)
                }
                _ => Value::Object(hash),
            };
        }

        let has_block = block.is_some();
        let mut layered = false;
        if let Some(block) = block {
            let layer: IndexMap<_, _> = block
                .inline_partials()
                .map(|(name, plan)| (name.clone(), plan.clone()))
                .collect();
            if !layer.is_empty() {
                self.inline.push(layer);
                layered = true;
            }
            self.partial_blocks.push(block);
            self.partial_id += 1;
        }
        self.depth += 1;
        let result = self.render_in(plan, this, Some(ctx));
        self.depth -= 1;
        if has_block {
            self.partial_blocks.pop();
            self.partial_id -= 1;
        }
        if layered {
            self.inline.pop();
        }

        let text = result?;
        if call.indent.is_empty() {
            return Ok(text);
        }
        Ok(text
            .split_inclusive('\n')
            .map(|line| format!("{}{line}", call.indent))
            .collect())
    }
}

impl<'p> Block<'p> {
    fn new(body: &'p Plan, inverse: Option<&'p Plan>, names: &'p [String], inverted: bool) -> Self {
        let (body, inverse) = if inverted {
            (inverse, Some(body))
        } else {
            (Some(body), inverse)
        };
        Self {
            body,
            inverse,
            block_params: names,
        }
    }
}

impl BlockRenderer for Runtime<'_> {
    fn render_block(
        &mut self,
        plan: &Plan,
        this: &mut Value,
        ctx: Option<Value>,
        data: Option<Map>,
        params: Vec<Value>,
        names: &[String],
    ) -> std::result::Result<String, RenderError> {
        let saved = data.map(|vars| {
            let frame = Rc::new(Frame {
                vars,
                parent: Some(self.frame.clone()),
            });
            std::mem::replace(&mut self.frame, frame)
        });
        let bound = !params.is_empty() && self.bind(names, params);
        let result = self.render_in(plan, this, ctx);
        self.unbind(bound);
        if let Some(frame) = saved {
            self.frame = frame;
        }
        result
    }

    fn ancestors(&self) -> &[Value] {
        &self.scopes
    }

    fn data(&self, name: &str) -> Option<Value> {
        if name == "root" {
            return Some(self.root.clone());
        }
        self.frame.get(name).cloned()
    }
}

fn keyed(items: impl IntoIterator<Item = Value>) -> Vec<(Value, Value)> {
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| (Value::from(i), item))
        .collect()
}

fn emit(value: &Value, escape: Escape, out: &mut String) {
    match value {
        Value::Safe(text) => out.push_str(text),
        value => out.push_str(&escape.apply(&value.render())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{Compiler, HelperError, Options, Registry};

    fn render_with(registry: &Registry, options: Options, src: &str, data: serde_json::Value) -> Result<String> {
        Compiler::new(options, registry)
            .compile(src)
            .unwrap()
            .render(&data.into())
    }

    fn render(src: &str, data: serde_json::Value) -> String {
        render_with(&Registry::new(), Options::default(), src, data).unwrap()
    }

    #[test]
    fn scalar_sections_change_context() {
        assert_eq!(render("{{#name}}[{{.}}]{{/name}}", json!({"name": "x"})), "[x]");
        assert_eq!(render("{{#n}}[{{.}}]{{/n}}", json!({"n": 0})), "[0]");
        assert_eq!(render("{{#flag}}{{name}}{{/flag}}", json!({"flag": true, "name": "a"})), "a");
        assert_eq!(render("{{#flag}}A{{else}}B{{/flag}}", json!({"flag": false})), "B");
    }

    #[test]
    fn object_sections_render_once() {
        assert_eq!(
            render("{{#person}}{{name}} of {{../town}}{{/person}}", json!({"person": {"name": "Ann"}, "town": "Oslo"})),
            "Ann of Oslo"
        );
    }

    #[test]
    fn inverted_sections() {
        assert_eq!(render("{{^list}}none{{/list}}", json!({"list": []})), "none");
        assert_eq!(render("{{^s}}none{{/s}}", json!({"s": ""})), "");
        assert_eq!(render("{{^list}}none{{else}}{{.}}{{/list}}", json!({"list": [1, 2]})), "12");
    }

    #[test]
    fn each_special_variables() {
        assert_eq!(
            render(
                "{{#each list}}{{@index}}{{#if @first}}F{{/if}}{{#if @last}}L{{/if}} {{/each}}",
                json!({"list": ["a", "b", "c"]})
            ),
            "0F 1 2L "
        );
        assert_eq!(
            render("{{#each map}}{{@key}}={{.}},{{/each}}", json!({"map": {"x": 1, "y": 2}})),
            "x=1,y=2,"
        );
    }

    #[test]
    fn sparse_maps_index_by_key() {
        assert_eq!(
            render("{{#each m}}{{@index}};{{/each}}", json!({"m": {"1": "a", "5": "b"}})),
            "1;5;"
        );
        assert_eq!(
            render("{{#each m}}{{@index}};{{/each}}", json!({"m": {"0": "a", "1": "b"}})),
            "0;1;"
        );
    }

    #[test]
    fn parent_frames() {
        assert_eq!(
            render(
                "{{#each outer}}{{#each this}}{{@../index}}.{{@index}} {{/each}}{{/each}}",
                json!({"outer": [["a", "b"], ["c"]]})
            ),
            "0.0 0.1 1.0 "
        );
    }

    #[test]
    fn each_over_non_iterable_uses_else() {
        assert_eq!(render("{{#each n}}x{{else}}none{{/each}}", json!({"n": 5})), "none");
    }

    #[test]
    fn iterables_are_walked() {
        let template = Compiler::new(Options::default(), &Registry::new())
            .compile("{{#each items}}{{.}}{{/each}}")
            .unwrap();
        let mut data = Map::new();
        data.insert(
            "items".to_string(),
            crate::Iterable::new(|| (1..=3).map(Value::from)).into(),
        );
        assert_eq!(template.render(&data.into()).unwrap(), "123");
    }

    #[test]
    fn data_callables_see_iteration_variables() {
        let template = Compiler::new(Options::default(), &Registry::new())
            .compile("{{#each list}}{{../f}}{{/each}}")
            .unwrap();
        let mut data = Map::new();
        data.insert("list".to_string(), Value::from(vec!["a", "b"]));
        data.insert(
            "f".to_string(),
            crate::Callable::new(|_: &[Value], options: &mut HelperOptions<'_>| {
                Ok(options.data("index").unwrap_or_default())
            })
            .into(),
        );
        assert_eq!(template.render(&data.into()).unwrap(), "01");
    }

    #[test]
    fn with_and_block_params() {
        assert_eq!(
            render("{{#with person as |p|}}{{p.name}}/{{name}}{{/with}}", json!({"person": {"name": "Ann"}})),
            "Ann/Ann"
        );
        assert_eq!(render("{{#with missing}}x{{else}}y{{/with}}", json!({})), "y");
    }

    #[test]
    fn property_access() {
        let options = Options {
            property_access: true,
            ..Options::default()
        };
        let out = render_with(&Registry::new(), options, "{{list.length}}/{{s.length}}", json!({"list": [1, 2], "s": "abc"}));
        assert_eq!(out.unwrap(), "2/3");
        assert_eq!(render("{{list.length}}", json!({"list": [1, 2]})), "");
    }

    #[test]
    fn seeded_data() {
        let template = Compiler::new(Options::default(), &Registry::new())
            .compile("{{@user}}:{{#each list}}{{@user}}{{/each}}")
            .unwrap();
        let mut seed = Map::new();
        seed.insert("user".to_string(), Value::from("u"));
        let data = Value::from(json!({"list": [1, 2]}));
        assert_eq!(template.render_with_data(&data, seed).unwrap(), "u:uu");
    }

    #[test]
    fn partial_context_and_hash() {
        let mut registry = Registry::new();
        registry.register_partial("card", "{{name}}-{{role}}");
        let out = render_with(
            &registry,
            Options::default(),
            "{{> card person role=\"admin\"}}",
            json!({"person": {"name": "Ann", "role": "user"}}),
        );
        assert_eq!(out.unwrap(), "Ann-admin");
    }

    #[test]
    fn explicit_partial_context() {
        let mut registry = Registry::new();
        registry.register_partial("p", "[{{name}}]");
        let options = Options {
            explicit_partial_context: true,
            ..Options::default()
        };
        let out = render_with(&registry, options, "{{> p}}{{> p .}}", json!({"name": "x"}));
        assert_eq!(out.unwrap(), "[][x]");
    }

    #[test]
    fn runtime_partial_depth_is_bounded() {
        let mut registry = Registry::new();
        registry.register_partial("p", "x{{> p}}");
        let options = Options {
            runtime_partials: true,
            max_partial_depth: 5,
            ..Options::default()
        };
        let err = render_with(&registry, options, "{{> p}}", json!({})).unwrap_err();
        assert_eq!(err.to_string(), "partial 'p' exceeded the maximum depth of 5");
    }

    #[test]
    fn dynamic_partials() {
        let mut registry = Registry::new();
        registry.register_partial("a", "A{{x}}").register_partial("b", "B{{x}}");
        let out = render_with(
            &registry,
            Options::default(),
            "{{> (lookup . \"which\")}}",
            json!({"which": "b", "x": 1}),
        );
        assert_eq!(out.unwrap(), "B1");
        let err = render_with(&registry, Options::default(), "{{> (lookup . \"which\")}}", json!({"which": "c"}))
            .unwrap_err();
        assert_eq!(err.to_string(), "partial 'c' could not be found");
    }

    #[test]
    fn partial_block_failover() {
        assert_eq!(render("{{#> missing}}fallback {{x}}{{/missing}}", json!({"x": 1})), "fallback 1");
    }

    #[test]
    fn errors_restore_state() {
        let mut registry = Registry::new();
        registry.register_helper("fail", |_: &[Value], _: &mut HelperOptions<'_>| {
            Err(HelperError::from("boom"))
        });
        let template = Compiler::new(Options::default(), &registry)
            .compile("{{#each list}}{{fail}}{{/each}}")
            .unwrap();
        let data = Value::from(json!({"list": [1]}));
        let err = template.render(&data).unwrap_err();
        assert_eq!(err.to_string(), "helper 'fail' failed: boom");
        // a template can be rendered again after a failure
        assert!(template.render(&data).is_err());
    }
}
