//! Helper calling protocol
//!
//! Two kinds of helper can be registered:
//!
//! - Handlebars style helpers ([`HelperFn`]) receive their positional arguments and a
//!   [`HelperOptions`] record. Used as blocks they decide for themselves whether and how to
//!   render the body, and their return value is emitted without escaping.
//! - Positional block helpers ([`BlockHelperFn`]) receive the current context, the
//!   positional arguments and the hash. The returned value becomes the subject of an
//!   ordinary section: lists iterate, maps and scalars become the new context, `null` and
//!   `false` select the else branch.
//!
//! ```ignore
//! registry.register_helper("bold", |args, options| {
//!     let inner = options.render()?;
//!     Ok(Value::safe(format!("<b>{}{}</b>", args[0], inner)))
//! });
//! ```

use tracing::{Level, debug, error, info, trace, warn};

use crate::{
    error::{HelperError, RenderError},
    plan::Plan,
    registry::Registry,
    value::{Map, Value},
};

/// What a helper returns
pub type HelperResult = Result<Value, HelperError>;

/// A handlebars style helper
pub type HelperFn = dyn Fn(&[Value], &mut HelperOptions<'_>) -> HelperResult + Send + Sync;

/// A positional block helper: `(context, args, hash) -> new context`
pub type BlockHelperFn = dyn Fn(&Value, &[Value], &Map) -> HelperResult + Send + Sync;

/// Callbacks into the running evaluator
pub(crate) trait BlockRenderer {
    /// Renders `plan`, optionally against a new context, a new data frame and block params
    fn render_block(
        &mut self,
        plan: &Plan,
        this: &mut Value,
        ctx: Option<Value>,
        data: Option<Map>,
        params: Vec<Value>,
        names: &[String],
    ) -> Result<String, RenderError>;

    /// Enclosing contexts, outermost first, excluding the current one
    fn ancestors(&self) -> &[Value];

    /// Looks up a special variable in the active frame
    fn data(&self, name: &str) -> Option<Value>;
}

/// Everything a helper can see besides its positional arguments
pub struct HelperOptions<'a> {
    /// The name the helper was called by
    pub name: &'a str,
    /// Named arguments in call order
    pub hash: Map,
    /// The live current context; changes are seen by later siblings in the same body
    pub this: &'a mut Value,
    pub(crate) body: Option<&'a Plan>,
    pub(crate) inverse: Option<&'a Plan>,
    pub(crate) block_params: &'a [String],
    pub(crate) renderer: &'a mut dyn BlockRenderer,
}

impl HelperOptions<'_> {
    /// Whether the helper was called with a body
    pub fn is_block(&self) -> bool {
        self.body.is_some()
    }

    /// Block parameter names declared at the call site
    pub fn block_param_names(&self) -> &[String] {
        self.block_params
    }

    fn render_plan(
        &mut self,
        plan: Option<&Plan>,
        ctx: Option<Value>,
        data: Option<Map>,
        params: Vec<Value>,
    ) -> Result<String, HelperError> {
        let Some(plan) = plan else {
            return Ok(String::new());
        };
        Ok(self
            .renderer
            .render_block(plan, self.this, ctx, data, params, self.block_params)?)
    }

    /// Renders the body against the current context
    pub fn render(&mut self) -> Result<String, HelperError> {
        self.render_plan(self.body, None, None, Vec::new())
    }

    /// Renders the body against a new context
    pub fn render_with(&mut self, ctx: Value) -> Result<String, HelperError> {
        self.render_plan(self.body, Some(ctx), None, Vec::new())
    }

    /// Renders the body with extra special variables and block parameter values
    ///
    /// `data` entries become `@name` variables inheriting the caller's frame. `params` bind
    /// positionally to the names declared with `as |a b|`.
    pub fn render_with_data(
        &mut self,
        ctx: Option<Value>,
        data: Map,
        params: Vec<Value>,
    ) -> Result<String, HelperError> {
        self.render_plan(self.body, ctx, Some(data), params)
    }

    /// Renders the else branch against the current context
    pub fn inverse(&mut self) -> Result<String, HelperError> {
        self.render_plan(self.inverse, None, None, Vec::new())
    }

    pub fn inverse_with(&mut self, ctx: Value) -> Result<String, HelperError> {
        self.render_plan(self.inverse, Some(ctx), None, Vec::new())
    }

    /// The call site's context stack, outermost first, ending with the current context
    pub fn contexts(&self) -> Vec<&Value> {
        self.renderer
            .ancestors()
            .iter()
            .chain(std::iter::once(&*self.this))
            .collect()
    }

    /// A special variable such as `index` or `root`
    pub fn data(&self, name: &str) -> Option<Value> {
        self.renderer.data(name)
    }
}

/// `{{lookup obj key}}`
fn lookup(args: &[Value], _options: &mut HelperOptions<'_>) -> HelperResult {
    match args {
        [target, key, ..] => Ok(target.get(&key.render()).cloned().unwrap_or_default()),
        _ => Err(HelperError::from("lookup requires an object and a key")),
    }
}

/// `{{log "message" value level="warn"}}`
fn log(args: &[Value], options: &mut HelperOptions<'_>) -> HelperResult {
    let message = args
        .iter()
        .map(|arg| arg.render().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let level = options
        .hash
        .get("level")
        .map(|level| level.render().parse::<Level>())
        .transpose()
        .map_err(|_| HelperError::from("log level must be one of trace, debug, info, warn, error"))?
        .unwrap_or(Level::INFO);
    match level {
        Level::TRACE => trace!("{message}"),
        Level::DEBUG => debug!("{message}"),
        Level::INFO => info!("{message}"),
        Level::WARN => warn!("{message}"),
        _ => error!("{message}"),
    }
    Ok(Value::Null)
}

/// Installs the builtin helpers
pub(crate) fn add_builtins(registry: &mut Registry) {
    registry.register_helper("lookup", lookup);
    registry.register_helper("log", log);
}
