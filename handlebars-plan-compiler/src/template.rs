//! Compiled templates

use std::{collections::HashMap, fmt, sync::Arc};

use indexmap::IndexMap;

use crate::{
    error::RenderError,
    helper::{BlockHelperFn, HelperFn},
    options::Options,
    plan::Plan,
    registry::Registry,
    runtime::Runtime,
    state::Usage,
    value::{Map, Value},
};

/// An immutable, render-ready template
///
/// Holds everything a render call needs: the plan, the partials dispatched by name, the
/// helpers visible at compile time and the options in effect. A template can be rendered any
/// number of times, from any number of threads.
#[derive(Clone)]
pub struct Template {
    pub(crate) plan: Plan,
    pub(crate) partials: IndexMap<String, Arc<Plan>>,
    pub(crate) helpers: HashMap<String, Arc<HelperFn>>,
    pub(crate) block_helpers: HashMap<String, Arc<BlockHelperFn>>,
    pub(crate) options: Options,
    usage: Usage,
    warnings: Vec<String>,
}

impl Template {
    pub(crate) fn new(
        plan: Plan,
        partials: IndexMap<String, Arc<Plan>>,
        registry: &Registry,
        options: Options,
        usage: Usage,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            plan,
            partials,
            helpers: registry.helpers.clone(),
            block_helpers: registry.block_helpers.clone(),
            options,
            usage,
            warnings,
        }
    }

    pub fn render(&self, data: &Value) -> Result<String, RenderError> {
        self.render_with_data(data, Map::new())
    }

    /// Renders with `seed` as the outermost special variables (`@name`)
    pub fn render_with_data(&self, data: &Value, seed: Map) -> Result<String, RenderError> {
        Runtime::new(self, data.clone(), seed).run()
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Partials dispatched by name at render time
    pub fn partials(&self) -> impl Iterator<Item = (&str, &Plan)> {
        self.partials
            .iter()
            .map(|(name, plan)| (name.as_str(), plan.as_ref()))
    }

    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    /// Non-fatal diagnostics found while compiling
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn options(&self) -> &Options {
        &self.options
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("plan", &self.plan)
            .field("partials", &self.partials.keys().collect::<Vec<_>>())
            .field("options", &self.options)
            .field("warnings", &self.warnings)
            .finish_non_exhaustive()
    }
}
