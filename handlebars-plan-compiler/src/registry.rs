//! Helper and partial tables supplied by the caller

use std::{collections::HashMap, sync::Arc};

use indexmap::IndexMap;

use crate::{
    helper::{BlockHelperFn, HelperFn, HelperOptions, HelperResult, add_builtins},
    value::{Map, Value},
};

/// Name to helper and name to partial source tables
#[derive(Clone, Default)]
pub struct Registry {
    pub(crate) helpers: HashMap<String, Arc<HelperFn>>,
    pub(crate) block_helpers: HashMap<String, Arc<BlockHelperFn>>,
    pub(crate) partials: IndexMap<String, String>,
}

impl Registry {
    /// A registry with the builtin `lookup` and `log` helpers
    pub fn new() -> Self {
        let mut registry = Self::empty();
        add_builtins(&mut registry);
        registry
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn register_helper<F>(&mut self, name: impl Into<String>, helper: F) -> &mut Self
    where
        F: Fn(&[Value], &mut HelperOptions<'_>) -> HelperResult + Send + Sync + 'static,
    {
        self.helpers.insert(name.into(), Arc::new(helper));
        self
    }

    pub fn register_block_helper<F>(&mut self, name: impl Into<String>, helper: F) -> &mut Self
    where
        F: Fn(&Value, &[Value], &Map) -> HelperResult + Send + Sync + 'static,
    {
        self.block_helpers.insert(name.into(), Arc::new(helper));
        self
    }

    pub fn register_partial(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> &mut Self {
        self.partials.insert(name.into(), source.into());
        self
    }

    /// Whether `name` is a helper of either kind
    pub fn has_helper(&self, name: &str) -> bool {
        self.helpers.contains_key(name) || self.block_helpers.contains_key(name)
    }

    pub fn partial(&self, name: &str) -> Option<&str> {
        self.partials.get(name).map(String::as_str)
    }

    pub fn partial_names(&self) -> impl Iterator<Item = &str> {
        self.partials.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins() {
        assert!(Registry::new().has_helper("lookup"));
        assert!(Registry::new().has_helper("log"));
        assert!(!Registry::empty().has_helper("lookup"));
    }

    #[test]
    fn registration_chains() {
        let mut registry = Registry::empty();
        registry
            .register_helper("upper", |args, _| Ok(Value::from(args[0].render().to_uppercase())))
            .register_block_helper("items", |ctx, _, _| Ok(ctx.clone()))
            .register_partial("header", "<h1>{{title}}</h1>");
        assert!(registry.has_helper("upper"));
        assert!(registry.has_helper("items"));
        assert_eq!(registry.partial("header"), Some("<h1>{{title}}</h1>"));
        assert_eq!(registry.partial_names().collect::<Vec<_>>(), ["header"]);
    }
}
