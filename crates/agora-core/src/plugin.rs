//! Plugin registry: late binding of model implementations by name.
//!
//! Implementations are plain constructor functions registered under a string
//! key at startup. [`PluginRegistry::with_builtins`] installs the engine's
//! own models (`Source`, `Sink`, `Builder`, `Market`); hosts add their own
//! with [`PluginRegistry::register`].

use crate::builder::{BUILDER_IMPL, Builder};
use crate::context::Context;
use crate::facility::{SINK_IMPL, SOURCE_IMPL, Sink, Source};
use crate::market::{CommodityMarket, MARKET_IMPL};
use crate::model::{Model, ModelError};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// A constructor for one model implementation.
pub type Constructor = dyn Fn(&Context) -> Result<Box<dyn Model>, ModelError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PluginError {
    #[error("no plugin registered under '{0}'")]
    NotFound(String),
    #[error("plugin '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("plugin '{plugin}' failed to construct: {source}")]
    Construction {
        plugin: String,
        #[source]
        source: ModelError,
    },
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// A loaded plugin. Cheap to clone; every `construct` call yields a new,
/// unconfigured model whose implementation id is the plugin name.
#[derive(Clone)]
pub struct Factory {
    name: String,
    constructor: Rc<Constructor>,
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factory")
            .field("name", &self.name)
            .field("constructor", &"<fn>")
            .finish()
    }
}

impl Factory {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn construct(&self, ctx: &Context) -> Result<Box<dyn Model>, PluginError> {
        let mut model = (self.constructor)(ctx).map_err(|source| PluginError::Construction {
            plugin: self.name.clone(),
            source,
        })?;
        model.set_impl_id(&self.name);
        Ok(model)
    }
}

// ---------------------------------------------------------------------------
// PluginRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct PluginRegistry {
    factories: HashMap<String, Factory>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the engine's built-in models.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: [(&str, fn() -> Box<dyn Model>); 4] = [
            (SOURCE_IMPL, || Box::new(Source::unconfigured())),
            (SINK_IMPL, || Box::new(Sink::unconfigured())),
            (BUILDER_IMPL, || Box::new(Builder::new(""))),
            (MARKET_IMPL, || Box::new(CommodityMarket::unconfigured())),
        ];
        for (name, make) in builtins {
            registry
                .factories
                .insert(name.to_string(), Self::factory(name, move |_| Ok(make())));
        }
        registry
    }

    fn factory<F>(name: &str, constructor: F) -> Factory
    where
        F: Fn(&Context) -> Result<Box<dyn Model>, ModelError> + 'static,
    {
        Factory {
            name: name.to_string(),
            constructor: Rc::new(constructor),
        }
    }

    /// Register an implementation under `name`.
    pub fn register<F>(&mut self, name: &str, constructor: F) -> Result<(), PluginError>
    where
        F: Fn(&Context) -> Result<Box<dyn Model>, ModelError> + 'static,
    {
        if self.factories.contains_key(name) {
            return Err(PluginError::AlreadyRegistered(name.to_string()));
        }
        self.factories
            .insert(name.to_string(), Self::factory(name, constructor));
        Ok(())
    }

    /// Resolve a plugin by name.
    pub fn load(&self, name: &str) -> Result<Factory, PluginError> {
        let factory = self
            .factories
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        debug!(plugin = name, "plugin loaded");
        Ok(factory)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered plugin names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
