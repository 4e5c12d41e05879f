//! Watcher registry and plugin discovery.
//!
//! Plugins live in an extension namespace: a [`WatcherCatalog`] of plugin
//! modules, each with a registration function that adds one or more
//! [`WatcherDescriptor`]s to a [`WatcherRegistry`]. Discovery runs every
//! registration function and keeps going when one of them fails.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use indexmap::IndexMap;

use super::{Watcher, WatcherDeps};
use crate::error::{WatchError, WatchResult};

/// Module names reserved for the orchestrator's own support code.
pub const SUPPORT_MODULES: &[&str] = &["orchestrator", "webhook", "registry"];

/// Factory producing a fresh watcher instance.
pub type WatcherConstructor =
    Arc<dyn Fn(&WatcherDeps) -> WatchResult<Arc<dyn Watcher>> + Send + Sync>;

/// Registration function exported by a plugin module.
pub type RegisterFn = fn(&mut WatcherRegistry) -> WatchResult<()>;

type Registration = Arc<dyn Fn(&mut WatcherRegistry) -> WatchResult<()> + Send + Sync>;

/// A discovered watcher: its declared name and how to build it.
#[derive(Clone)]
pub struct WatcherDescriptor {
    name: String,
    description: String,
    module: String,
    constructor: WatcherConstructor,
}

impl WatcherDescriptor {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&WatcherDeps) -> WatchResult<Arc<dyn Watcher>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            module: String::new(),
            constructor: Arc::new(constructor),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Plugin module that registered this descriptor.
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn construct(&self, deps: &WatcherDeps) -> WatchResult<Arc<dyn Watcher>> {
        (self.constructor)(deps)
    }
}

impl fmt::Debug for WatcherDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherDescriptor")
            .field("name", &self.name)
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

/// Name -> descriptor mapping produced by one discovery pass.
#[derive(Debug, Default)]
pub struct WatcherRegistry {
    current_module: String,
    descriptors: IndexMap<String, WatcherDescriptor>,
    failures: Vec<WatchError>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor under its declared name.
    ///
    /// Invalid and duplicate names are recorded as discovery failures; the
    /// first registration of a name wins.
    pub fn register(&mut self, mut descriptor: WatcherDescriptor) {
        descriptor.module = self.current_module.clone();

        if let Err(reason) = validate_name(&descriptor.name) {
            self.reject(&descriptor, reason);
            return;
        }

        if let Some(existing) = self.descriptors.get(&descriptor.name) {
            let reason = format!(
                "watcher name '{}' already registered by module '{}'",
                descriptor.name, existing.module
            );
            self.reject(&descriptor, reason);
            return;
        }

        crate::debug_event!(
            "discovery",
            "registered",
            "{} ({})",
            descriptor.name,
            descriptor.module
        );
        self.descriptors
            .insert(descriptor.name.clone(), descriptor);
    }

    fn reject(&mut self, descriptor: &WatcherDescriptor, reason: String) {
        tracing::warn!("[discovery] skipped '{}': {reason}", descriptor.name);
        self.failures.push(WatchError::Discovery {
            module: descriptor.module.clone(),
            reason,
        });
    }

    pub fn get(&self, name: &str) -> Option<&WatcherDescriptor> {
        self.descriptors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    /// Registered names in discovery order.
    pub fn names(&self) -> Vec<&str> {
        self.descriptors.keys().map(String::as_str).collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &WatcherDescriptor> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Plugins or descriptors skipped during discovery.
    pub fn failures(&self) -> &[WatchError] {
        &self.failures
    }

    pub fn take_failures(&mut self) -> Vec<WatchError> {
        std::mem::take(&mut self.failures)
    }
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("watcher name is empty".to_string());
    }
    if name
        .chars()
        .any(|c| c.is_whitespace() || c == ',' || c.is_control())
    {
        return Err(format!(
            "watcher name '{name}' contains whitespace or a comma"
        ));
    }
    Ok(())
}

/// One plugin module in the extension namespace.
#[derive(Clone)]
pub struct PluginModule {
    pub module: &'static str,
    register: Registration,
}

/// The extension namespace scanned at each start cycle.
#[derive(Clone, Default)]
pub struct WatcherCatalog {
    modules: Vec<PluginModule>,
}

impl WatcherCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// The watchers shipped with this crate.
    pub fn builtin() -> Self {
        crate::watchers::catalog()
    }

    /// Add a plugin module.
    pub fn with_module(self, module: &'static str, register: RegisterFn) -> Self {
        self.with_plugin(module, register)
    }

    /// Add a plugin module whose registration captures state.
    pub fn with_plugin<F>(mut self, module: &'static str, register: F) -> Self
    where
        F: Fn(&mut WatcherRegistry) -> WatchResult<()> + Send + Sync + 'static,
    {
        self.modules.push(PluginModule {
            module,
            register: Arc::new(register),
        });
        self
    }

    pub fn modules(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.modules.iter().map(|m| m.module)
    }

    /// Run every module's registration function into a fresh registry.
    ///
    /// A module that errors or panics is logged and skipped, and anything it
    /// registered before failing is discarded. Support modules are never
    /// treated as plugins.
    pub fn discover(&self) -> WatcherRegistry {
        let mut registry = WatcherRegistry::new();

        for plugin in &self.modules {
            if SUPPORT_MODULES.contains(&plugin.module) {
                crate::debug_event!("discovery", "skipping support module", "{}", plugin.module);
                continue;
            }

            registry.current_module = plugin.module.to_string();
            let outcome = catch_unwind(AssertUnwindSafe(|| (plugin.register)(&mut registry)));

            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "registration panicked".to_string(),
            };

            tracing::warn!("[discovery] plugin module '{}' failed: {reason}", plugin.module);
            registry
                .descriptors
                .retain(|_, descriptor| descriptor.module != plugin.module);
            registry.failures.push(WatchError::Discovery {
                module: plugin.module.to_string(),
                reason,
            });
        }

        registry.current_module.clear();
        crate::log_event!(
            "discovery",
            "found",
            "{} watchers: {:?}",
            registry.len(),
            registry.names()
        );
        registry
    }
}
