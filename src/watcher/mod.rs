//! Watcher contract, lifecycle helpers, and plugin discovery.
//!
//! # Architecture
//!
//! ```text
//! WatcherCatalog (plugin modules)
//!   - discover() -> WatcherRegistry
//!         |
//!    name -> WatcherDescriptor -> construct(&WatcherDeps)
//!         |
//!    Arc<dyn Watcher>
//!      initialize -> [routes()] -> start -> ... -> stop
//! ```

mod contract;
mod deps;
mod registry;
mod task;

pub use contract::{RouteProvider, Watcher, WatcherState};
pub use deps::WatcherDeps;
pub use registry::{
    PluginModule, RegisterFn, SUPPORT_MODULES, WatcherCatalog, WatcherConstructor,
    WatcherDescriptor, WatcherRegistry,
};
pub use task::BackgroundTask;
