//! The capability interface every watcher plugin implements.

use std::fmt;

use async_trait::async_trait;

use crate::error::WatchResult;
use crate::webhook::RouteScope;

/// Lifecycle of a single watcher instance.
///
/// `Created -> Initialized -> Running -> Stopped`. Any lifecycle failure
/// moves the instance to `Failed`, which is terminal for that instance only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatcherState {
    Created,
    Initialized,
    Running,
    Stopped,
    Failed,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WatcherState::Created => "created",
            WatcherState::Initialized => "initialized",
            WatcherState::Running => "running",
            WatcherState::Stopped => "stopped",
            WatcherState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A pluggable long-running monitor of an external source.
///
/// The orchestrator drives every watcher through `initialize`, optional route
/// registration, `start`, and eventually `stop`. It never looks at the
/// concrete type; the only branch it takes is on [`Watcher::routes`].
#[async_trait]
pub trait Watcher: Send + Sync {
    /// Registration name, unique among discovered watchers.
    fn name(&self) -> &str;

    /// One-time setup such as opening external connections.
    ///
    /// On error the orchestrator never calls `start`.
    async fn initialize(&self) -> WatchResult<()>;

    /// Launch background monitoring and return once it is scheduled.
    async fn start(&self) -> WatchResult<()>;

    /// Request termination and wait, bounded, for the background work.
    ///
    /// Must be idempotent: stopping a stopped watcher is `Ok(())`.
    async fn stop(&self) -> WatchResult<()>;

    /// Optional webhook capability.
    fn routes(&self) -> Option<&dyn RouteProvider> {
        None
    }
}

/// Extension capability for watchers that receive webhooks.
///
/// Called once, after `initialize` and before the listener accepts
/// connections. Every route added through the scope is owned by the watcher.
pub trait RouteProvider: Send + Sync {
    fn register_routes(&self, scope: &mut RouteScope<'_>) -> WatchResult<()>;
}
