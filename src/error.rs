//! Error types for the watcher orchestration subsystem.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type WatchResult<T> = Result<T, WatchError>;

/// Errors from configuration, discovery, watcher lifecycle and webhook ingress.
///
/// Only the variants reported by [`WatchError::is_fatal`] abort the call that
/// produced them. Everything else is recovered locally by the orchestrator:
/// the affected plugin or watcher is skipped and its siblings carry on.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Plugin module '{module}' failed to load: {reason}")]
    Discovery { module: String, reason: String },

    #[error("Watcher '{watcher}' failed to initialize: {reason}")]
    Initialization { watcher: String, reason: String },

    #[error("Watcher '{watcher}' failed to start: {reason}")]
    Start { watcher: String, reason: String },

    #[error("Watcher '{watcher}' failed to stop: {reason}")]
    Stop { watcher: String, reason: String },

    #[error("Watcher '{watcher}' did not stop within {}ms", grace.as_millis())]
    StopTimeout { watcher: String, grace: Duration },

    #[error("Route {method} {path} requested by '{claimant}' is already owned by '{owner}'")]
    RouteConflict {
        method: String,
        path: String,
        owner: String,
        claimant: String,
    },

    #[error("Invalid route {method} {path}: {reason}")]
    InvalidRoute {
        method: String,
        path: String,
        reason: String,
    },

    #[error("Webhook listener already started")]
    AlreadyStarted,

    #[error("Webhook listener was stopped and cannot accept routes")]
    ListenerStopped,

    #[error("Webhook listener failed to bind {addr}: {source}")]
    ListenerStart {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Orchestrator is {phase}, expected idle")]
    OrchestratorBusy { phase: String },

    #[error("An orchestrator has already been claimed for this process")]
    ProcessAlreadyClaimed,

    #[error("Job submission failed: {reason}")]
    JobSubmission { reason: String },

    #[error("Missing credential: {name}")]
    MissingCredential { name: String },

    #[error("Notification delivery failed: {reason}")]
    Notification { reason: String },
}

impl WatchError {
    /// Configuration and programming-contract errors propagate as hard
    /// failures. Per-plugin and per-watcher failures do not.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WatchError::Configuration { .. }
                | WatchError::RouteConflict { .. }
                | WatchError::AlreadyStarted
                | WatchError::OrchestratorBusy { .. }
                | WatchError::ProcessAlreadyClaimed
        )
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        WatchError::Configuration {
            reason: reason.into(),
        }
    }
}

impl From<Box<figment::Error>> for WatchError {
    fn from(e: Box<figment::Error>) -> Self {
        WatchError::Configuration {
            reason: e.to_string(),
        }
    }
}
