//! Watcher orchestration for security monitoring.
//!
//! Discovers pluggable watchers, drives their lifecycle, multiplexes their
//! webhook routes onto one HTTP listener, and shuts everything down with
//! per-watcher failure isolation.

pub mod actions;
pub mod cli;
pub mod config;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod watcher;
pub mod watchers;
pub mod webhook;

pub use config::{Settings, WatcherPlan, WatcherSettings};
pub use error::{WatchError, WatchResult};
pub use jobs::{Job, JobId, JobKind, JobSubmitter, LocalJobQueue};
pub use notify::{LogNotifier, Notifier};
pub use orchestrator::{
    ListenerOutcome, Orchestrator, OrchestratorPhase, ShutdownReport, StartupReport,
    WatcherOutcome,
};
pub use watcher::{
    BackgroundTask, RouteProvider, Watcher, WatcherCatalog, WatcherDeps, WatcherDescriptor,
    WatcherRegistry, WatcherState,
};
pub use webhook::{
    ListenerConfig, ListenerSlot, RouteScope, WebhookHandler, WebhookListener, WebhookRequest,
    WebhookResponse,
};
