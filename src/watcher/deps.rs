//! Collaborators handed to watcher constructors.

use std::sync::Arc;

use crate::config::Settings;
use crate::jobs::JobSubmitter;
use crate::notify::Notifier;

/// Process-wide context passed explicitly to every watcher constructor.
#[derive(Clone)]
pub struct WatcherDeps {
    /// Configuration snapshot taken when the orchestrator was built.
    pub settings: Arc<Settings>,
    pub jobs: Arc<dyn JobSubmitter>,
    pub notifier: Arc<dyn Notifier>,
}

impl WatcherDeps {
    pub fn new(
        settings: Arc<Settings>,
        jobs: Arc<dyn JobSubmitter>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            jobs,
            notifier,
        }
    }
}
