//! Periodic GitHub repository sync.
//!
//! Submits a scheduled `GithubSync` job every poll interval. Fetching and
//! diffing happen in the job, not here.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{WatchError, WatchResult};
use crate::jobs::{Job, JobSubmitter, SyncTrigger};
use crate::watcher::{BackgroundTask, Watcher, WatcherDeps, WatcherDescriptor, WatcherRegistry};

pub const NAME: &str = "repo_watcher";

/// Longest accepted poll interval (one year).
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub fn register(registry: &mut WatcherRegistry) -> WatchResult<()> {
    registry.register(WatcherDescriptor::new(
        NAME,
        "Submit a GitHub sync job on a fixed interval",
        |deps| Ok(Arc::new(RepoWatcher::new(deps)) as Arc<dyn Watcher>),
    ));
    Ok(())
}

pub struct RepoWatcher {
    jobs: Arc<dyn JobSubmitter>,
    api_token: Option<String>,
    interval: Duration,
    stop_grace: Duration,
    task: BackgroundTask,
}

impl RepoWatcher {
    pub fn new(deps: &WatcherDeps) -> Self {
        let settings = &deps.settings;
        Self {
            jobs: deps.jobs.clone(),
            api_token: settings.github.api_token.clone(),
            interval: Duration::from_secs(settings.github.poll_interval_secs),
            stop_grace: Duration::from_millis(settings.watchers.stop_grace_ms),
            task: BackgroundTask::new(NAME),
        }
    }

    pub fn is_polling(&self) -> bool {
        self.task.is_running()
    }
}

#[async_trait]
impl Watcher for RepoWatcher {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&self) -> WatchResult<()> {
        if self.api_token.as_deref().is_none_or(str::is_empty) {
            return Err(WatchError::MissingCredential {
                name: "github.api_token".to_string(),
            });
        }
        if self.interval.is_zero() {
            return Err(WatchError::Initialization {
                watcher: NAME.to_string(),
                reason: "github.poll_interval_secs must be positive".to_string(),
            });
        }
        if self.interval > MAX_POLL_INTERVAL {
            return Err(WatchError::Initialization {
                watcher: NAME.to_string(),
                reason: format!(
                    "github.poll_interval_secs must not exceed {}",
                    MAX_POLL_INTERVAL.as_secs()
                ),
            });
        }
        Ok(())
    }

    async fn start(&self) -> WatchResult<()> {
        let jobs = self.jobs.clone();
        let period = self.interval;
        let first_tick = Instant::now()
            .checked_add(period)
            .filter(|_| period <= MAX_POLL_INTERVAL)
            .ok_or_else(|| WatchError::Start {
                watcher: NAME.to_string(),
                reason: format!("poll interval of {}s is out of range", period.as_secs()),
            })?;

        self.task.spawn(move |token| async move {
            let mut ticker = tokio::time::interval_at(first_tick, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while !token.is_cancelled() {
                ticker.tick().await;
                match jobs.submit(Job::github_sync(None, SyncTrigger::Schedule)).await {
                    Ok(id) => crate::log_event!(NAME, "sync scheduled", "{id}"),
                    Err(e) => tracing::warn!("[{NAME}] {e}"),
                }
            }
        })?;

        crate::log_event!(NAME, "polling", "every {}s", period.as_secs());
        Ok(())
    }

    async fn stop(&self) -> WatchResult<()> {
        self.task.stop(self.stop_grace).await
    }
}
