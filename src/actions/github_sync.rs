//! Manually triggered GitHub repository sync.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Action, ActionSpec};
use crate::config::GithubConfig;
use crate::error::WatchResult;
use crate::jobs::{Job, JobSubmitter, SyncTrigger};

const SPEC: ActionSpec = ActionSpec {
    name: "github_monitor",
    description: "Synchronize GitHub repositories",
    help_text: "Synchronize GitHub repositories.

Usage:
/github_monitor [owner/repo]

Checks the repositories in scope (or only the one given), fetches new
commits and pull requests, and queues their analysis. The job performs a
single synchronization run and then completes.",
    agent_hint: "Use this command to synchronize GitHub repositories and analyze any new changes.",
};

pub struct GithubSyncAction {
    api_token: Option<String>,
    jobs: Arc<dyn JobSubmitter>,
}

impl GithubSyncAction {
    pub fn new(github: &GithubConfig, jobs: Arc<dyn JobSubmitter>) -> Self {
        Self {
            api_token: github.api_token.clone(),
            jobs,
        }
    }
}

#[async_trait]
impl Action for GithubSyncAction {
    fn spec(&self) -> &ActionSpec {
        &SPEC
    }

    async fn execute(&self, args: &[String]) -> WatchResult<String> {
        if self.api_token.as_deref().is_none_or(str::is_empty) {
            return Ok(
                "Error: GitHub API token not configured. Please set R4DAR_GITHUB__API_TOKEN or github.api_token in config."
                    .to_string(),
            );
        }

        let repository = args.first().cloned();
        let id = self
            .jobs
            .submit(Job::github_sync(repository, SyncTrigger::Manual))
            .await?;

        crate::log_event!(SPEC.name, "submitted", "{id}");
        Ok(format!(
            "Started GitHub repository synchronization (Job ID: {id})"
        ))
    }
}
