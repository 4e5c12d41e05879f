//! `r4dar sync`: queue a GitHub sync from the command line.

use std::sync::Arc;

use anyhow::Result;

use crate::actions::{Action, GithubSyncAction};
use crate::config::Settings;
use crate::jobs::LocalJobQueue;

pub async fn run(settings: &Settings, repository: Option<String>) -> Result<()> {
    let (queue, receiver) = LocalJobQueue::new(1);
    let action = GithubSyncAction::new(&settings.github, Arc::new(queue));

    let args: Vec<String> = repository.into_iter().collect();
    let message = action.execute(&args).await?;
    println!("{message}");

    drop(action);
    receiver.drain_to_log().await;
    Ok(())
}
