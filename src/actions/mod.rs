//! One-shot actions triggered by a user rather than a watcher.

pub mod github_sync;

use async_trait::async_trait;

use crate::error::WatchResult;

pub use github_sync::GithubSyncAction;

/// Static description of an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub help_text: &'static str,
    /// Short guidance for automated callers.
    pub agent_hint: &'static str,
}

#[async_trait]
pub trait Action: Send + Sync {
    fn spec(&self) -> &ActionSpec;

    /// Run the action and return the text shown to the user.
    ///
    /// Expected problems, like a missing credential, are reported in the
    /// returned text. `Err` is reserved for failures of the machinery.
    async fn execute(&self, args: &[String]) -> WatchResult<String>;
}
