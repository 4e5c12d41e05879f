//! Watcher plugins shipped with the crate.
//!
//! Each module exports a `register` function; [`catalog`] lists them under
//! their declared names. Adding a plugin means adding a module and one line
//! here.

pub mod github_webhook;
pub mod repo_watcher;

use crate::watcher::WatcherCatalog;

pub use github_webhook::GithubWebhookWatcher;
pub use repo_watcher::RepoWatcher;

/// The built-in extension namespace.
pub fn catalog() -> WatcherCatalog {
    WatcherCatalog::new()
        .with_module(repo_watcher::NAME, repo_watcher::register)
        .with_module(github_webhook::NAME, github_webhook::register)
}
