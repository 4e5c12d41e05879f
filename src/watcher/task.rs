//! Background task handle shared by watcher implementations.
//!
//! Wraps a spawned future with a cancellation token so that `stop` can ask
//! for a graceful exit, wait a bounded time, and abort if the task ignores
//! the request.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{WatchError, WatchResult};

struct RunningTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// At most one background task per watcher.
pub struct BackgroundTask {
    owner: String,
    running: Mutex<Option<RunningTask>>,
}

impl BackgroundTask {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            running: Mutex::new(None),
        }
    }

    /// Spawn the task body.
    ///
    /// `body` receives a token that is cancelled on `stop`. The body is also
    /// dropped at its next await point once cancelled, so a body that never
    /// checks the token still stops.
    pub fn spawn<F, Fut>(&self, body: F) -> WatchResult<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| WatchError::Start {
            watcher: self.owner.clone(),
            reason: format!("no async runtime: {e}"),
        })?;

        let mut running = self.running.lock();
        if let Some(task) = running.as_ref() {
            if !task.handle.is_finished() {
                return Err(WatchError::Start {
                    watcher: self.owner.clone(),
                    reason: "background task already running".to_string(),
                });
            }
        }

        let token = CancellationToken::new();
        let fut = body(token.clone());
        let cancelled = token.clone();
        let owner = self.owner.clone();

        let handle = runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => {
                    crate::debug_event!(owner, "task cancelled");
                }
                _ = fut => {
                    crate::debug_event!(owner, "task finished");
                }
            }
        });

        *running = Some(RunningTask { token, handle });
        Ok(())
    }

    /// Whether a spawned task is still alive.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Cancel the task and wait up to `grace` for it to finish.
    ///
    /// A task that outlives the grace period is aborted and reported as
    /// [`WatchError::StopTimeout`]. Calling `stop` without a task is a no-op.
    pub async fn stop(&self, grace: Duration) -> WatchResult<()> {
        let Some(RunningTask { token, mut handle }) = self.running.lock().take() else {
            return Ok(());
        };

        token.cancel();

        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_cancelled() => Ok(()),
            Ok(Err(e)) => Err(WatchError::Stop {
                watcher: self.owner.clone(),
                reason: format!("background task panicked: {e}"),
            }),
            Err(_) => {
                handle.abort();
                tracing::warn!(
                    "[{}] background task ignored cancellation, aborted after {}ms",
                    self.owner,
                    grace.as_millis()
                );
                Err(WatchError::StopTimeout {
                    watcher: self.owner.clone(),
                    grace,
                })
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        if let Some(task) = self.running.get_mut().take() {
            task.token.cancel();
            task.handle.abort();
        }
    }
}
