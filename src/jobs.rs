//! Job submission boundary.
//!
//! Watchers and actions hand one-shot units of work to a [`JobSubmitter`]
//! and get an id back immediately. Scheduling, retries and execution belong
//! to whatever consumes the jobs.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{WatchError, WatchResult};

/// Identifier returned by [`JobSubmitter::submit`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What caused a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Manual,
    Schedule,
    Webhook,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    /// Synchronize GitHub repositories in scope, or a single one.
    GithubSync {
        repository: Option<String>,
        trigger: SyncTrigger,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    #[serde(flatten)]
    pub kind: JobKind,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn new(kind: JobKind) -> Self {
        Self {
            kind,
            submitted_at: Utc::now(),
        }
    }

    pub fn github_sync(repository: Option<String>, trigger: SyncTrigger) -> Self {
        Self::new(JobKind::GithubSync {
            repository,
            trigger,
        })
    }
}

#[async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit(&self, job: Job) -> WatchResult<JobId>;
}

/// In-process queue backed by a bounded channel.
pub struct LocalJobQueue {
    sender: mpsc::Sender<(JobId, Job)>,
    sequence: AtomicU64,
}

/// Receiving end of a [`LocalJobQueue`].
pub struct JobReceiver {
    receiver: mpsc::Receiver<(JobId, Job)>,
}

impl LocalJobQueue {
    pub fn new(capacity: usize) -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                sender,
                sequence: AtomicU64::new(0),
            },
            JobReceiver { receiver },
        )
    }

    fn next_id(&self) -> JobId {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        JobId(format!("job-{}-{seq}", Utc::now().format("%Y%m%d%H%M%S")))
    }
}

#[async_trait]
impl JobSubmitter for LocalJobQueue {
    async fn submit(&self, job: Job) -> WatchResult<JobId> {
        let id = self.next_id();
        self.sender
            .try_send((id.clone(), job))
            .map_err(|e| WatchError::JobSubmission {
                reason: match e {
                    mpsc::error::TrySendError::Full(_) => "job queue is full".to_string(),
                    mpsc::error::TrySendError::Closed(_) => "job queue is closed".to_string(),
                },
            })?;
        crate::debug_event!("jobs", "submitted", "{id}");
        Ok(id)
    }
}

impl JobReceiver {
    pub async fn recv(&mut self) -> Option<(JobId, Job)> {
        self.receiver.recv().await
    }

    /// Log every job until all submitters are dropped.
    pub async fn drain_to_log(mut self) {
        while let Some((id, job)) = self.recv().await {
            match serde_json::to_string(&job) {
                Ok(payload) => crate::log_event!("jobs", "received", "{id} {payload}"),
                Err(_) => crate::log_event!("jobs", "received", "{id} {job:?}"),
            }
        }
        crate::debug_event!("jobs", "queue closed");
    }
}
