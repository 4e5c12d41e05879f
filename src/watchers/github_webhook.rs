//! GitHub webhook receiver.
//!
//! Claims `POST <github.webhook_path>` on the shared listener and turns push
//! and pull request deliveries into sync jobs for the affected repository.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::{Value, json};

use crate::error::WatchResult;
use crate::jobs::{Job, JobSubmitter, SyncTrigger};
use crate::notify::Notifier;
use crate::watcher::{RouteProvider, Watcher, WatcherDeps, WatcherDescriptor, WatcherRegistry};
use crate::webhook::{RouteScope, WebhookHandler, WebhookRequest, WebhookResponse};

pub const NAME: &str = "github_webhook";

const EVENT_HEADER: &str = "x-github-event";

pub fn register(registry: &mut WatcherRegistry) -> WatchResult<()> {
    registry.register(WatcherDescriptor::new(
        NAME,
        "Receive GitHub push and pull request webhooks",
        |deps| Ok(Arc::new(GithubWebhookWatcher::new(deps)) as Arc<dyn Watcher>),
    ));
    Ok(())
}

pub struct GithubWebhookWatcher {
    path: String,
    handler: Arc<GithubEventHandler>,
    accepting: Arc<AtomicBool>,
}

impl GithubWebhookWatcher {
    pub fn new(deps: &WatcherDeps) -> Self {
        let accepting = Arc::new(AtomicBool::new(false));
        Self {
            path: deps.settings.github.webhook_path.clone(),
            handler: Arc::new(GithubEventHandler {
                jobs: deps.jobs.clone(),
                notifier: deps.notifier.clone(),
                accepting: accepting.clone(),
            }),
            accepting,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl Watcher for GithubWebhookWatcher {
    fn name(&self) -> &str {
        NAME
    }

    async fn initialize(&self) -> WatchResult<()> {
        Ok(())
    }

    async fn start(&self) -> WatchResult<()> {
        self.accepting.store(true, Ordering::SeqCst);
        crate::log_event!(NAME, "accepting", "{}", self.path);
        Ok(())
    }

    async fn stop(&self) -> WatchResult<()> {
        self.accepting.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn routes(&self) -> Option<&dyn RouteProvider> {
        Some(self)
    }
}

impl RouteProvider for GithubWebhookWatcher {
    fn register_routes(&self, scope: &mut RouteScope<'_>) -> WatchResult<()> {
        scope.post(&self.path, self.handler.clone())
    }
}

struct GithubEventHandler {
    jobs: Arc<dyn JobSubmitter>,
    notifier: Arc<dyn Notifier>,
    accepting: Arc<AtomicBool>,
}

#[async_trait]
impl WebhookHandler for GithubEventHandler {
    async fn handle(&self, request: WebhookRequest) -> WebhookResponse {
        if !self.accepting.load(Ordering::SeqCst) {
            return WebhookResponse::error(StatusCode::SERVICE_UNAVAILABLE, "watcher is stopped");
        }

        let event = request.header(EVENT_HEADER).unwrap_or("unknown").to_string();
        let payload: Value = match request.json() {
            Ok(payload) => payload,
            Err(e) => {
                crate::debug_event!(NAME, "rejected", "{event}: {e}");
                return WebhookResponse::error(
                    StatusCode::BAD_REQUEST,
                    format!("invalid JSON payload: {e}"),
                );
            }
        };

        match event.as_str() {
            "ping" => WebhookResponse::ok(json!({ "status": "pong" })),
            "push" | "pull_request" => self.sync(&event, &payload).await,
            _ => {
                crate::debug_event!(NAME, "ignored", "{event}");
                WebhookResponse::accepted(json!({ "status": "ignored", "event": event }))
            }
        }
    }
}

impl GithubEventHandler {
    async fn sync(&self, event: &str, payload: &Value) -> WebhookResponse {
        let repository = payload
            .pointer("/repository/full_name")
            .and_then(Value::as_str)
            .map(str::to_string);

        let id = match self
            .jobs
            .submit(Job::github_sync(repository.clone(), SyncTrigger::Webhook))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("[{NAME}] {e}");
                return WebhookResponse::error(StatusCode::SERVICE_UNAVAILABLE, e.to_string());
            }
        };

        let target = repository.as_deref().unwrap_or("all repositories");
        crate::log_event!(NAME, "sync queued", "{event} on {target}: {id}");
        if let Err(e) = self
            .notifier
            .send_text(&format!("GitHub {event} on {target}, sync job {id}"))
            .await
        {
            tracing::warn!("[{NAME}] {e}");
        }

        WebhookResponse::accepted(json!({ "status": "accepted", "job_id": id }))
    }
}
