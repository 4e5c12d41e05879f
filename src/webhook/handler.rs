//! Request/response types and the handler trait for webhook routes.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Json;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

/// An inbound webhook call as seen by a watcher.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl WebhookRequest {
    /// Header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// What a handler answers with. Always rendered as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl WebhookResponse {
    pub fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }

    pub fn ok(body: Value) -> Self {
        Self::new(StatusCode::OK, body)
    }

    pub fn accepted(body: Value) -> Self {
        Self::new(StatusCode::ACCEPTED, body)
    }

    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(status, json!({ "error": message.into() }))
    }
}

impl IntoResponse for WebhookResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Handles requests for one registered (method, path) pair.
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    async fn handle(&self, request: WebhookRequest) -> WebhookResponse;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> WebhookHandler for FnHandler<F>
where
    F: Fn(WebhookRequest) -> Fut + Send + Sync,
    Fut: Future<Output = WebhookResponse> + Send + 'static,
{
    async fn handle(&self, request: WebhookRequest) -> WebhookResponse {
        (self.0)(request).await
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn WebhookHandler>
where
    F: Fn(WebhookRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WebhookResponse> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
