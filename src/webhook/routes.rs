//! Route table shared by all watchers on one listener.

use std::fmt;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::routing::{MethodFilter, MethodRouter};
use indexmap::IndexMap;

use super::handler::{WebhookHandler, WebhookRequest, WebhookResponse};
use super::listener::WebhookListener;
use crate::error::{WatchError, WatchResult};

/// Identity of a route: one handler per (method, path).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub method: Method,
    pub path: String,
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// A handler claimed by a watcher.
#[derive(Clone)]
pub struct RouteRegistration {
    pub key: RouteKey,
    pub owner: String,
    pub handler: Arc<dyn WebhookHandler>,
}

impl fmt::Debug for RouteRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteRegistration")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// All registrations of one listener, in registration order.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: IndexMap<RouteKey, RouteRegistration>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a (method, path) pair.
    ///
    /// Fails with [`WatchError::RouteConflict`] if anyone already owns the
    /// pair, including the same owner. Nothing is overwritten.
    pub fn insert(&mut self, registration: RouteRegistration) -> WatchResult<()> {
        validate(&registration.key)?;

        if let Some(existing) = self.routes.get(&registration.key) {
            return Err(WatchError::RouteConflict {
                method: registration.key.method.to_string(),
                path: registration.key.path.clone(),
                owner: existing.owner.clone(),
                claimant: registration.owner,
            });
        }

        self.routes
            .insert(registration.key.clone(), registration);
        Ok(())
    }

    /// Drop every route owned by `owner`. Returns how many were removed.
    pub fn remove_owner(&mut self, owner: &str) -> usize {
        let before = self.routes.len();
        self.routes.retain(|_, route| route.owner != owner);
        before - self.routes.len()
    }

    pub fn get(&self, key: &RouteKey) -> Option<&RouteRegistration> {
        self.routes.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteRegistration> {
        self.routes.values()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Build the axum router for the frozen table.
    ///
    /// Routes sharing a path are merged into one `MethodRouter`. Anything
    /// unregistered answers 404 with a JSON body.
    pub fn to_router(&self) -> Router {
        let mut by_path: IndexMap<String, MethodRouter> = IndexMap::new();

        for route in self.routes.values() {
            // Validated on insert
            let Ok(filter) = MethodFilter::try_from(route.key.method.clone()) else {
                continue;
            };

            let handler = route.handler.clone();
            let endpoint = move |method: Method, uri: Uri, headers: HeaderMap, body: Bytes| {
                let handler = handler.clone();
                async move {
                    let request = WebhookRequest {
                        method,
                        path: uri.path().to_string(),
                        query: uri.query().map(str::to_string),
                        headers,
                        body,
                    };
                    handler.handle(request).await
                }
            };

            let slot = by_path
                .entry(route.key.path.clone())
                .or_insert_with(MethodRouter::new);
            *slot = std::mem::replace(slot, MethodRouter::new()).on(filter, endpoint);
        }

        let mut router = Router::new();
        for (path, method_router) in by_path {
            router = router.route(&path, method_router);
        }

        router.fallback(|uri: Uri| async move {
            WebhookResponse::error(
                StatusCode::NOT_FOUND,
                format!("no webhook registered for {}", uri.path()),
            )
        })
    }
}

/// Paths are static: a leading slash followed by URL-safe characters.
fn validate(key: &RouteKey) -> WatchResult<()> {
    let invalid = |reason: &str| WatchError::InvalidRoute {
        method: key.method.to_string(),
        path: key.path.clone(),
        reason: reason.to_string(),
    };

    if !key.path.starts_with('/') {
        return Err(invalid("path must start with '/'"));
    }
    if key.path.contains("//") {
        return Err(invalid("path contains an empty segment"));
    }
    if !key
        .path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | '~'))
    {
        return Err(invalid("path may only contain letters, digits, '/', '-', '_', '.', '~'"));
    }
    if MethodFilter::try_from(key.method.clone()).is_err() {
        return Err(invalid("unsupported HTTP method"));
    }
    Ok(())
}

/// Registration handle given to one watcher.
///
/// Every route added through the scope is owned by that watcher.
pub struct RouteScope<'a> {
    listener: &'a WebhookListener,
    owner: &'a str,
    added: usize,
}

impl<'a> RouteScope<'a> {
    pub fn new(listener: &'a WebhookListener, owner: &'a str) -> Self {
        Self {
            listener,
            owner,
            added: 0,
        }
    }

    pub fn owner(&self) -> &str {
        self.owner
    }

    /// Routes added through this scope so far.
    pub fn added(&self) -> usize {
        self.added
    }

    pub fn route(
        &mut self,
        method: Method,
        path: &str,
        handler: Arc<dyn WebhookHandler>,
    ) -> WatchResult<()> {
        self.listener.register(path, method, handler, self.owner)?;
        self.added += 1;
        Ok(())
    }

    pub fn post(&mut self, path: &str, handler: Arc<dyn WebhookHandler>) -> WatchResult<()> {
        self.route(Method::POST, path, handler)
    }

    pub fn get(&mut self, path: &str, handler: Arc<dyn WebhookHandler>) -> WatchResult<()> {
        self.route(Method::GET, path, handler)
    }
}
