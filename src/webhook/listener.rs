//! The shared HTTP server watchers register webhook routes on.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::handler::WebhookHandler;
use super::routes::{RouteKey, RouteRegistration, RouteTable};
use crate::error::{WatchError, WatchResult};

/// Bind address and drain policy for a listener.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerConfig {
    pub host: IpAddr,
    /// Time in-flight requests get after `stop` before the server is aborted.
    pub drain_grace: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            drain_grace: Duration::from_secs(3),
        }
    }
}

struct Serving {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

enum Phase {
    /// Accepting registrations.
    Registering,
    /// `start` is binding; the route table is frozen.
    Starting,
    Serving(Serving),
    Stopped,
}

struct Inner {
    routes: RouteTable,
    phase: Phase,
}

/// Single HTTP server multiplexing webhook requests to watcher handlers.
///
/// Routes may only be registered before `start`. `start` succeeds at most
/// once per listener; `stop` is idempotent.
pub struct WebhookListener {
    config: ListenerConfig,
    inner: Mutex<Inner>,
}

impl WebhookListener {
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                routes: RouteTable::new(),
                phase: Phase::Registering,
            }),
        }
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Claim `method path` for `owner`.
    ///
    /// Fails with [`WatchError::RouteConflict`] when the pair is taken and
    /// with [`WatchError::AlreadyStarted`] once the table is frozen.
    pub fn register(
        &self,
        path: &str,
        method: Method,
        handler: Arc<dyn WebhookHandler>,
        owner: &str,
    ) -> WatchResult<()> {
        let mut inner = self.inner.lock();
        match inner.phase {
            Phase::Registering => {}
            Phase::Stopped => return Err(WatchError::ListenerStopped),
            Phase::Starting | Phase::Serving(_) => return Err(WatchError::AlreadyStarted),
        }

        let registration = RouteRegistration {
            key: RouteKey {
                method,
                path: path.to_string(),
            },
            owner: owner.to_string(),
            handler,
        };
        let key = registration.key.clone();
        inner.routes.insert(registration)?;

        crate::debug_event!("listener", "registered", "{key} -> {owner}");
        Ok(())
    }

    /// Remove every route a watcher registered, e.g. after its startup failed.
    pub fn unregister_owner(&self, owner: &str) -> usize {
        let mut inner = self.inner.lock();
        if !matches!(inner.phase, Phase::Registering) {
            return 0;
        }
        let removed = inner.routes.remove_owner(owner);
        if removed > 0 {
            crate::debug_event!("listener", "unregistered", "{removed} routes of {owner}");
        }
        removed
    }

    /// Snapshot of registered routes as (key, owner).
    pub fn routes(&self) -> Vec<(RouteKey, String)> {
        self.inner
            .lock()
            .routes
            .iter()
            .map(|route| (route.key.clone(), route.owner.clone()))
            .collect()
    }

    pub fn route_count(&self) -> usize {
        self.inner.lock().routes.len()
    }

    /// Bind `host:port` and start serving the frozen route table.
    ///
    /// Returns the bound address, which differs from `port` when `port` is 0.
    pub async fn start(&self, port: u16) -> WatchResult<SocketAddr> {
        let router = {
            let mut inner = self.inner.lock();
            match inner.phase {
                Phase::Registering => {}
                Phase::Stopped => return Err(WatchError::ListenerStopped),
                Phase::Starting | Phase::Serving(_) => return Err(WatchError::AlreadyStarted),
            }
            inner.phase = Phase::Starting;
            inner.routes.to_router()
        };

        let requested = SocketAddr::new(self.config.host, port);
        let tcp = match tokio::net::TcpListener::bind(requested).await {
            Ok(tcp) => tcp,
            Err(source) => {
                self.inner.lock().phase = Phase::Stopped;
                return Err(WatchError::ListenerStart {
                    addr: requested,
                    source,
                });
            }
        };
        let addr = tcp.local_addr().unwrap_or(requested);

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();

        let mut inner = self.inner.lock();
        if !matches!(inner.phase, Phase::Starting) {
            // stop() ran while we were binding
            return Err(WatchError::ListenerStopped);
        }

        let task = tokio::spawn(async move {
            axum::serve(tcp, router)
                .with_graceful_shutdown(signal.cancelled_owned())
                .await
        });

        inner.phase = Phase::Serving(Serving {
            addr,
            shutdown,
            task,
        });
        crate::log_event!(
            "listener",
            "listening",
            "{addr} ({} routes)",
            inner.routes.len()
        );
        Ok(addr)
    }

    /// Stop accepting connections, drain for the grace period, then force-close.
    ///
    /// Safe to call repeatedly and before `start`.
    pub async fn stop(&self) {
        let serving = {
            let mut inner = self.inner.lock();
            match std::mem::replace(&mut inner.phase, Phase::Stopped) {
                Phase::Serving(serving) => Some(serving),
                _ => None,
            }
        };

        let Some(Serving {
            addr,
            shutdown,
            mut task,
        }) = serving
        else {
            return;
        };

        shutdown.cancel();
        let grace = self.config.drain_grace;

        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(Ok(()))) => {
                crate::log_event!("listener", "stopped", "{addr}");
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!("[listener] server on {addr} exited with error: {e}");
            }
            Ok(Err(e)) => {
                tracing::warn!("[listener] server task on {addr} failed: {e}");
            }
            Err(_) => {
                task.abort();
                tracing::warn!(
                    "[listener] drain exceeded {}ms on {addr}, connections force-closed",
                    grace.as_millis()
                );
            }
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.inner.lock().phase, Phase::Serving(_))
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.inner.lock().phase, Phase::Stopped)
    }

    /// Bound address while serving.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.inner.lock().phase {
            Phase::Serving(serving) => Some(serving.addr),
            _ => None,
        }
    }
}

impl Drop for WebhookListener {
    fn drop(&mut self) {
        if let Phase::Serving(serving) = &self.inner.get_mut().phase {
            serving.shutdown.cancel();
            serving.task.abort();
        }
    }
}
