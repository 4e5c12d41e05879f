//! Process-wide coordinator for watcher discovery, lifecycle and webhook wiring.
//!
//! ```text
//! Idle --start()--> Starting --(all watchers attempted)--> Running
//!   ^                                                        |
//!   +-------------------- Stopping <------stop()-------------+
//! ```
//!
//! Startup is sequential in configured order. Shutdown fans out to every
//! active watcher at once and stops the listener only after all of them
//! settled. Failures of one watcher are recorded in the returned report and
//! never affect its siblings.
//!
//! Dropping a `start` or `stop` future part way returns the orchestrator to
//! `Idle`; whatever it had already started is stopped on a detached task.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::task::{self, JoinSet};

use crate::config::{Settings, WatcherPlan};
use crate::error::{WatchError, WatchResult};
use crate::watcher::{Watcher, WatcherCatalog, WatcherDeps, WatcherDescriptor, WatcherState};
use crate::webhook::{ListenerConfig, ListenerSlot, RouteScope, WebhookListener};

/// Time added on top of the stop grace before the orchestrator gives up on a
/// watcher whose own `stop` is already bounded by that grace.
const STOP_SLACK: Duration = Duration::from_millis(500);

static PROCESS_CLAIMED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrchestratorPhase {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for OrchestratorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OrchestratorPhase::Idle => "idle",
            OrchestratorPhase::Starting => "starting",
            OrchestratorPhase::Running => "running",
            OrchestratorPhase::Stopping => "stopping",
        };
        f.write_str(label)
    }
}

/// Result of driving one watcher through a lifecycle transition.
#[derive(Debug)]
pub struct WatcherOutcome {
    pub name: String,
    pub state: WatcherState,
    pub error: Option<WatchError>,
}

impl WatcherOutcome {
    fn ok(name: impl Into<String>, state: WatcherState) -> Self {
        Self {
            name: name.into(),
            state,
            error: None,
        }
    }

    fn failed(name: impl Into<String>, error: WatchError) -> Self {
        Self {
            name: name.into(),
            state: WatcherState::Failed,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Default)]
pub enum ListenerOutcome {
    #[default]
    NotStarted,
    Listening(SocketAddr),
    Failed(WatchError),
}

/// Everything that happened during one `start` call.
#[derive(Debug, Default)]
pub struct StartupReport {
    /// Attempted watchers in configured order.
    pub watchers: Vec<WatcherOutcome>,
    /// Configured names no plugin registered.
    pub unknown: Vec<String>,
    pub discovery_failures: Vec<WatchError>,
    pub listener: ListenerOutcome,
    /// False when the subsystem was disabled or nothing was configured.
    pub attempted: bool,
}

impl StartupReport {
    /// Names of watchers that reached `Running`.
    pub fn started(&self) -> Vec<&str> {
        self.watchers
            .iter()
            .filter(|outcome| outcome.is_ok())
            .map(|outcome| outcome.name.as_str())
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &WatcherOutcome> {
        self.watchers.iter().filter(|outcome| !outcome.is_ok())
    }

    pub fn listener_addr(&self) -> Option<SocketAddr> {
        match self.listener {
            ListenerOutcome::Listening(addr) => Some(addr),
            _ => None,
        }
    }

    /// No watcher, plugin, or listener failures and no unknown names.
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
            && self.unknown.is_empty()
            && self.discovery_failures.is_empty()
            && !matches!(self.listener, ListenerOutcome::Failed(_))
    }
}

/// Everything that happened during one `stop` call.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Stopped watchers in startup order.
    pub watchers: Vec<WatcherOutcome>,
    pub listener_stopped: bool,
}

impl ShutdownReport {
    pub fn failures(&self) -> impl Iterator<Item = &WatcherOutcome> {
        self.watchers.iter().filter(|outcome| !outcome.is_ok())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

#[derive(Default)]
struct ActiveState {
    watchers: IndexMap<String, Arc<dyn Watcher>>,
    listener: Option<Arc<WebhookListener>>,
    stop_grace: Duration,
}

/// Held by the orchestrator returned from [`Orchestrator::for_process`].
struct ProcessClaim;

impl Drop for ProcessClaim {
    fn drop(&mut self) {
        PROCESS_CLAIMED.store(false, Ordering::SeqCst);
    }
}

pub struct Orchestrator {
    deps: WatcherDeps,
    catalog: WatcherCatalog,
    listener_slot: ListenerSlot,
    phase: RwLock<OrchestratorPhase>,
    state: Mutex<ActiveState>,
    _claim: Option<ProcessClaim>,
}

impl Orchestrator {
    /// Build an orchestrator without claiming the process.
    ///
    /// Intended for tests and embedding; entry points use [`Orchestrator::for_process`].
    pub fn new(deps: WatcherDeps, catalog: WatcherCatalog) -> Self {
        Self {
            deps,
            catalog,
            listener_slot: ListenerSlot::new(),
            phase: RwLock::new(OrchestratorPhase::Idle),
            state: Mutex::new(ActiveState::default()),
            _claim: None,
        }
    }

    /// Build the one orchestrator of this process.
    ///
    /// A second call while the first orchestrator is alive fails with
    /// [`WatchError::ProcessAlreadyClaimed`].
    pub fn for_process(deps: WatcherDeps, catalog: WatcherCatalog) -> WatchResult<Self> {
        if PROCESS_CLAIMED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WatchError::ProcessAlreadyClaimed);
        }

        let mut orchestrator = Self::new(deps, catalog);
        orchestrator._claim = Some(ProcessClaim);
        Ok(orchestrator)
    }

    pub fn settings(&self) -> &Settings {
        &self.deps.settings
    }

    pub fn phase(&self) -> OrchestratorPhase {
        *self.phase.read()
    }

    fn set_phase(&self, phase: OrchestratorPhase) {
        let previous = std::mem::replace(&mut *self.phase.write(), phase);
        crate::debug_event!("orchestrator", "phase", "{previous} -> {phase}");
    }

    /// Discover, initialize and start the configured watchers, then the listener.
    ///
    /// Returns immediately with an empty report when the subsystem is
    /// disabled or no watcher is configured. Only configuration errors and a
    /// call outside `Idle` fail the whole call.
    pub async fn start(&self) -> WatchResult<StartupReport> {
        let mut state = self.state.lock().await;

        let phase = self.phase();
        if phase != OrchestratorPhase::Idle {
            return Err(WatchError::OrchestratorBusy {
                phase: phase.to_string(),
            });
        }

        let Some(plan) = self.deps.settings.watchers.plan()? else {
            crate::log_event!("orchestrator", "disabled", "no watchers to start");
            return Ok(StartupReport::default());
        };

        self.set_phase(OrchestratorPhase::Starting);
        crate::log_event!("orchestrator", "starting", "{:?}", plan.names);
        let mut rollback = Rollback::new(self, plan.stop_grace + STOP_SLACK);

        let mut report = StartupReport {
            attempted: true,
            ..StartupReport::default()
        };

        let listener = self.listener_slot.get_instance(&ListenerConfig {
            host: plan.host,
            drain_grace: plan.drain_grace,
        });

        rollback.listener = Some(listener.clone());

        let mut registry = self.catalog.discover();
        report.discovery_failures = registry.take_failures();

        for name in &plan.names {
            let Some(descriptor) = registry.get(name) else {
                tracing::warn!("[orchestrator] unknown watcher '{name}', skipping");
                report.unknown.push(name.clone());
                continue;
            };

            match self.launch(descriptor, &listener, &plan).await {
                Ok(watcher) => {
                    crate::log_event!("orchestrator", "watcher running", "{name}");
                    rollback.watchers.insert(name.clone(), watcher);
                    report
                        .watchers
                        .push(WatcherOutcome::ok(name.as_str(), WatcherState::Running));
                }
                Err(error) => {
                    tracing::error!("[orchestrator] {error}");
                    report
                        .watchers
                        .push(WatcherOutcome::failed(name.as_str(), error));
                }
            }
        }

        report.listener = match listener.start(plan.port).await {
            Ok(addr) => ListenerOutcome::Listening(addr),
            Err(error) => {
                tracing::error!(
                    "[orchestrator] {error}; watchers keep running without webhook ingress"
                );
                ListenerOutcome::Failed(error)
            }
        };

        state.watchers = rollback.disarm();
        state.listener = Some(listener);
        state.stop_grace = plan.stop_grace;
        self.set_phase(OrchestratorPhase::Running);

        crate::log_event!(
            "orchestrator",
            "running",
            "{}/{} watchers active",
            state.watchers.len(),
            plan.names.len()
        );
        Ok(report)
    }

    /// Construct, initialize, register routes and start one watcher.
    ///
    /// On any failure after construction the watcher's routes are withdrawn
    /// and it is given a best-effort stop.
    async fn launch(
        &self,
        descriptor: &WatcherDescriptor,
        listener: &WebhookListener,
        plan: &WatcherPlan,
    ) -> WatchResult<Arc<dyn Watcher>> {
        let name = descriptor.name();

        let watcher = catch_unwind(AssertUnwindSafe(|| descriptor.construct(&self.deps)))
            .unwrap_or_else(|_| {
                Err(WatchError::Initialization {
                    watcher: name.to_string(),
                    reason: "constructor panicked".to_string(),
                })
            })
            .map_err(|e| Step::Initialize.wrap(name, e))?;

        let initializing = watcher.clone();
        guarded(name, Step::Initialize, plan.startup_timeout, async move {
            initializing.initialize().await
        })
        .await?;
        crate::debug_event!("orchestrator", "initialized", "{name}");

        if let Err(error) = self.register_routes(name, watcher.as_ref(), listener) {
            listener.unregister_owner(name);
            abandon(name, &watcher, plan.stop_grace).await;
            return Err(error);
        }

        let starting = watcher.clone();
        let started = guarded(name, Step::Start, plan.startup_timeout, async move {
            starting.start().await
        })
        .await;

        if let Err(error) = started {
            listener.unregister_owner(name);
            abandon(name, &watcher, plan.stop_grace).await;
            return Err(error);
        }

        Ok(watcher)
    }

    fn register_routes(
        &self,
        name: &str,
        watcher: &dyn Watcher,
        listener: &WebhookListener,
    ) -> WatchResult<()> {
        let Some(provider) = watcher.routes() else {
            return Ok(());
        };

        let mut scope = RouteScope::new(listener, name);
        catch_unwind(AssertUnwindSafe(|| provider.register_routes(&mut scope))).unwrap_or_else(
            |_| {
                Err(WatchError::Start {
                    watcher: name.to_string(),
                    reason: "route registration panicked".to_string(),
                })
            },
        )?;

        crate::debug_event!("orchestrator", "routes", "{name} registered {}", scope.added());
        Ok(())
    }

    /// Stop every active watcher concurrently, then the listener.
    ///
    /// A no-op returning an empty report when already idle.
    pub async fn stop(&self) -> WatchResult<ShutdownReport> {
        let mut state = self.state.lock().await;

        match self.phase() {
            OrchestratorPhase::Idle => {
                crate::debug_event!("orchestrator", "stop", "already idle");
                return Ok(ShutdownReport::default());
            }
            OrchestratorPhase::Running => {}
            phase => {
                return Err(WatchError::OrchestratorBusy {
                    phase: phase.to_string(),
                });
            }
        }

        self.set_phase(OrchestratorPhase::Stopping);
        crate::log_event!(
            "orchestrator",
            "stopping",
            "{} watchers",
            state.watchers.len()
        );

        let bound = state.stop_grace + STOP_SLACK;
        let mut rollback = Rollback::new(self, bound);
        rollback.listener = state.listener.take();

        let mut report = ShutdownReport {
            watchers: stop_all(std::mem::take(&mut state.watchers), bound).await,
            listener_stopped: false,
        };

        if let Some(listener) = rollback.listener.clone() {
            listener.stop().await;
            report.listener_stopped = listener.is_stopped();
        }
        self.listener_slot.release();
        rollback.disarm();

        self.set_phase(OrchestratorPhase::Idle);
        crate::log_event!(
            "orchestrator",
            "stopped",
            "{} clean, {} failed",
            report.watchers.len() - report.failures().count(),
            report.failures().count()
        );
        Ok(report)
    }

    /// Names of running watchers in startup order.
    pub async fn active_watchers(&self) -> Vec<String> {
        self.state.lock().await.watchers.keys().cloned().collect()
    }

    pub async fn is_active(&self, name: &str) -> bool {
        self.state.lock().await.watchers.contains_key(name)
    }

    /// The running instance registered under `name`.
    pub async fn watcher(&self, name: &str) -> Option<Arc<dyn Watcher>> {
        self.state.lock().await.watchers.get(name).cloned()
    }

    /// The listener of the current start cycle, if any.
    pub fn listener(&self) -> Option<Arc<WebhookListener>> {
        self.listener_slot.current()
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Initialize,
    Start,
    Stop,
}

impl Step {
    fn error(self, watcher: &str, reason: String) -> WatchError {
        let watcher = watcher.to_string();
        match self {
            Step::Initialize => WatchError::Initialization { watcher, reason },
            Step::Start => WatchError::Start { watcher, reason },
            Step::Stop => WatchError::Stop { watcher, reason },
        }
    }

    /// Keep errors already in this step's category, wrap everything else.
    fn wrap(self, watcher: &str, error: WatchError) -> WatchError {
        match (self, error) {
            (Step::Initialize, e @ WatchError::Initialization { .. })
            | (Step::Start, e @ WatchError::Start { .. })
            | (Step::Stop, e @ (WatchError::Stop { .. } | WatchError::StopTimeout { .. })) => e,
            (step, e) => step.error(watcher, e.to_string()),
        }
    }
}

/// Run one lifecycle call on its own task, bounded by `limit`.
///
/// A panic or timeout becomes an error of the step's category; the call
/// never escapes into the orchestrator's task.
async fn guarded<F>(watcher: &str, step: Step, limit: Duration, call: F) -> WatchResult<()>
where
    F: Future<Output = WatchResult<()>> + Send + 'static,
{
    // Dropping the set aborts the call
    let mut running = JoinSet::new();
    running.spawn(call);

    match tokio::time::timeout(limit, running.join_next()).await {
        Ok(Some(Ok(result))) => result.map_err(|e| step.wrap(watcher, e)),
        Ok(Some(Err(e))) => Err(step.error(watcher, format!("task failed: {e}"))),
        Ok(None) => Err(step.error(watcher, "task vanished".to_string())),
        Err(_) => {
            running.abort_all();
            Err(match step {
                Step::Stop => WatchError::StopTimeout {
                    watcher: watcher.to_string(),
                    grace: limit,
                },
                _ => step.error(watcher, format!("timed out after {}ms", limit.as_millis())),
            })
        }
    }
}

/// Stop every watcher concurrently, each bounded by `bound`.
///
/// Returns one outcome per watcher in the map's order, including watchers
/// whose stop task panicked.
async fn stop_all(
    watchers: IndexMap<String, Arc<dyn Watcher>>,
    bound: Duration,
) -> Vec<WatcherOutcome> {
    let order: Vec<String> = watchers.keys().cloned().collect();
    let mut names: HashMap<task::Id, String> = HashMap::with_capacity(order.len());

    let mut stops = JoinSet::new();
    for (name, watcher) in watchers {
        let owner = name.clone();
        let handle = stops.spawn(async move {
            match tokio::time::timeout(bound, watcher.stop()).await {
                Ok(result) => result.map_err(|e| Step::Stop.wrap(&owner, e)),
                Err(_) => Err(WatchError::StopTimeout {
                    watcher: owner,
                    grace: bound,
                }),
            }
        });
        names.insert(handle.id(), name);
    }

    let mut outcomes: HashMap<String, WatcherOutcome> = HashMap::with_capacity(order.len());
    while let Some(joined) = stops.join_next_with_id().await {
        let id = match &joined {
            Ok((id, _)) => *id,
            Err(e) => e.id(),
        };
        let Some(name) = names.remove(&id) else {
            continue;
        };

        let result = joined
            .map_err(|e| Step::Stop.error(&name, format!("task failed: {e}")))
            .and_then(|(_, result)| result);
        let outcome = match result {
            Ok(()) => {
                crate::debug_event!("orchestrator", "stopped", "{name}");
                WatcherOutcome::ok(name.as_str(), WatcherState::Stopped)
            }
            Err(error) => {
                tracing::warn!("[orchestrator] {error}");
                WatcherOutcome::failed(name.as_str(), error)
            }
        };
        outcomes.insert(name, outcome);
    }

    order
        .into_iter()
        .map(|name| {
            outcomes.remove(&name).unwrap_or_else(|| {
                let error = Step::Stop.error(&name, "stop outcome lost".to_string());
                WatcherOutcome::failed(name, error)
            })
        })
        .collect()
}

/// Puts the orchestrator back to `Idle` when a `start` or `stop` future is
/// dropped before it finished.
///
/// Watchers and the listener held here are stopped on a detached task.
struct Rollback<'a> {
    phase: &'a RwLock<OrchestratorPhase>,
    slot: &'a ListenerSlot,
    watchers: IndexMap<String, Arc<dyn Watcher>>,
    listener: Option<Arc<WebhookListener>>,
    stop_bound: Duration,
    armed: bool,
}

impl<'a> Rollback<'a> {
    fn new(orchestrator: &'a Orchestrator, stop_bound: Duration) -> Self {
        Self {
            phase: &orchestrator.phase,
            slot: &orchestrator.listener_slot,
            watchers: IndexMap::new(),
            listener: None,
            stop_bound,
            armed: true,
        }
    }

    /// The call completed; hand back the watchers it started.
    fn disarm(mut self) -> IndexMap<String, Arc<dyn Watcher>> {
        self.armed = false;
        std::mem::take(&mut self.watchers)
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let watchers = std::mem::take(&mut self.watchers);
        let listener = self.listener.take();
        tracing::warn!(
            "[orchestrator] {} cancelled, rolling back {} watchers",
            *self.phase.read(),
            watchers.len()
        );
        self.slot.release();
        *self.phase.write() = OrchestratorPhase::Idle;

        if watchers.is_empty() && listener.is_none() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("[orchestrator] no runtime left, watchers dropped without stop");
            return;
        };
        let bound = self.stop_bound;
        runtime.spawn(async move {
            stop_all(watchers, bound).await;
            if let Some(listener) = listener {
                listener.stop().await;
            }
        });
    }
}

/// Best-effort stop of a watcher that failed to come up.
async fn abandon(name: &str, watcher: &Arc<dyn Watcher>, grace: Duration) {
    let stopping = watcher.clone();
    if let Err(e) = guarded(name, Step::Stop, grace + STOP_SLACK, async move {
        stopping.stop().await
    })
    .await
    {
        tracing::warn!("[orchestrator] cleanup of failed watcher: {e}");
    }
}
