//! Orchestrator lifecycle tests against fake watchers.

use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use r4dar::jobs::{JobReceiver, LocalJobQueue};
use r4dar::notify::LogNotifier;
use r4dar::webhook::{RouteScope, WebhookRequest, WebhookResponse, handler_fn};
use r4dar::{
    ListenerOutcome, Orchestrator, OrchestratorPhase, RouteProvider, Settings, WatchError,
    WatchResult, Watcher, WatcherCatalog, WatcherDeps, WatcherDescriptor,
};

/// Records lifecycle calls across all fakes of one test.
#[derive(Default)]
struct CallLog {
    events: Mutex<Vec<String>>,
}

impl CallLog {
    fn record(&self, name: &str, call: &str) {
        self.events.lock().push(format!("{name}:{call}"));
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn called(&self, name: &str, call: &str) -> bool {
        self.events().contains(&format!("{name}:{call}"))
    }
}

#[derive(Clone, Copy, Default)]
struct Behavior {
    fail_init: bool,
    fail_start: bool,
    fail_stop: bool,
    hang_stop: bool,
    slow_start: bool,
    slow_stop: bool,
    route: Option<&'static str>,
}

struct Fake {
    name: String,
    behavior: Behavior,
    calls: Arc<CallLog>,
}

#[async_trait]
impl Watcher for Fake {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> WatchResult<()> {
        self.calls.record(&self.name, "init");
        if self.behavior.fail_init {
            return Err(WatchError::Initialization {
                watcher: self.name.clone(),
                reason: "cannot reach upstream".into(),
            });
        }
        Ok(())
    }

    async fn start(&self) -> WatchResult<()> {
        self.calls.record(&self.name, "start");
        if self.behavior.slow_start {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        if self.behavior.fail_start {
            return Err(WatchError::Start {
                watcher: self.name.clone(),
                reason: "scheduler refused".into(),
            });
        }
        Ok(())
    }

    async fn stop(&self) -> WatchResult<()> {
        self.calls.record(&self.name, "stop");
        if self.behavior.hang_stop {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.behavior.slow_stop {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.calls.record(&self.name, "stopped");
        }
        if self.behavior.fail_stop {
            return Err(WatchError::Stop {
                watcher: self.name.clone(),
                reason: "connection reset".into(),
            });
        }
        Ok(())
    }

    fn routes(&self) -> Option<&dyn RouteProvider> {
        self.behavior.route.map(|_| self as &dyn RouteProvider)
    }
}

impl RouteProvider for Fake {
    fn register_routes(&self, scope: &mut RouteScope<'_>) -> WatchResult<()> {
        let Some(path) = self.behavior.route else {
            return Ok(());
        };
        let owner = self.name.clone();
        scope.post(
            path,
            handler_fn(move |_request: WebhookRequest| {
                let owner = owner.clone();
                async move { WebhookResponse::ok(json!({ "owner": owner })) }
            }),
        )
    }
}

fn catalog(fakes: &[(&'static str, Behavior)], calls: &Arc<CallLog>) -> WatcherCatalog {
    let mut catalog = WatcherCatalog::new();
    for &(name, behavior) in fakes {
        let calls = calls.clone();
        catalog = catalog.with_plugin(name, move |registry| {
            let calls = calls.clone();
            registry.register(WatcherDescriptor::new(name, "fake", move |_deps| {
                Ok(Arc::new(Fake {
                    name: name.to_string(),
                    behavior,
                    calls: calls.clone(),
                }) as Arc<dyn Watcher>)
            }));
            Ok(())
        });
    }
    catalog
}

fn settings(active: &[&str], port: u16) -> Settings {
    let mut settings = Settings::default();
    settings.watchers.enabled = true;
    settings.watchers.active_watchers = active.iter().map(|s| s.to_string()).collect();
    settings.watchers.webhook_port = port;
    settings.watchers.bind_host = "127.0.0.1".to_string();
    settings.watchers.startup_timeout_ms = 1_000;
    settings.watchers.stop_grace_ms = 200;
    settings.watchers.drain_grace_ms = 200;
    settings
}

fn orchestrator(settings: Settings, catalog: WatcherCatalog) -> (Orchestrator, JobReceiver) {
    let (queue, receiver) = LocalJobQueue::new(16);
    let notifier = LogNotifier::new(&settings.notifications);
    let deps = WatcherDeps::new(Arc::new(settings), Arc::new(queue), Arc::new(notifier));
    (Orchestrator::new(deps, catalog), receiver)
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

fn free_port() -> u16 {
    StdTcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn test_unknown_name_does_not_block_known_watchers() {
    let calls = Arc::new(CallLog::default());
    let (orchestrator, _rx) = orchestrator(
        settings(&["ghost", "alpha"], 0),
        catalog(&[("alpha", Behavior::default())], &calls),
    );

    let report = orchestrator.start().await.unwrap();

    assert_eq!(report.unknown, vec!["ghost".to_string()]);
    assert_eq!(report.started(), vec!["alpha"]);
    assert_eq!(orchestrator.phase(), OrchestratorPhase::Running);
    assert!(orchestrator.is_active("alpha").await);
    assert_eq!(orchestrator.watcher("alpha").await.unwrap().name(), "alpha");
    assert!(orchestrator.watcher("ghost").await.is_none());

    orchestrator.stop().await.unwrap();
    assert!(orchestrator.watcher("alpha").await.is_none());
}

#[tokio::test]
async fn test_stop_failures_are_isolated() {
    let calls = Arc::new(CallLog::default());
    let (orchestrator, _rx) = orchestrator(
        settings(&["alpha", "beta", "gamma"], 0),
        catalog(
            &[
                (
                    "alpha",
                    Behavior {
                        fail_stop: true,
                        ..Behavior::default()
                    },
                ),
                ("beta", Behavior::default()),
                (
                    "gamma",
                    Behavior {
                        hang_stop: true,
                        ..Behavior::default()
                    },
                ),
            ],
            &calls,
        ),
    );

    orchestrator.start().await.unwrap();
    assert_eq!(orchestrator.active_watchers().await.len(), 3);
    let listener = orchestrator.listener().unwrap();

    let report = tokio::time::timeout(Duration::from_secs(5), orchestrator.stop())
        .await
        .expect("stop must not hang")
        .unwrap();

    for name in ["alpha", "beta", "gamma"] {
        assert!(calls.called(name, "stop"), "{name} was not stopped");
    }

    let names: Vec<_> = report.watchers.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    assert!(matches!(report.watchers[0].error, Some(WatchError::Stop { .. })));
    assert!(report.watchers[1].is_ok());
    assert!(matches!(
        report.watchers[2].error,
        Some(WatchError::StopTimeout { .. })
    ));

    assert!(report.listener_stopped);
    assert!(listener.is_stopped());
    assert_eq!(orchestrator.phase(), OrchestratorPhase::Idle);
    assert!(orchestrator.active_watchers().await.is_empty());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let calls = Arc::new(CallLog::default());
    let (orchestrator, _rx) = orchestrator(
        settings(&["alpha"], 0),
        catalog(&[("alpha", Behavior::default())], &calls),
    );

    // Never started
    let report = orchestrator.stop().await.unwrap();
    assert!(report.watchers.is_empty());

    orchestrator.start().await.unwrap();
    orchestrator.stop().await.unwrap();

    let second = orchestrator.stop().await.unwrap();
    assert!(second.watchers.is_empty());
    assert!(!second.listener_stopped);
    assert_eq!(orchestrator.phase(), OrchestratorPhase::Idle);
    assert_eq!(
        calls.events().iter().filter(|e| *e == "alpha:stop").count(),
        1
    );
}

#[tokio::test]
async fn test_route_conflict_rejects_second_claimant() {
    let calls = Arc::new(CallLog::default());
    let hook = Behavior {
        route: Some("/hook"),
        ..Behavior::default()
    };
    let (orchestrator, _rx) = orchestrator(
        settings(&["alpha", "beta"], 0),
        catalog(&[("alpha", hook), ("beta", hook)], &calls),
    );

    let report = orchestrator.start().await.unwrap();

    let beta = &report.watchers[1];
    assert_eq!(beta.name, "beta");
    let error = beta.error.as_ref().unwrap();
    assert!(matches!(error, WatchError::RouteConflict { owner, claimant, .. }
        if owner == "alpha" && claimant == "beta"));
    assert!(error.is_fatal());

    assert!(!calls.called("beta", "start"));
    assert!(calls.called("beta", "stop"));
    assert_eq!(orchestrator.active_watchers().await, vec!["alpha".to_string()]);

    let listener = orchestrator.listener().unwrap();
    let routes = listener.routes();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].1, "alpha");

    let addr = report.listener_addr().unwrap();
    let body: serde_json::Value = client()
        .post(format!("http://{addr}/hook"))
        .body("{}")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({ "owner": "alpha" }));

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_start_withdraws_routes() {
    let calls = Arc::new(CallLog::default());
    let (orchestrator, _rx) = orchestrator(
        settings(&["alpha"], 0),
        catalog(
            &[(
                "alpha",
                Behavior {
                    fail_start: true,
                    route: Some("/alpha"),
                    ..Behavior::default()
                },
            )],
            &calls,
        ),
    );

    let report = orchestrator.start().await.unwrap();

    assert!(matches!(
        report.watchers[0].error,
        Some(WatchError::Start { .. })
    ));
    assert!(calls.called("alpha", "stop"));
    assert_eq!(orchestrator.listener().unwrap().route_count(), 0);

    let addr = report.listener_addr().unwrap();
    let status = client()
        .post(format!("http://{addr}/alpha"))
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_startup_is_sequential_in_configured_order() {
    let calls = Arc::new(CallLog::default());
    let (orchestrator, _rx) = orchestrator(
        settings(&["beta", "alpha", "beta"], 0),
        catalog(
            &[("alpha", Behavior::default()), ("beta", Behavior::default())],
            &calls,
        ),
    );

    orchestrator.start().await.unwrap();

    assert_eq!(
        calls.events(),
        vec!["beta:init", "beta:start", "alpha:init", "alpha:start"]
    );
    assert_eq!(
        orchestrator.active_watchers().await,
        vec!["beta".to_string(), "alpha".to_string()]
    );

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_listener_instance_is_shared() {
    let calls = Arc::new(CallLog::default());
    let (orchestrator, _rx) = orchestrator(
        settings(&["alpha"], 0),
        catalog(&[("alpha", Behavior::default())], &calls),
    );
    orchestrator.start().await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let listener = orchestrator.listener();
            tokio::spawn(async move { listener })
        })
        .collect();

    let first = orchestrator.listener().unwrap();
    for handle in handles {
        let listener = handle.await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &listener));
    }

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_while_running_is_busy() {
    let calls = Arc::new(CallLog::default());
    let (orchestrator, _rx) = orchestrator(
        settings(&["alpha"], 0),
        catalog(&[("alpha", Behavior::default())], &calls),
    );
    orchestrator.start().await.unwrap();

    let err = orchestrator.start().await.unwrap_err();
    assert!(matches!(err, WatchError::OrchestratorBusy { .. }));
    assert!(err.is_fatal());
    assert_eq!(
        calls.events().iter().filter(|e| *e == "alpha:init").count(),
        1
    );

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_restart_builds_fresh_listener() {
    let calls = Arc::new(CallLog::default());
    let (orchestrator, _rx) = orchestrator(
        settings(&["alpha"], 0),
        catalog(&[("alpha", Behavior::default())], &calls),
    );

    orchestrator.start().await.unwrap();
    let first = orchestrator.listener().unwrap();
    orchestrator.stop().await.unwrap();
    assert!(orchestrator.listener().is_none());

    let report = orchestrator.start().await.unwrap();
    assert!(report.listener_addr().is_some());
    let second = orchestrator.listener().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.is_running());

    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_configuration_error_aborts_start() {
    let calls = Arc::new(CallLog::default());
    let (orchestrator, _rx) = orchestrator(
        settings(&["alpha", "  "], 0),
        catalog(&[("alpha", Behavior::default())], &calls),
    );

    let err = orchestrator.start().await.unwrap_err();
    assert!(matches!(err, WatchError::Configuration { .. }));
    assert_eq!(orchestrator.phase(), OrchestratorPhase::Idle);
    assert!(calls.events().is_empty());
}

#[tokio::test]
async fn test_listener_bind_failure_keeps_watchers_running() {
    let occupied = StdTcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let calls = Arc::new(CallLog::default());
    let (orchestrator, _rx) = orchestrator(
        settings(&["alpha"], port),
        catalog(&[("alpha", Behavior::default())], &calls),
    );

    let report = orchestrator.start().await.unwrap();

    assert!(matches!(
        report.listener,
        ListenerOutcome::Failed(WatchError::ListenerStart { .. })
    ));
    assert_eq!(orchestrator.phase(), OrchestratorPhase::Running);
    assert!(orchestrator.is_active("alpha").await);

    orchestrator.stop().await.unwrap();
    assert!(calls.called("alpha", "stop"));
}

#[tokio::test]
async fn test_process_claim_is_exclusive() {
    let deps = || {
        let settings = Settings::default();
        let (queue, _rx) = LocalJobQueue::new(1);
        let notifier = LogNotifier::new(&settings.notifications);
        WatcherDeps::new(Arc::new(settings), Arc::new(queue), Arc::new(notifier))
    };

    let first = Orchestrator::for_process(deps(), WatcherCatalog::new()).unwrap();
    let second = Orchestrator::for_process(deps(), WatcherCatalog::new());
    assert!(matches!(second, Err(WatchError::ProcessAlreadyClaimed)));

    drop(first);
    assert!(Orchestrator::for_process(deps(), WatcherCatalog::new()).is_ok());
}

// Scenario: one well-behaved watcher on a configured port
#[tokio::test]
async fn test_scenario_single_watcher_running() {
    let port = free_port();
    let calls = Arc::new(CallLog::default());
    let (orchestrator, _rx) = orchestrator(
        settings(&["repo_watcher"], port),
        catalog(&[("repo_watcher", Behavior::default())], &calls),
    );

    let report = orchestrator.start().await.unwrap();

    assert!(report.is_clean());
    assert_eq!(orchestrator.phase(), OrchestratorPhase::Running);
    assert_eq!(
        orchestrator.active_watchers().await,
        vec!["repo_watcher".to_string()]
    );
    assert_eq!(report.listener_addr().unwrap().port(), port);
    assert!(orchestrator.listener().unwrap().is_running());

    orchestrator.stop().await.unwrap();
}

// Scenario: subsystem disabled
#[tokio::test]
async fn test_scenario_disabled() {
    let calls = Arc::new(CallLog::default());
    let mut config = settings(&["alpha"], 0);
    config.watchers.enabled = false;
    let (orchestrator, _rx) = orchestrator(
        config,
        catalog(&[("alpha", Behavior::default())], &calls),
    );

    let report = orchestrator.start().await.unwrap();

    assert!(!report.attempted);
    assert!(matches!(report.listener, ListenerOutcome::NotStarted));
    assert!(orchestrator.listener().is_none());
    assert!(orchestrator.active_watchers().await.is_empty());
    assert_eq!(orchestrator.phase(), OrchestratorPhase::Idle);
    assert!(calls.events().is_empty());
}

// Scenario: initialize fails
#[tokio::test]
async fn test_scenario_initialize_failure() {
    let calls = Arc::new(CallLog::default());
    let (orchestrator, _rx) = orchestrator(
        settings(&["broken", "alpha"], 0),
        catalog(
            &[
                (
                    "broken",
                    Behavior {
                        fail_init: true,
                        ..Behavior::default()
                    },
                ),
                ("alpha", Behavior::default()),
            ],
            &calls,
        ),
    );

    let report = orchestrator.start().await.unwrap();

    assert_eq!(orchestrator.phase(), OrchestratorPhase::Running);
    assert!(!orchestrator.is_active("broken").await);
    assert!(orchestrator.is_active("alpha").await);
    assert!(!calls.called("broken", "start"));

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures[0].error,
        Some(WatchError::Initialization { .. })
    ));

    orchestrator.stop().await.unwrap();
}

// Scenario: stop from Running
#[tokio::test]
async fn test_scenario_stop_reaches_idle() {
    let calls = Arc::new(CallLog::default());
    let (orchestrator, _rx) = orchestrator(
        settings(&["alpha"], 0),
        catalog(&[("alpha", Behavior::default())], &calls),
    );
    orchestrator.start().await.unwrap();
    let listener = orchestrator.listener().unwrap();

    let report = orchestrator.stop().await.unwrap();

    assert!(report.is_clean());
    assert_eq!(orchestrator.phase(), OrchestratorPhase::Idle);
    assert!(orchestrator.active_watchers().await.is_empty());
    assert!(listener.is_stopped());
    assert!(!listener.is_running());
}

#[tokio::test]
async fn test_shutdown_is_concurrent_and_listener_stops_last() {
    let calls = Arc::new(CallLog::default());
    let hang = Behavior {
        hang_stop: true,
        ..Behavior::default()
    };
    let slow = Behavior {
        slow_stop: true,
        ..Behavior::default()
    };
    let (orchestrator, _rx) = orchestrator(
        settings(&["a", "b", "c", "d", "e"], 0),
        catalog(
            &[("a", hang), ("b", hang), ("c", hang), ("d", slow), ("e", slow)],
            &calls,
        ),
    );
    orchestrator.start().await.unwrap();

    let listener = orchestrator.listener().unwrap();
    assert!(listener.is_running());
    let observer = {
        let calls = calls.clone();
        let listener = listener.clone();
        tokio::spawn(async move {
            while listener.is_running() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            calls.record("listener", "stopped");
        })
    };

    let began = std::time::Instant::now();
    let report = orchestrator.stop().await.unwrap();
    let elapsed = began.elapsed();
    observer.await.unwrap();

    // stop_grace 200ms plus 500ms slack, paid once rather than per watcher
    assert!(
        elapsed < Duration::from_millis(1_400),
        "shutdown took {elapsed:?}"
    );
    for name in ["a", "b", "c"] {
        let outcome = report.watchers.iter().find(|o| o.name == name).unwrap();
        assert!(matches!(
            outcome.error,
            Some(WatchError::StopTimeout { .. })
        ));
    }

    let events = calls.events();
    let listener_at = events
        .iter()
        .position(|e| e == "listener:stopped")
        .unwrap();
    for name in ["d", "e"] {
        let settled_at = events
            .iter()
            .position(|e| *e == format!("{name}:stopped"))
            .unwrap();
        assert!(settled_at < listener_at, "{events:?}");
    }
    assert!(report.listener_stopped);
}

#[tokio::test]
async fn test_cancelled_start_rolls_back() {
    let calls = Arc::new(CallLog::default());
    let (orchestrator, _rx) = orchestrator(
        settings(&["alpha", "slow"], 0),
        catalog(
            &[
                ("alpha", Behavior::default()),
                (
                    "slow",
                    Behavior {
                        slow_start: true,
                        ..Behavior::default()
                    },
                ),
            ],
            &calls,
        ),
    );

    let cancelled = tokio::time::timeout(Duration::from_millis(100), orchestrator.start()).await;
    assert!(cancelled.is_err());

    assert_eq!(orchestrator.phase(), OrchestratorPhase::Idle);
    assert!(orchestrator.active_watchers().await.is_empty());
    assert!(orchestrator.listener().is_none());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(calls.called("alpha", "stop"));

    let report = orchestrator.start().await.unwrap();
    assert_eq!(report.started(), vec!["alpha", "slow"]);
    assert_eq!(orchestrator.phase(), OrchestratorPhase::Running);
    orchestrator.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_stop_returns_to_idle() {
    let calls = Arc::new(CallLog::default());
    let (orchestrator, _rx) = orchestrator(
        settings(&["alpha"], 0),
        catalog(
            &[(
                "alpha",
                Behavior {
                    hang_stop: true,
                    ..Behavior::default()
                },
            )],
            &calls,
        ),
    );
    orchestrator.start().await.unwrap();
    let listener = orchestrator.listener().unwrap();

    let cancelled = tokio::time::timeout(Duration::from_millis(100), orchestrator.stop()).await;
    assert!(cancelled.is_err());

    assert_eq!(orchestrator.phase(), OrchestratorPhase::Idle);
    assert!(orchestrator.active_watchers().await.is_empty());
    assert!(orchestrator.listener().is_none());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(listener.is_stopped());

    let report = orchestrator.start().await.unwrap();
    assert_eq!(report.started(), vec!["alpha"]);
}
