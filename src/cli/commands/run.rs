//! `r4dar run`: start the orchestrator and hold it until Ctrl+C.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Settings;
use crate::jobs::LocalJobQueue;
use crate::notify::LogNotifier;
use crate::orchestrator::{ListenerOutcome, Orchestrator, ShutdownReport, StartupReport};
use crate::watcher::{WatcherCatalog, WatcherDeps};

const JOB_QUEUE_CAPACITY: usize = 256;

pub async fn run(mut settings: Settings, watchers: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(raw) = watchers {
        settings.watchers.apply_active_override(&raw);
    }
    if let Some(port) = port {
        settings.watchers.webhook_port = port;
    }

    let (queue, receiver) = LocalJobQueue::new(JOB_QUEUE_CAPACITY);
    let drain = tokio::spawn(receiver.drain_to_log());

    let notifier = LogNotifier::new(&settings.notifications);
    let deps = WatcherDeps::new(Arc::new(settings), Arc::new(queue), Arc::new(notifier));
    let orchestrator = Orchestrator::for_process(deps, WatcherCatalog::builtin())?;

    let report = orchestrator
        .start()
        .await
        .context("failed to start watchers")?;

    if !report.attempted {
        println!("Watchers are disabled. Set [watchers] enabled = true or R4DAR_WATCHERS.");
        return Ok(());
    }
    print_startup(&report);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    println!("\nShutting down...");

    let report = orchestrator.stop().await?;
    print_shutdown(&report);

    // Dropping the orchestrator releases the last job submitters
    drop(orchestrator);
    let _ = drain.await;
    Ok(())
}

fn print_startup(report: &StartupReport) {
    for outcome in &report.watchers {
        match &outcome.error {
            None => println!("  + {} ({})", outcome.name, outcome.state),
            Some(e) => println!("  x {}: {e}", outcome.name),
        }
    }
    for name in &report.unknown {
        println!("  ? {name}: no such watcher");
    }
    for failure in &report.discovery_failures {
        println!("  ! {failure}");
    }
    match &report.listener {
        ListenerOutcome::Listening(addr) => println!("Webhooks on http://{addr}"),
        ListenerOutcome::Failed(e) => println!("Webhook listener unavailable: {e}"),
        ListenerOutcome::NotStarted => {}
    }
    println!("Running {} watcher(s). Press Ctrl+C to stop.", report.started().len());
}

fn print_shutdown(report: &ShutdownReport) {
    for outcome in report.failures() {
        if let Some(e) = &outcome.error {
            println!("  x {}: {e}", outcome.name);
        }
    }
    println!(
        "Stopped {} watcher(s), listener {}",
        report.watchers.len(),
        if report.listener_stopped {
            "closed"
        } else {
            "was not running"
        }
    );
}
