//! `r4dar config`: print the effective settings and what `run` would do.

use anyhow::Result;

use crate::config::Settings;

pub fn run(settings: &Settings) -> Result<()> {
    println!("Current Configuration:");
    println!("{}", "=".repeat(50));
    println!("{}", settings.to_toml()?);

    println!("Watcher plan:");
    match settings.watchers.plan()? {
        None => println!("  disabled (nothing to start)"),
        Some(plan) => {
            println!("  watchers:   {}", plan.names.join(", "));
            println!("  listener:   {}:{}", plan.host, plan.port);
            println!(
                "  timeouts:   startup {}ms, stop {}ms, drain {}ms",
                plan.startup_timeout.as_millis(),
                plan.stop_grace.as_millis(),
                plan.drain_grace.as_millis()
            );
        }
    }
    Ok(())
}
