//! `r4dar watchers`: list the discovered plugins.

use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

use crate::config::Settings;
use crate::watcher::WatcherCatalog;

pub fn run(settings: &Settings) {
    let mut registry = WatcherCatalog::builtin().discover();
    let configured = &settings.watchers.active_watchers;

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Name", "Module", "Configured", "Description"]);

    for descriptor in registry.descriptors() {
        let active = settings.watchers.enabled
            && configured.iter().any(|name| name.trim() == descriptor.name());
        table.add_row(vec![
            descriptor.name(),
            descriptor.module(),
            if active { "yes" } else { "no" },
            descriptor.description(),
        ]);
    }

    println!("{table}");

    for failure in registry.take_failures() {
        eprintln!("Warning: {failure}");
    }
    for name in configured {
        if !registry.contains(name.trim()) {
            eprintln!("Warning: configured watcher '{}' is not available", name.trim());
        }
    }
}
