//! `conductor inspect`

use crate::host;
use anyhow::Result;
use serde_json::json;
use std::path::Path;

pub fn run(config: Option<&Path>, manifest: Option<&Path>, as_json: bool) -> Result<()> {
    let config = host::load_config(config)?;
    let manifest = host::load_manifest(manifest, &config)?;
    let (conductor, report) = host::bootstrap(&config, &manifest);
    let client = conductor.client();

    if as_json {
        let view = json!({
            "bootstrap": report,
            "plugins": client.get_mounted_plugins(),
            "status": client.get_status(),
        });
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("🎼 Conductor\n");

    println!("Plugins:");
    for plugin in client.get_mounted_plugins() {
        println!(
            "  ✅ {} ({} handler(s)): {}",
            plugin.plugin_id,
            plugin.handlers.len(),
            plugin.sequence_ids.join(", ")
        );
    }
    for skipped in &report.skipped {
        println!("  ➖ {} (UI only)", skipped);
    }
    for failure in &report.failed {
        println!("  ❌ {}: {}", failure.plugin_id, failure.reason);
    }

    println!("\nSequences:");
    for (id, name) in client.get_sequence_names() {
        println!("  {} - {}", id, name);
    }

    Ok(())
}
