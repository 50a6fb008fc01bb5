//! Host wiring: configuration, built-in plugins and conductor bootstrap

mod loader;
mod plugins;

pub use loader::{load_config, AppConfig, DEFAULT_CONFIG};
pub use plugins::{builtin_catalog, DEFAULT_MANIFEST};

use anyhow::{Context, Result};
use conductor_core::{BootstrapReport, Conductor, PluginManifest};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Read the manifest named on the command line, in the config, or the
/// embedded one
pub fn load_manifest(explicit: Option<&Path>, config: &AppConfig) -> Result<PluginManifest> {
    match explicit.or(config.plugins.manifest.as_deref()) {
        Some(path) => PluginManifest::from_file(path)
            .with_context(|| format!("Failed to load plugin manifest {}", path.display())),
        None => PluginManifest::from_json(DEFAULT_MANIFEST)
            .context("Embedded plugin manifest is invalid"),
    }
}

/// Build a conductor and load every runtime plugin the manifest names
pub fn bootstrap(
    config: &AppConfig,
    manifest: &PluginManifest,
) -> (Arc<Conductor>, BootstrapReport) {
    let conductor = Arc::new(Conductor::new(config.core.clone()));
    let report = conductor.register_plugins(manifest, &builtin_catalog());

    for failure in &report.failed {
        warn!(plugin = %failure.plugin_id, reason = %failure.reason, "Plugin not loaded");
    }
    info!(
        registered = report.registered.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Plugins bootstrapped"
    );

    (conductor, report)
}
