//! Loader - resolve manifest entries to plugins and let them register
//!
//! Nothing is loaded dynamically: hosts link their plugins in and list them
//! in a [`PluginCatalog`] under the `(module, export)` pair a manifest names.

use crate::conductor::Conductor;
use crate::error::{Error, Result};
use crate::sequence::MusicalSequence;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::handler::HandlerMap;
use super::manifest::PluginManifest;
use super::mount::MountOutcome;

/// A runtime plugin: registers sequences and handlers when loaded
pub trait Plugin: Send + Sync {
    /// Mount everything this plugin provides
    fn register(&self, registrar: &mut PluginRegistrar<'_>) -> Result<()>;
}

/// Handle a plugin uses to mount its sequences
pub struct PluginRegistrar<'a> {
    conductor: &'a Conductor,
    plugin_id: String,
    mounted: Vec<String>,
}

impl<'a> PluginRegistrar<'a> {
    /// Registrar mounting under `plugin_id`
    #[must_use]
    pub fn new(conductor: &'a Conductor, plugin_id: impl Into<String>) -> Self {
        Self {
            conductor,
            plugin_id: plugin_id.into(),
            mounted: Vec::new(),
        }
    }

    /// Plugin id mounts default to
    #[must_use]
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Mount a sequence under the manifest plugin id
    pub fn mount(
        &mut self,
        sequence: MusicalSequence,
        handlers: HandlerMap,
    ) -> Result<MountOutcome> {
        let plugin_id = self.plugin_id.clone();
        self.mount_as(sequence, handlers, &plugin_id)
    }

    /// Mount a sequence under an explicit plugin id
    pub fn mount_as(
        &mut self,
        sequence: MusicalSequence,
        handlers: HandlerMap,
        plugin_id: &str,
    ) -> Result<MountOutcome> {
        let sequence_id = sequence.id.clone();
        let outcome = self.conductor.mount(sequence, handlers, plugin_id)?;
        self.mounted.push(sequence_id);
        Ok(outcome)
    }

    /// Sequence ids mounted through this registrar
    #[must_use]
    pub fn mounted(&self) -> &[String] {
        &self.mounted
    }
}

/// A plugin that mounts exactly one sequence with its handlers
#[derive(Debug, Clone)]
pub struct SequencePlugin {
    sequence: MusicalSequence,
    handlers: HandlerMap,
}

impl SequencePlugin {
    /// Create from a sequence and the handlers it needs
    #[must_use]
    pub fn new(sequence: MusicalSequence, handlers: HandlerMap) -> Self {
        Self { sequence, handlers }
    }
}

impl Plugin for SequencePlugin {
    fn register(&self, registrar: &mut PluginRegistrar<'_>) -> Result<()> {
        registrar.mount(self.sequence.clone(), self.handlers.clone())?;
        Ok(())
    }
}

/// Plugins known to the host, keyed by `(module, export)`
#[derive(Clone, Default)]
pub struct PluginCatalog {
    plugins: HashMap<(String, String), Arc<dyn Plugin>>,
}

impl std::fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self
            .plugins
            .keys()
            .map(|(module, export)| format!("{module}#{export}"))
            .collect();
        keys.sort();
        f.debug_struct("PluginCatalog").field("entries", &keys).finish()
    }
}

impl PluginCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under a module and export name
    pub fn register(
        &mut self,
        module: impl Into<String>,
        export: impl Into<String>,
        plugin: Arc<dyn Plugin>,
    ) {
        self.plugins.insert((module.into(), export.into()), plugin);
    }

    /// Builder form of [`PluginCatalog::register`]
    #[must_use]
    pub fn with(
        mut self,
        module: impl Into<String>,
        export: impl Into<String>,
        plugin: Arc<dyn Plugin>,
    ) -> Self {
        self.register(module, export, plugin);
        self
    }

    /// Resolve a module/export pair
    #[must_use]
    pub fn resolve(&self, module: &str, export: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins
            .get(&(module.to_string(), export.to_string()))
            .cloned()
    }

    /// Number of catalog entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

/// A plugin that registered successfully
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedPlugin {
    /// Manifest plugin id
    pub plugin_id: String,
    /// Sequences it mounted
    pub sequence_ids: Vec<String>,
}

/// A plugin that was not loaded
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginFailure {
    /// Manifest plugin id
    pub plugin_id: String,
    /// Why it was not loaded
    pub reason: String,
}

/// Result of bootstrapping plugins from a manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BootstrapReport {
    /// Plugins that registered
    pub registered: Vec<LoadedPlugin>,
    /// UI-only plugins with nothing to register
    pub skipped: Vec<String>,
    /// Plugins whose module did not resolve or whose registration failed
    pub failed: Vec<PluginFailure>,
}

impl BootstrapReport {
    /// Whether every runtime plugin loaded
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Load every runtime plugin named by the manifest.
///
/// A failing plugin is recorded and skipped; it never stops the others.
pub fn register_plugins(
    conductor: &Conductor,
    manifest: &PluginManifest,
    catalog: &PluginCatalog,
) -> BootstrapReport {
    let mut report = BootstrapReport::default();

    for entry in &manifest.plugins {
        let Some(runtime) = &entry.runtime else {
            report.skipped.push(entry.id.clone());
            continue;
        };

        let loaded = catalog
            .resolve(&runtime.module, &runtime.export)
            .ok_or_else(|| Error::PluginLoad {
                plugin_id: entry.id.clone(),
                message: format!(
                    "no plugin registered for module '{}' export '{}'",
                    runtime.module, runtime.export
                ),
            })
            .and_then(|plugin| {
                let mut registrar = PluginRegistrar::new(conductor, entry.id.clone());
                plugin.register(&mut registrar)?;
                Ok(registrar.mounted)
            });

        match loaded {
            Ok(sequence_ids) => {
                info!(plugin = %entry.id, sequences = ?sequence_ids, "Plugin registered");
                report.registered.push(LoadedPlugin {
                    plugin_id: entry.id.clone(),
                    sequence_ids,
                });
            }
            Err(e) => {
                warn!(plugin = %entry.id, error = %e, "Plugin failed to register");
                report.failed.push(PluginFailure {
                    plugin_id: entry.id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        registered = report.registered.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Plugin bootstrap finished"
    );
    report
}
