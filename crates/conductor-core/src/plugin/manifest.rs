//! Plugin manifest - which plugins a host wants loaded
//!
//! ```json
//! {
//!   "plugins": [
//!     {
//!       "id": "LibraryPlugin",
//!       "ui": { "slot": "library", "module": "library", "export": "LibraryPanel" },
//!       "runtime": { "module": "library", "export": "register" }
//!     }
//!   ]
//! }
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Top-level manifest document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Manifest format version (informational)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Plugin entries in load order
    #[serde(default)]
    pub plugins: Vec<PluginEntry>,
}

/// One plugin entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginEntry {
    /// Plugin id; sequences are mounted under it
    pub id: String,
    /// UI contribution; the core records it but never renders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<UiEntry>,
    /// Runtime registration entry point; absent for UI-only plugins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeEntry>,
}

/// UI slot binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiEntry {
    /// Layout slot name
    pub slot: String,
    /// Module specifier
    pub module: String,
    /// Exported component
    pub export: String,
}

/// Runtime registration binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeEntry {
    /// Module specifier, resolved through the plugin catalog
    pub module: String,
    /// Export name within the module
    #[serde(default = "default_export")]
    pub export: String,
}

fn default_export() -> String {
    "register".to_string()
}

impl PluginManifest {
    /// Parse and validate a manifest from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Self =
            serde_json::from_str(json).map_err(|e| Error::Manifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read, parse and validate a manifest file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Manifest(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&content)
    }

    /// Check ids are present and unique and runtime entries are complete
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (idx, entry) in self.plugins.iter().enumerate() {
            if entry.id.trim().is_empty() {
                return Err(Error::Manifest(format!("plugins[{idx}]: id must not be empty")));
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(Error::Manifest(format!("duplicate plugin id '{}'", entry.id)));
            }
            if let Some(runtime) = &entry.runtime {
                if runtime.module.trim().is_empty() || runtime.export.trim().is_empty() {
                    return Err(Error::Manifest(format!(
                        "plugin '{}': runtime module and export must not be empty",
                        entry.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Entries with a runtime binding
    pub fn runtime_plugins(&self) -> impl Iterator<Item = &PluginEntry> {
        self.plugins.iter().filter(|p| p.runtime.is_some())
    }
}
