//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use anyhow::{Context, Result};
use conductor_core::ConductorConfig;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Host configuration: the conductor sections plus host-only settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Engine, registry, queue and event settings
    #[serde(flatten)]
    pub core: ConductorConfig,
    /// Plugin bootstrap settings
    #[serde(default)]
    pub plugins: PluginsConfig,
}

/// Where plugins come from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Manifest file; the embedded manifest is used when unset
    #[serde(default)]
    pub manifest: Option<PathBuf>,
}

/// Load configuration from files and environment
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let mut builder = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. External overrides (optional)
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name("config/local").required(false));

    // 3. File named on the command line (must exist)
    if let Some(path) = explicit {
        builder = builder.add_source(File::from(path.to_path_buf()).required(true));
    }

    let config = builder
        // 4. Environment variables (highest priority)
        // prefix_separator("_") keeps CONDUCTOR_QUEUE__MODE working; config-rs
        // would otherwise expect CONDUCTOR__QUEUE__MODE.
        .add_source(
            Environment::with_prefix("CONDUCTOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let app: AppConfig = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;
    app.core.validate().context("Invalid configuration")?;
    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::{ErrorPolicy, QueueMode, RegistrationPolicy};

    #[test]
    fn test_embedded_defaults_match_core_defaults() {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.core, ConductorConfig::default());
        assert!(config.plugins.manifest.is_none());
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conductor.toml");
        std::fs::write(
            &path,
            r#"
[conductor]
error_policy = "continue_and_report"
signal_timeout_ms = 5000

[registry]
on_duplicate = "replace"

[queue]
mode = "concurrent"

[plugins]
manifest = "plugins.json"
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(
            config.core.conductor.error_policy,
            ErrorPolicy::ContinueAndReport
        );
        assert_eq!(config.core.conductor.signal_timeout_ms, 5000);
        assert_eq!(config.core.registry.on_duplicate, RegistrationPolicy::Replace);
        assert_eq!(config.core.queue.mode, QueueMode::Concurrent);
        assert_eq!(config.core.queue.max_concurrent, 4);
        assert_eq!(config.plugins.manifest, Some(PathBuf::from("plugins.json")));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("configuration"));
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conductor.toml");
        std::fs::write(&path, "[queue]\nmode = \"concurrent\"\nmax_concurrent = 0\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("Invalid configuration"), "{message}");
        assert!(message.contains("max_concurrent"), "{message}");
    }
}
