//! Built-in plugins
//!
//! `basic-test` mounts the three-beat smoke-test sequence; `library` mounts
//! sequences that list a directory and summarise what they found.

use async_trait::async_trait;
use conductor_core::{
    Beat, BeatContext, BeatHandler, BeatOutput, Dynamics, HandlerMap, Movement, MusicalSequence,
    Plugin, PluginCatalog, PluginRegistrar, Result, SequencePlugin, Timing,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Manifest used when none is configured
pub const DEFAULT_MANIFEST: &str = include_str!("../../config/plugin-manifest.json");

/// Catalog of every plugin linked into the host
pub fn builtin_catalog() -> PluginCatalog {
    PluginCatalog::new()
        .with("basic-test", "register", Arc::new(basic_test_plugin()))
        .with("library", "register", Arc::new(LibraryPlugin))
}

fn basic_test_plugin() -> SequencePlugin {
    let sequence = MusicalSequence::new("basic-test-seq", "Basic Test Sequence")
        .with_description("Three immediate beats; used to check a host end to end")
        .with_category("system")
        .with_movement(
            Movement::new("main", "Main")
                .with_beat(Beat::new(1, "test-start", "start").with_title("Start"))
                .with_beat(Beat::new(2, "test-process", "process").with_title("Process"))
                .with_beat(Beat::new(3, "test-complete", "complete").with_title("Complete")),
        );

    let handlers = HandlerMap::new()
        .with_fn("start", |_, ctx| {
            info!(play_id = %ctx.play_id(), "Basic test started");
            Ok(Some(json!({ "started": true })))
        })
        .with_fn("process", |data, _| {
            let input = data.get("input").cloned().unwrap_or(Value::Null);
            Ok(Some(json!({ "processed": input })))
        })
        .with_fn("complete", |_, ctx| {
            info!(play_id = %ctx.play_id(), "Basic test complete");
            Ok(Some(json!({ "completed": true })))
        });

    SequencePlugin::new(sequence, handlers)
}

/// Lists a directory; `path` comes from the play context, default `.`
struct ScanDirectory;

#[async_trait]
impl BeatHandler for ScanDirectory {
    async fn handle(&self, data: Value, _ctx: BeatContext) -> anyhow::Result<BeatOutput> {
        let root = PathBuf::from(data.get("path").and_then(Value::as_str).unwrap_or("."));
        let mut entries = tokio::fs::read_dir(&root).await?;
        let mut items = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let kind = if entry.file_type().await?.is_dir() {
                "dir"
            } else {
                "file"
            };
            items.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "kind": kind,
            }));
        }
        items.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
        Ok(Some(json!({ "root": root.display().to_string(), "items": items })))
    }
}

fn summarize(data: Value, _ctx: &BeatContext) -> anyhow::Result<BeatOutput> {
    let items = data
        .get("items")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let dirs = items.iter().filter(|i| i["kind"] == "dir").count();
    Ok(Some(json!({
        "summary": { "total": items.len(), "dirs": dirs, "files": items.len() - dirs }
    })))
}

fn library_handlers() -> HandlerMap {
    HandlerMap::new()
        .with("scan", Arc::new(ScanDirectory))
        .with_fn("summarize", summarize)
}

struct LibraryPlugin;

impl Plugin for LibraryPlugin {
    fn register(&self, registrar: &mut PluginRegistrar<'_>) -> Result<()> {
        let load = MusicalSequence::new("library-load", "Library Load")
            .with_category("data")
            .with_movement(
                Movement::new("load", "Load")
                    .with_beat(
                        Beat::new(1, "library:scanned", "scan").with_dynamics(Dynamics::Forte),
                    )
                    .with_beat(
                        Beat::new(2, "library:loaded", "summarize")
                            .with_timing(Timing::AfterBeat),
                    ),
            );
        registrar.mount(load, library_handlers())?;

        // Waits for the host to say the panel is ready before scanning.
        let refresh = MusicalSequence::new("library-refresh", "Library Refresh")
            .with_category("data")
            .with_movement(
                Movement::new("refresh", "Refresh")
                    .with_beat(
                        Beat::new(1, "library:refresh", "scan")
                            .with_timing(Timing::Synchronized)
                            .with_signal("library:ready"),
                    )
                    .with_beat(Beat::new(2, "library:refreshed", "summarize")),
            );
        registrar.mount(refresh, library_handlers())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::{Conductor, ConductorConfig, PluginManifest, SequencePriority};

    #[tokio::test]
    async fn test_default_manifest_loads_builtin_plugins() {
        let client = Conductor::new(ConductorConfig::default()).into_client();
        let manifest = PluginManifest::from_json(DEFAULT_MANIFEST).unwrap();

        let report = client.register_cia_plugins(&manifest, &builtin_catalog());

        assert!(report.is_clean());
        assert_eq!(report.skipped, vec!["HeaderPlugin".to_string()]);
        assert_eq!(
            client.get_mounted_plugin_ids(),
            vec!["BasicTestPlugin".to_string(), "LibraryPlugin".to_string()]
        );
    }

    #[tokio::test]
    async fn test_basic_test_sequence_plays() {
        let client = Conductor::new(ConductorConfig::default()).into_client();
        let manifest = PluginManifest::from_json(DEFAULT_MANIFEST).unwrap();
        client.register_cia_plugins(&manifest, &builtin_catalog());

        let result = client
            .play(
                "BasicTestPlugin",
                "basic-test-seq",
                json!({ "input": "hello" }),
                SequencePriority::Normal,
            )
            .await
            .unwrap();

        assert_eq!(result.payload["processed"], "hello");
        assert_eq!(result.payload["completed"], true);
    }

    #[tokio::test]
    async fn test_library_load_summarizes_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let client = Conductor::new(ConductorConfig::default()).into_client();
        let manifest = PluginManifest::from_json(DEFAULT_MANIFEST).unwrap();
        client.register_cia_plugins(&manifest, &builtin_catalog());

        let result = client
            .play(
                "LibraryPlugin",
                "library-load",
                json!({ "path": dir.path().display().to_string() }),
                SequencePriority::Normal,
            )
            .await
            .unwrap();

        assert_eq!(result.payload["summary"]["total"], 3);
        assert_eq!(result.payload["summary"]["dirs"], 1);
        assert_eq!(result.payload["items"][0]["name"], "a.txt");
    }

    #[tokio::test]
    async fn test_library_scan_of_missing_directory_fails() {
        let client = Conductor::new(ConductorConfig::default()).into_client();
        let manifest = PluginManifest::from_json(DEFAULT_MANIFEST).unwrap();
        client.register_cia_plugins(&manifest, &builtin_catalog());

        let err = client
            .play(
                "LibraryPlugin",
                "library-load",
                json!({ "path": "/definitely/not/here" }),
                SequencePriority::Normal,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "HANDLER_EXECUTION_ERROR");
    }
}
