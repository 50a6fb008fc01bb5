//! Integration tests for the conductor
//!
//! These tests drive the public surface end to end:
//! - Sequence ordering across movements and play isolation
//! - Mounting, remounting and fail-fast resolution
//! - Event bus fault tolerance
//! - Priority admission per plugin
//! - Manifest-driven plugin bootstrap through the client

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use conductor_core::{
    names, parse_sequence_json, Beat, BeatContext, BeatHandler, BeatOutput, Conductor,
    ConductorClient, ConductorConfig, Error, EventBus, HandlerMap, Movement, MusicalSequence,
    PlayStatus, Plugin, PluginCatalog, PluginManifest, PluginRegistrar, QueueMode,
    RegistrationPolicy, SequencePlugin, SequencePriority, Timing,
};
use mockall::mock;
use serde_json::{json, Value};

mock! {
    pub Handler {}

    #[async_trait]
    impl BeatHandler for Handler {
        async fn handle(&self, data: Value, ctx: BeatContext) -> anyhow::Result<BeatOutput>;
    }
}

const BASIC_TEST_SEQUENCE: &str = r#"{
    "id": "basic-test-seq",
    "name": "Basic Test Sequence",
    "category": "system",
    "movements": [
        {
            "id": "main",
            "name": "Main",
            "beats": [
                { "beat": 3, "event": "test-complete", "handler": "complete" },
                { "beat": 1, "event": "test-start", "handler": "start" },
                { "beat": 2, "event": "test-process", "handler": "process" }
            ]
        }
    ]
}"#;

fn recorder(
    log: &Arc<Mutex<Vec<String>>>,
    label: &str,
) -> impl Fn(Value, &BeatContext) -> anyhow::Result<BeatOutput> + Send + Sync + 'static {
    let log = Arc::clone(log);
    let label = label.to_string();
    move |_, _| {
        log.lock().unwrap().push(label.clone());
        Ok(None)
    }
}

async fn wait_for_queued(client: &ConductorClient, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while client.get_status().queued_plays < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("plays never queued");
}

// ============================================================================
// Sequencing
// ============================================================================

#[tokio::test]
async fn test_beats_run_in_order_across_movements() {
    let client = Conductor::new(ConductorConfig::default()).into_client();
    let log = Arc::new(Mutex::new(Vec::new()));

    let sequence = MusicalSequence::new("multi", "Multi Movement")
        .with_movement(
            Movement::new("intro", "Intro")
                .with_beat(Beat::new(2, "intro:two", "two"))
                .with_beat(Beat::new(1, "intro:one", "one")),
        )
        .with_movement(
            Movement::new("body", "Body").with_beat(Beat::new(3, "body:three", "three")),
        )
        .with_movement(
            Movement::new("coda", "Coda").with_beat(Beat::new(4, "coda:four", "four")),
        );
    let handlers = HandlerMap::new()
        .with_fn("one", recorder(&log, "1"))
        .with_fn("two", recorder(&log, "2"))
        .with_fn("three", recorder(&log, "3"))
        .with_fn("four", recorder(&log, "4"));

    let catalog = PluginCatalog::new().with(
        "multi",
        "register",
        Arc::new(SequencePlugin::new(sequence, handlers)),
    );
    let manifest = PluginManifest::from_json(
        r#"{ "plugins": [ { "id": "MultiPlugin", "runtime": { "module": "multi" } } ] }"#,
    )
    .unwrap();
    assert!(client.register_cia_plugins(&manifest, &catalog).is_clean());

    let result = client.play_default("MultiPlugin", "multi").await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["1", "2", "3", "4"]);
    let order: Vec<u32> = result.beats.iter().map(|b| b.beat).collect();
    assert_eq!(order, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_basic_test_sequence_publishes_beat_events() {
    let conductor = Arc::new(Conductor::new(ConductorConfig::default()));
    let sequence = parse_sequence_json(BASIC_TEST_SEQUENCE).unwrap();
    conductor
        .mount(
            sequence,
            HandlerMap::new()
                .with_fn("start", |_, _| Ok(Some(json!({ "started": true }))))
                .with_fn("process", |_, _| Ok(Some(json!({ "processed": 3 }))))
                .with_fn("complete", |_, _| Ok(None)),
            "BasicTestPlugin",
        )
        .unwrap();
    let client = conductor.client();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut subscriptions = Vec::new();
    for event in ["test-start", "test-process", "test-complete"] {
        let seen = Arc::clone(&seen);
        subscriptions.push(client.on(event, move |_| {
            seen.lock().unwrap().push(event.to_string());
            Ok(())
        }));
    }

    let result = client
        .play("BasicTestPlugin", "basic-test-seq", json!({}), SequencePriority::Normal)
        .await
        .unwrap();

    assert_eq!(result.status, PlayStatus::Completed);
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["test-start", "test-process", "test-complete"]
    );
    assert_eq!(result.payload["processed"], 3);

    for subscription in &subscriptions {
        assert!(client.off(subscription));
    }
}

#[tokio::test]
async fn test_concurrent_plays_are_isolated() {
    let conductor = Arc::new(Conductor::new(
        ConductorConfig::new()
            .with_queue_mode(QueueMode::Concurrent)
            .with_max_concurrent(4),
    ));
    conductor
        .mount(
            MusicalSequence::new("echo", "Echo").with_movement(
                Movement::new("main", "Main")
                    .with_beat(Beat::new(1, "echo:write", "write"))
                    .with_beat(Beat::new(2, "echo:read", "read")),
            ),
            HandlerMap::new()
                .with_async("write", |data, _| async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    anyhow::Ok(Some(json!({ "seen": data["who"].clone() })))
                })
                .with_fn("read", |data, _| {
                    anyhow::ensure!(data["seen"] == data["who"], "payload leaked between plays");
                    Ok(None)
                }),
            "EchoPlugin",
        )
        .unwrap();

    let mut plays = Vec::new();
    for who in ["alice", "bob", "carol"] {
        let conductor = Arc::clone(&conductor);
        plays.push(tokio::spawn(async move {
            conductor
                .play("EchoPlugin", "echo", json!({ "who": who }), SequencePriority::Normal)
                .await
        }));
    }

    let mut seen = Vec::new();
    for play in plays {
        let result = play.await.unwrap().unwrap();
        assert_eq!(result.status, PlayStatus::Completed);
        seen.push(result.payload["seen"].as_str().unwrap().to_string());
    }
    seen.sort();
    assert_eq!(seen, vec!["alice", "bob", "carol"]);
}

// ============================================================================
// Mounting
// ============================================================================

#[tokio::test]
async fn test_remount_is_idempotent_and_rebinds_handlers() {
    let conductor = Arc::new(Conductor::new(ConductorConfig::default()));
    let sequence = parse_sequence_json(BASIC_TEST_SEQUENCE).unwrap();
    let noop = || {
        HandlerMap::new()
            .with_fn("start", |_, _| Ok(None))
            .with_fn("process", |_, _| Ok(Some(json!({ "version": 1 }))))
            .with_fn("complete", |_, _| Ok(None))
    };

    let first = conductor
        .mount(sequence.clone(), noop(), "BasicTestPlugin")
        .unwrap();
    assert!(!first.remount);
    let second = conductor
        .mount(
            sequence,
            HandlerMap::new().with_fn("process", |_, _| Ok(Some(json!({ "version": 2 })))),
            "BasicTestPlugin",
        )
        .unwrap();
    assert!(second.remount);

    assert_eq!(conductor.mounted_plugin_ids(), vec!["BasicTestPlugin".to_string()]);
    assert_eq!(conductor.registry().len(), 1);
    let mounted = conductor.mounted_plugins();
    assert_eq!(mounted[0].sequence_ids, vec!["basic-test-seq".to_string()]);

    let result = conductor
        .play("BasicTestPlugin", "basic-test-seq", json!({}), SequencePriority::Normal)
        .await
        .unwrap();
    assert_eq!(result.payload["version"], 2);
}

#[tokio::test]
async fn test_double_mount_fires_each_beat_once() {
    let conductor = Arc::new(Conductor::new(ConductorConfig::default()));
    let sequence = parse_sequence_json(BASIC_TEST_SEQUENCE).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counting = |calls: &Arc<AtomicUsize>| {
        ["start", "process", "complete"]
            .into_iter()
            .fold(HandlerMap::new(), |map, name| {
                let calls = Arc::clone(calls);
                map.with_fn(name, move |_, _| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })
            })
    };

    conductor
        .mount(sequence.clone(), counting(&calls), "BasicTestPlugin")
        .unwrap();
    conductor
        .mount(sequence, counting(&calls), "BasicTestPlugin")
        .unwrap();

    let beat_starts = Arc::new(AtomicUsize::new(0));
    let starts = Arc::clone(&beat_starts);
    let _subscription = conductor.client().on(names::BEAT_START, move |_| {
        starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let result = conductor
        .play("BasicTestPlugin", "basic-test-seq", json!({}), SequencePriority::Normal)
        .await
        .unwrap();

    assert_eq!(result.status, PlayStatus::Completed);
    assert_eq!(result.beats.len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(beat_starts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_sequence_owned_by_another_plugin_is_rejected() {
    let conductor = Conductor::new(ConductorConfig::default());
    let sequence = parse_sequence_json(BASIC_TEST_SEQUENCE).unwrap();
    conductor
        .mount(sequence.clone(), HandlerMap::new(), "OwnerPlugin")
        .unwrap();

    let err = conductor
        .mount(sequence, HandlerMap::new(), "ThiefPlugin")
        .unwrap_err();
    match err {
        Error::DuplicateSequence { sequence_id, owner } => {
            assert_eq!(sequence_id, "basic-test-seq");
            assert_eq!(owner.as_deref(), Some("OwnerPlugin"));
        }
        other => panic!("expected DuplicateSequence, got {other:?}"),
    }
    assert_eq!(conductor.mounted_plugin_ids(), vec!["OwnerPlugin".to_string()]);
}

#[tokio::test]
async fn test_replace_policy_allows_unowned_redefinition() {
    let conductor = Conductor::new(
        ConductorConfig::new().with_registration_policy(RegistrationPolicy::Replace),
    );
    let sequence = parse_sequence_json(BASIC_TEST_SEQUENCE).unwrap();
    conductor.register_sequence(sequence.clone()).unwrap();

    let renamed = MusicalSequence {
        name: "Renamed".to_string(),
        ..sequence
    };
    conductor.register_sequence(renamed).unwrap();
    assert_eq!(
        conductor.sequence_names(),
        vec![("basic-test-seq".to_string(), "Renamed".to_string())]
    );
}

#[tokio::test]
async fn test_unknown_plugin_fails_fast() {
    let conductor = Arc::new(Conductor::new(ConductorConfig::default()));
    let mut handler = MockHandler::new();
    handler.expect_handle().never();
    conductor
        .mount(
            parse_sequence_json(BASIC_TEST_SEQUENCE).unwrap(),
            HandlerMap::new()
                .with("start", Arc::new(handler))
                .with_fn("process", |_, _| Ok(None))
                .with_fn("complete", |_, _| Ok(None)),
            "BasicTestPlugin",
        )
        .unwrap();
    let client = conductor.client();
    let mut tap = client.tap();

    let err = client
        .play("GhostPlugin", "basic-test-seq", json!({}), SequencePriority::Normal)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PluginNotMounted { ref plugin_id } if plugin_id == "GhostPlugin"));

    let err = client
        .play("UnknownPlugin", "unknown-seq", json!({}), SequencePriority::Normal)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PLUGIN_NOT_MOUNTED");

    assert_eq!(client.get_statistics().play_count, 0);
    assert!(tap.try_recv().is_err());
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_failing_beat_stops_the_play() {
    let conductor = Arc::new(Conductor::new(ConductorConfig::default()));
    let mut third = MockHandler::new();
    third.expect_handle().never();
    let mut first = MockHandler::new();
    first
        .expect_handle()
        .times(1)
        .returning(|_, _| Ok(Some(json!({ "started": true }))));
    conductor
        .mount(
            parse_sequence_json(BASIC_TEST_SEQUENCE).unwrap(),
            HandlerMap::new()
                .with("start", Arc::new(first))
                .with_fn("process", |_, _| anyhow::bail!("processing exploded"))
                .with("complete", Arc::new(third)),
            "BasicTestPlugin",
        )
        .unwrap();
    let client = conductor.client();

    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&failures);
    let _sub = client.subscribe(names::SEQUENCE_FAILED, move |payload| {
        sink.lock().unwrap().push(payload.clone());
        Ok(())
    });

    let err = client
        .play("BasicTestPlugin", "basic-test-seq", json!({}), SequencePriority::Normal)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::HandlerExecution { beat: 2, .. }));

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    let detail = &failures[0];
    assert_eq!(detail["sequenceId"], "basic-test-seq");
    assert_eq!(detail["failedBeats"], json!([2]));
    assert_eq!(detail["error"]["code"], "HANDLER_EXECUTION_ERROR");
    assert_eq!(detail["error"]["handler"], "process");
    assert!(detail["error"]["message"]
        .as_str()
        .unwrap()
        .contains("processing exploded"));

    let stats = client.get_statistics();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.sequences["basic-test-seq"].failures, 1);
}

#[test]
fn test_faulty_subscribers_do_not_stop_delivery() {
    let bus = EventBus::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut subscriptions = Vec::new();

    for i in 0..5 {
        let calls = Arc::clone(&calls);
        subscriptions.push(bus.subscribe("canvas:update", move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            match i {
                1 => anyhow::bail!("subscriber {i} failed"),
                3 => panic!("subscriber {i} panicked"),
                _ => Ok(()),
            }
        }));
    }

    let delivered = bus.publish("canvas:update", json!({ "id": "node-1" }));
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(delivered, 3);

    assert_eq!(bus.publish("canvas:update", json!({})), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 10);
}

// ============================================================================
// Admission
// ============================================================================

#[tokio::test]
async fn test_queued_plays_admitted_by_priority() {
    let conductor = Arc::new(Conductor::new(
        ConductorConfig::new().with_queue_mode(QueueMode::Sequential),
    ));
    let order = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&order);
    conductor
        .mount(
            MusicalSequence::new("gate", "Gate").with_movement(
                Movement::new("main", "Main")
                    .with_beat(Beat::new(1, "gate:open", "open").with_timing(Timing::Synchronized)),
            ),
            HandlerMap::new().with_fn("open", |_, _| Ok(None)),
            "QueuePlugin",
        )
        .unwrap();
    conductor
        .mount(
            MusicalSequence::new("work", "Work").with_movement(
                Movement::new("main", "Main").with_beat(Beat::new(1, "work:done", "work")),
            ),
            HandlerMap::new().with_fn("work", move |data, _| {
                log.lock()
                    .unwrap()
                    .push(data["label"].as_str().unwrap_or_default().to_string());
                Ok(None)
            }),
            "QueuePlugin",
        )
        .unwrap();
    let client = conductor.client();

    let gate = {
        let client = client.clone();
        tokio::spawn(async move { client.play_default("QueuePlugin", "gate").await })
    };
    while client.active_plays().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut plays = Vec::new();
    let queued = [
        ("normal-1", SequencePriority::Normal),
        ("chained", SequencePriority::Chained),
        ("high", SequencePriority::High),
        ("normal-2", SequencePriority::Normal),
    ];
    for (i, (label, priority)) in queued.into_iter().enumerate() {
        let player = client.clone();
        plays.push(tokio::spawn(async move {
            player
                .play("QueuePlugin", "work", json!({ "label": label }), priority)
                .await
        }));
        wait_for_queued(&client, i + 1).await;
    }

    client.signal("gate:open", json!({}));
    gate.await.unwrap().unwrap();
    for play in plays {
        play.await.unwrap().unwrap();
    }

    assert_eq!(
        *order.lock().unwrap(),
        vec!["high", "normal-1", "normal-2", "chained"]
    );
    assert_eq!(client.get_status().queued_plays, 0);
}

// ============================================================================
// Plugin Bootstrap
// ============================================================================

struct BrokenPlugin;

impl Plugin for BrokenPlugin {
    fn register(&self, _registrar: &mut PluginRegistrar<'_>) -> conductor_core::Result<()> {
        Err(Error::PluginLoad {
            plugin_id: "BrokenPlugin".to_string(),
            message: "missing asset bundle".to_string(),
        })
    }
}

struct LibraryPlugin;

impl Plugin for LibraryPlugin {
    fn register(&self, registrar: &mut PluginRegistrar<'_>) -> conductor_core::Result<()> {
        for id in ["library-load", "library-refresh"] {
            registrar.mount(
                MusicalSequence::new(id, id).with_movement(
                    Movement::new("main", "Main")
                        .with_beat(Beat::new(1, format!("{id}:done"), "load")),
                ),
                HandlerMap::new().with_fn("load", |_, _| Ok(Some(json!({ "items": 3 })))),
            )?;
        }
        Ok(())
    }
}

const MANIFEST: &str = r#"{
    "version": "1",
    "plugins": [
        {
            "id": "LibraryPlugin",
            "ui": { "slot": "library", "module": "library", "export": "LibraryPanel" },
            "runtime": { "module": "library", "export": "register" }
        },
        {
            "id": "HeaderPlugin",
            "ui": { "slot": "header", "module": "header", "export": "Header" }
        },
        {
            "id": "MissingPlugin",
            "runtime": { "module": "does-not-exist" }
        },
        {
            "id": "BrokenPlugin",
            "runtime": { "module": "broken" }
        }
    ]
}"#;

fn catalog() -> PluginCatalog {
    PluginCatalog::new()
        .with("library", "register", Arc::new(LibraryPlugin))
        .with("broken", "register", Arc::new(BrokenPlugin))
}

#[tokio::test]
async fn test_manifest_bootstrap_reports_each_plugin() {
    let client = Conductor::new(ConductorConfig::default()).into_client();
    let manifest = PluginManifest::from_json(MANIFEST).unwrap();

    let report = client.register_cia_plugins(&manifest, &catalog());

    assert!(!report.is_clean());
    assert_eq!(report.registered.len(), 1);
    assert_eq!(report.registered[0].plugin_id, "LibraryPlugin");
    assert_eq!(
        report.registered[0].sequence_ids,
        vec!["library-load".to_string(), "library-refresh".to_string()]
    );
    assert_eq!(report.skipped, vec!["HeaderPlugin".to_string()]);
    let failed: Vec<&str> = report.failed.iter().map(|f| f.plugin_id.as_str()).collect();
    assert_eq!(failed, vec!["MissingPlugin", "BrokenPlugin"]);
    assert!(report.failed[1].reason.contains("missing asset bundle"));

    assert_eq!(client.get_mounted_plugin_ids(), vec!["LibraryPlugin".to_string()]);
    let result = client.play_default("LibraryPlugin", "library-load").await.unwrap();
    assert_eq!(result.payload["items"], 3);
}

#[tokio::test]
async fn test_bootstrap_twice_does_not_duplicate_mounts() {
    let client = Conductor::new(ConductorConfig::default()).into_client();
    let manifest = PluginManifest::from_json(MANIFEST).unwrap();

    client.register_cia_plugins(&manifest, &catalog());
    let second = client.register_cia_plugins(&manifest, &catalog());

    assert_eq!(second.registered.len(), 1);
    assert_eq!(client.get_mounted_plugin_ids(), vec!["LibraryPlugin".to_string()]);
    assert_eq!(client.get_sequence_names().len(), 2);
    assert_eq!(client.get_mounted_plugins()[0].mount_count, 4);
}

#[test]
fn test_manifest_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plugin-manifest.json");
    std::fs::write(&path, MANIFEST).unwrap();

    let manifest = PluginManifest::from_file(&path).unwrap();
    assert_eq!(manifest.plugins.len(), 4);
    assert_eq!(manifest.runtime_plugins().count(), 3);
    assert_eq!(
        manifest.plugins[2].runtime.as_ref().unwrap().export,
        "register"
    );

    let missing = PluginManifest::from_file(dir.path().join("absent.json"));
    assert!(missing.is_err());
}

// ============================================================================
// Client Snapshots
// ============================================================================

#[tokio::test]
async fn test_statistics_and_status_snapshots() {
    let client = Conductor::new(ConductorConfig::default()).into_client();
    client.register_cia_plugins(&PluginManifest::from_json(MANIFEST).unwrap(), &catalog());

    for _ in 0..3 {
        client.play_default("LibraryPlugin", "library-load").await.unwrap();
    }
    client.play_default("LibraryPlugin", "library-refresh").await.unwrap();

    let stats = client.get_statistics();
    assert_eq!(stats.play_count, 4);
    assert_eq!(stats.completed, 4);
    assert_eq!(stats.beats_executed, 4);
    assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);
    assert_eq!(stats.mounted_plugin_count, 1);
    assert_eq!(stats.registered_sequence_count, 2);
    assert_eq!(stats.sequences["library-load"].plays, 3);
    assert!(stats.last_play_at.is_some());

    let status = client.get_status();
    assert_eq!(status.state, "idle");
    assert!(status.active_plays.is_empty());
    assert_eq!(
        status.sequence_ids,
        vec!["library-load".to_string(), "library-refresh".to_string()]
    );

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["playCount"], 4);
}
