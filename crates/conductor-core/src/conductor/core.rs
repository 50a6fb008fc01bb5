//! Conductor core struct and builder methods

use crate::client::ConductorClient;
use crate::error::Result;
use crate::event_bus::{names, ConductorEvent, EventBus};
use crate::plugin::{
    register_plugins, BootstrapReport, HandlerMap, MountOutcome, MountTable, MountedPluginInfo,
    PluginCatalog, PluginManifest,
};
use crate::queue::PlayQueue;
use crate::sequence::{MusicalSequence, SequenceRegistry};
use crate::stats::{ConductorStatistics, StatisticsCollector};
use dashmap::DashMap;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::config::ConductorConfig;
use super::context::Adapter;
use super::types::{ActivePlay, ConductorStatus};

/// In-flight play: its snapshot and the token that cancels it
pub(crate) struct ActivePlayEntry {
    pub(crate) info: ActivePlay,
    pub(crate) cancel: CancellationToken,
}

/// The orchestration engine
pub struct Conductor {
    pub(crate) config: ConductorConfig,
    pub(crate) registry: SequenceRegistry,
    pub(crate) mounts: MountTable,
    pub(crate) event_bus: EventBus,
    pub(crate) queue: Arc<PlayQueue>,
    pub(crate) stats: StatisticsCollector,
    pub(crate) adapters: Arc<HashMap<String, Adapter>>,
    /// Active plays: play_id → cancellation token and snapshot
    pub(crate) active_plays: Arc<DashMap<Uuid, ActivePlayEntry>>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) started_at: Instant,
}

impl std::fmt::Debug for Conductor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conductor")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("mounts", &self.mounts)
            .field("active_plays", &self.active_plays.len())
            .finish()
    }
}

impl Default for Conductor {
    fn default() -> Self {
        Self::new(ConductorConfig::default())
    }
}

impl Conductor {
    /// Create a new conductor
    #[must_use]
    pub fn new(config: ConductorConfig) -> Self {
        Self {
            registry: SequenceRegistry::with_policy(config.registry.on_duplicate),
            mounts: MountTable::new(),
            event_bus: EventBus::new(config.events.tap_capacity),
            queue: Arc::new(PlayQueue::new(config.queue.clone())),
            stats: StatisticsCollector::new(),
            adapters: Arc::new(HashMap::new()),
            active_plays: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
            config,
        }
    }

    /// Use a shared event bus instead of a private one
    #[must_use]
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = bus;
        self
    }

    /// Inject an adapter handlers can look up by name
    #[must_use]
    pub fn with_adapter<T: Any + Send + Sync>(
        mut self,
        name: impl Into<String>,
        adapter: Arc<T>,
    ) -> Self {
        Arc::make_mut(&mut self.adapters).insert(name.into(), adapter as Adapter);
        self
    }

    /// Wrap in an `Arc` and hand out the client
    #[must_use]
    pub fn into_client(self) -> ConductorClient {
        ConductorClient::new(Arc::new(self))
    }

    /// Client over this conductor
    #[must_use]
    pub fn client(self: &Arc<Self>) -> ConductorClient {
        ConductorClient::new(Arc::clone(self))
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &ConductorConfig {
        &self.config
    }

    /// Get the event bus
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Get the sequence registry
    #[must_use]
    pub fn registry(&self) -> &SequenceRegistry {
        &self.registry
    }

    /// Register a sequence that no plugin owns
    pub fn register_sequence(&self, sequence: MusicalSequence) -> Result<Arc<MusicalSequence>> {
        self.registry.register(sequence)
    }

    /// Register `sequence` and bind `handlers` under `plugin_id`
    pub fn mount(
        &self,
        sequence: MusicalSequence,
        handlers: HandlerMap,
        plugin_id: &str,
    ) -> Result<MountOutcome> {
        let outcome = self
            .mounts
            .mount(&self.registry, sequence, handlers, plugin_id)?;
        let sequence_ids = self
            .mounts
            .get(plugin_id)
            .map(|m| m.sequence_ids.clone())
            .unwrap_or_default();
        self.emit(ConductorEvent::PluginMounted {
            plugin_id: plugin_id.to_string(),
            sequence_ids,
        });
        Ok(outcome)
    }

    /// Remove a plugin and the sequences it owns. Plays already running keep
    /// the entry they resolved.
    pub fn unmount(&self, plugin_id: &str) -> bool {
        if self.mounts.unmount(&self.registry, plugin_id).is_some() {
            self.emit(ConductorEvent::PluginUnmounted {
                plugin_id: plugin_id.to_string(),
            });
            true
        } else {
            false
        }
    }

    /// Load the runtime plugins a manifest names
    pub fn register_plugins(
        &self,
        manifest: &PluginManifest,
        catalog: &PluginCatalog,
    ) -> BootstrapReport {
        register_plugins(self, manifest, catalog)
    }

    /// Cancel an in-flight play (queued or running).
    ///
    /// Returns `false` when no such play is active.
    pub fn cancel(&self, play_id: Uuid) -> bool {
        if let Some(entry) = self.active_plays.get(&play_id) {
            entry.cancel.cancel();
            info!(play_id = %play_id, "Play cancellation requested");
            true
        } else {
            false
        }
    }

    /// Cancel every in-flight play; later plays run normally
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for entry in self.active_plays.iter() {
            entry.cancel.cancel();
            cancelled += 1;
        }
        info!(cancelled, "Cancelling all plays");
        cancelled
    }

    /// Cancel every in-flight play and refuse new ones
    pub fn shutdown(&self) {
        info!(active = self.active_plays.len(), "Conductor shutting down");
        self.shutdown.cancel();
    }

    /// Whether [`Conductor::shutdown`] was called
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Publish an external signal; releases synchronized beats waiting on
    /// `name`. Returns how many subscribers received it.
    ///
    /// Lifecycle names are refused and deliver to nobody.
    pub fn signal(&self, name: &str, payload: Value) -> usize {
        if names::is_lifecycle(name) {
            warn!(event = %name, "Refusing to publish lifecycle event as a signal");
            return 0;
        }
        self.event_bus.publish(name, payload)
    }

    /// Counters snapshot
    #[must_use]
    pub fn statistics(&self) -> ConductorStatistics {
        self.stats.snapshot(self.mounts.len(), self.registry.len())
    }

    /// Full status snapshot
    #[must_use]
    pub fn status(&self) -> ConductorStatus {
        let active_plays = self.active_plays();
        ConductorStatus {
            state: if active_plays.is_empty() { "idle" } else { "busy" }.to_string(),
            active_plays,
            queued_plays: self.queue.waiting(),
            mounted_plugin_ids: self.mounts.plugin_ids(),
            sequence_ids: self.registry.list(),
            subscribed_events: self.event_bus.event_names(),
            statistics: self.statistics(),
            uptime_ms: u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Registered sequences as `(id, name)`, sorted by id
    #[must_use]
    pub fn sequence_names(&self) -> Vec<(String, String)> {
        self.registry.names()
    }

    /// Mount entry summaries, sorted by plugin id
    #[must_use]
    pub fn mounted_plugins(&self) -> Vec<MountedPluginInfo> {
        self.mounts.list()
    }

    /// Mounted plugin ids, sorted
    #[must_use]
    pub fn mounted_plugin_ids(&self) -> Vec<String> {
        self.mounts.plugin_ids()
    }

    /// In-flight plays, oldest first
    #[must_use]
    pub fn active_plays(&self) -> Vec<ActivePlay> {
        let mut plays: Vec<ActivePlay> = self
            .active_plays
            .iter()
            .map(|entry| entry.info.clone())
            .collect();
        plays.sort_by_key(|p| p.started_at);
        plays
    }
}
