//! ConductorClient - the public surface applications and plugins use
//!
//! The client forwards to a shared [`Conductor`] but exposes no registry or
//! mount-table mutation other than plugin bootstrap, and every read returns
//! an owned snapshot.

use crate::conductor::{ActivePlay, Conductor, ConductorStatus, PlayResult};
use crate::error::Result;
use crate::event_bus::{BusEvent, EventCallback, Subscription};
use crate::plugin::{BootstrapReport, MountedPluginInfo, PluginCatalog, PluginManifest};
use crate::sequence::SequencePriority;
use crate::stats::ConductorStatistics;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Cheap-clone handle over a shared conductor
#[derive(Clone)]
pub struct ConductorClient {
    conductor: Arc<Conductor>,
    /// Play whose handler holds this client
    parent: Option<Uuid>,
}

impl std::fmt::Debug for ConductorClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConductorClient")
            .field("parent", &self.parent)
            .finish()
    }
}

impl ConductorClient {
    /// Create a client over a shared conductor
    #[must_use]
    pub fn new(conductor: Arc<Conductor>) -> Self {
        Self {
            conductor,
            parent: None,
        }
    }

    pub(crate) fn nested(conductor: Arc<Conductor>, parent: Uuid) -> Self {
        Self {
            conductor,
            parent: Some(parent),
        }
    }

    /// Play that started this client's handler, for clients handed to handlers
    #[must_use]
    pub fn parent_play(&self) -> Option<Uuid> {
        self.parent
    }

    /// Play a sequence against a plugin's handlers
    pub async fn play(
        &self,
        plugin_id: &str,
        sequence_id: &str,
        context: Value,
        priority: SequencePriority,
    ) -> Result<PlayResult> {
        self.conductor
            .play_scoped(plugin_id, sequence_id, context, priority, self.parent)
            .await
    }

    /// Play with an empty context at normal priority
    pub async fn play_default(&self, plugin_id: &str, sequence_id: &str) -> Result<PlayResult> {
        self.play(
            plugin_id,
            sequence_id,
            Value::Object(serde_json::Map::new()),
            SequencePriority::Normal,
        )
        .await
    }

    /// Subscribe to an event
    pub fn subscribe<F>(&self, event: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.conductor.event_bus.subscribe(event, callback)
    }

    /// Alias of [`ConductorClient::subscribe`]
    pub fn on<F>(&self, event: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(event, callback)
    }

    /// Subscribe a shared callback that can later be passed to `unsubscribe`
    pub fn subscribe_callback(
        &self,
        event: impl Into<String>,
        callback: EventCallback,
    ) -> Subscription {
        self.conductor.event_bus.subscribe_callback(event, callback)
    }

    /// Remove every registration of `callback` on `event`
    pub fn unsubscribe(&self, event: &str, callback: &EventCallback) -> bool {
        self.conductor.event_bus.unsubscribe(event, callback)
    }

    /// Remove one registration
    pub fn off(&self, subscription: &Subscription) -> bool {
        subscription.unsubscribe()
    }

    /// Follow every publication
    #[must_use]
    pub fn tap(&self) -> broadcast::Receiver<BusEvent> {
        self.conductor.event_bus.tap()
    }

    /// Load the runtime plugins a manifest names
    pub fn register_cia_plugins(
        &self,
        manifest: &PluginManifest,
        catalog: &PluginCatalog,
    ) -> BootstrapReport {
        self.conductor.register_plugins(manifest, catalog)
    }

    /// Cancel an in-flight play
    pub fn cancel(&self, play_id: Uuid) -> bool {
        self.conductor.cancel(play_id)
    }

    /// Publish an external signal for synchronized beats
    pub fn signal(&self, name: &str, payload: Value) -> usize {
        self.conductor.signal(name, payload)
    }

    /// Counters snapshot
    #[must_use]
    pub fn get_statistics(&self) -> ConductorStatistics {
        self.conductor.statistics()
    }

    /// Status snapshot
    #[must_use]
    pub fn get_status(&self) -> ConductorStatus {
        self.conductor.status()
    }

    /// Registered sequences as `(id, name)`
    #[must_use]
    pub fn get_sequence_names(&self) -> Vec<(String, String)> {
        self.conductor.sequence_names()
    }

    /// Mount entry summaries
    #[must_use]
    pub fn get_mounted_plugins(&self) -> Vec<MountedPluginInfo> {
        self.conductor.mounted_plugins()
    }

    /// Mounted plugin ids, sorted and unique
    #[must_use]
    pub fn get_mounted_plugin_ids(&self) -> Vec<String> {
        self.conductor.mounted_plugin_ids()
    }

    /// In-flight plays
    #[must_use]
    pub fn active_plays(&self) -> Vec<ActivePlay> {
        self.conductor.active_plays()
    }
}
