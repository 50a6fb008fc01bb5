//! Mount table - which plugin owns which sequences and handlers
//!
//! A mount entry is always replaced wholesale (`Arc<PluginMount>` swap), so a
//! play that resolved its entry keeps a consistent view even while the plugin
//! is re-mounted underneath it.

use crate::error::{Error, Result};
use crate::sequence::{Beat, MusicalSequence, Registration, RegistrationPolicy, SequenceRegistry};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use super::handler::{BeatHandler, HandlerMap};

/// Handlers and sequences bound to one plugin id
#[derive(Debug, Clone)]
pub struct PluginMount {
    /// Plugin id
    pub plugin_id: String,
    /// Sequences owned by this plugin, in mount order
    pub sequence_ids: Vec<String>,
    /// Handlers available to those sequences
    pub handlers: HandlerMap,
    /// When the entry was first created
    pub mounted_at: DateTime<Utc>,
    /// How many times the plugin has been (re-)mounted
    pub mount_count: u32,
}

impl PluginMount {
    /// Public summary of this entry
    #[must_use]
    pub fn info(&self) -> MountedPluginInfo {
        MountedPluginInfo {
            plugin_id: self.plugin_id.clone(),
            sequence_ids: self.sequence_ids.clone(),
            handlers: self.handlers.names(),
            mounted_at: self.mounted_at,
            mount_count: self.mount_count,
        }
    }

    /// Handler bound to `beat`, or `HandlerNotFound` naming the beat
    pub fn resolve(&self, sequence_id: &str, beat: &Beat) -> Result<Arc<dyn BeatHandler>> {
        self.handlers
            .get(&beat.handler)
            .ok_or_else(|| Error::HandlerNotFound {
                plugin_id: self.plugin_id.clone(),
                sequence_id: sequence_id.to_string(),
                beat: beat.beat,
                handler: beat.handler.clone(),
            })
    }
}

/// Serializable view of a mount entry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountedPluginInfo {
    /// Plugin id
    pub plugin_id: String,
    /// Owned sequence ids
    pub sequence_ids: Vec<String>,
    /// Handler names, sorted
    pub handlers: Vec<String>,
    /// First mount time
    pub mounted_at: DateTime<Utc>,
    /// Mount count
    pub mount_count: u32,
}

/// What a mount call changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountOutcome {
    /// How the sequence registration went
    pub registration: Registration,
    /// Whether the plugin already had a mount entry
    pub remount: bool,
}

#[derive(Default)]
struct MountState {
    entries: HashMap<String, Arc<PluginMount>>,
    /// sequence id → owning plugin id
    owners: HashMap<String, String>,
}

/// Table of mounted plugins
#[derive(Default)]
pub struct MountTable {
    state: RwLock<MountState>,
}

impl std::fmt::Debug for MountTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountTable")
            .field("plugins", &self.plugin_ids())
            .finish()
    }
}

impl MountTable {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sequence` and bind `handlers` under `plugin_id`.
    ///
    /// Mounting the same definition again is a no-op for the registry and
    /// re-binds the handlers. A changed definition owned by the same plugin
    /// replaces the stored one. A sequence owned by another plugin is
    /// rejected with `DuplicateSequence`.
    pub fn mount(
        &self,
        registry: &SequenceRegistry,
        sequence: MusicalSequence,
        handlers: HandlerMap,
        plugin_id: &str,
    ) -> Result<MountOutcome> {
        let mut state = self
            .state
            .write()
            .map_err(|e| Error::Internal(format!("Lock poisoned: {}", e)))?;

        let sequence_id = sequence.id.clone();
        let registration = match state.owners.get(&sequence_id) {
            Some(owner) if owner != plugin_id => {
                return Err(Error::DuplicateSequence {
                    sequence_id,
                    owner: Some(owner.clone()),
                });
            }
            Some(_) => {
                registry
                    .register_with_policy(sequence, RegistrationPolicy::Replace)?
                    .1
            }
            None => registry.register_with_policy(sequence, registry.policy())?.1,
        };

        let previous = state.entries.get(plugin_id).cloned();
        let remount = previous.is_some();
        let entry = match previous {
            Some(previous) => {
                let mut entry = (*previous).clone();
                entry.handlers.extend(handlers);
                if !entry.sequence_ids.contains(&sequence_id) {
                    entry.sequence_ids.push(sequence_id.clone());
                }
                entry.mount_count += 1;
                entry
            }
            None => PluginMount {
                plugin_id: plugin_id.to_string(),
                sequence_ids: vec![sequence_id.clone()],
                handlers,
                mounted_at: Utc::now(),
                mount_count: 1,
            },
        };

        info!(
            plugin = %plugin_id,
            sequence = %sequence_id,
            handlers = entry.handlers.len(),
            remount,
            "Plugin mounted"
        );
        state
            .owners
            .insert(sequence_id, plugin_id.to_string());
        state
            .entries
            .insert(plugin_id.to_string(), Arc::new(entry));

        Ok(MountOutcome {
            registration,
            remount,
        })
    }

    /// Remove a plugin and deregister the sequences it owns
    pub fn unmount(
        &self,
        registry: &SequenceRegistry,
        plugin_id: &str,
    ) -> Option<Arc<PluginMount>> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let removed = state.entries.remove(plugin_id)?;
        for sequence_id in &removed.sequence_ids {
            state.owners.remove(sequence_id);
            registry.remove(sequence_id);
        }
        debug!(plugin = %plugin_id, sequences = removed.sequence_ids.len(), "Plugin unmounted");
        Some(removed)
    }

    /// Current entry for a plugin
    #[must_use]
    pub fn get(&self, plugin_id: &str) -> Option<Arc<PluginMount>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .get(plugin_id)
            .cloned()
    }

    /// Whether a plugin is mounted
    #[must_use]
    pub fn is_mounted(&self, plugin_id: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .contains_key(plugin_id)
    }

    /// Plugin that owns a sequence
    #[must_use]
    pub fn owner_of(&self, sequence_id: &str) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .owners
            .get(sequence_id)
            .cloned()
    }

    /// Mounted plugin ids, sorted
    #[must_use]
    pub fn plugin_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Summaries of every entry, sorted by plugin id
    #[must_use]
    pub fn list(&self) -> Vec<MountedPluginInfo> {
        let mut infos: Vec<MountedPluginInfo> = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .values()
            .map(|m| m.info())
            .collect();
        infos.sort_by(|a, b| a.plugin_id.cmp(&b.plugin_id));
        infos
    }

    /// Number of mounted plugins
    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Whether nothing is mounted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
