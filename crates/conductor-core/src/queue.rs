//! Play Queue
//!
//! Admission control for plays that target the same plugin:
//! - Sequential: one play per plugin at a time, the rest wait
//! - Concurrent: up to `max_concurrent` plays per plugin
//!
//! Waiting plays are admitted by priority class (high, normal, chained) and
//! first-come-first-served within a class. Plays on different plugins never
//! wait on each other.

use crate::error::{Error, Result};
use crate::sequence::SequencePriority;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::debug;

/// Queue mode for plays on one plugin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    /// One play per plugin at a time (default)
    #[default]
    Sequential,
    /// Up to `max_concurrent` plays per plugin
    Concurrent,
}

/// Configuration for the play queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue mode
    #[serde(default)]
    pub mode: QueueMode,
    /// Maximum concurrent plays per plugin (for Concurrent mode)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            mode: QueueMode::Sequential,
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl QueueConfig {
    /// Plays admitted at once per plugin
    #[must_use]
    pub fn capacity(&self) -> usize {
        match self.mode {
            QueueMode::Sequential => 1,
            QueueMode::Concurrent => self.max_concurrent.max(1),
        }
    }
}

struct Waiter {
    rank: u8,
    seq: u64,
    tx: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // BinaryHeap pops the maximum, so lower (rank, seq) must compare greater.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Lane {
    active: usize,
    waiting: BinaryHeap<Waiter>,
}

#[derive(Default)]
struct QueueState {
    lanes: HashMap<String, Lane>,
    next_seq: u64,
}

/// Per-plugin admission queue
pub struct PlayQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
}

impl std::fmt::Debug for PlayQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayQueue")
            .field("config", &self.config)
            .field("waiting", &self.waiting())
            .finish()
    }
}

impl PlayQueue {
    /// Create a new play queue.
    #[must_use]
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Get the current queue mode.
    #[must_use]
    pub fn mode(&self) -> QueueMode {
        self.config.mode
    }

    /// Get the configured per-plugin capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config.capacity()
    }

    /// Wait for a slot on `plugin_id`'s lane.
    ///
    /// Dropping the returned future before it resolves gives up the place in
    /// line without leaking a slot.
    pub async fn acquire(
        self: &Arc<Self>,
        plugin_id: &str,
        priority: SequencePriority,
    ) -> Result<PlayPermit> {
        let (seq, rx) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let capacity = self.config.capacity();
            let seq = state.next_seq;
            state.next_seq += 1;

            let lane = state.lanes.entry(plugin_id.to_string()).or_default();
            if lane.active < capacity && lane.waiting.is_empty() {
                lane.active += 1;
                debug!(plugin = %plugin_id, active = lane.active, "Play admitted");
                return Ok(self.permit(plugin_id));
            }

            let (tx, rx) = oneshot::channel();
            lane.waiting.push(Waiter {
                rank: priority.rank(),
                seq,
                tx,
            });
            debug!(
                plugin = %plugin_id,
                priority = %priority,
                waiting = lane.waiting.len(),
                "Play queued"
            );
            (seq, rx)
        };

        let mut pending = PendingAdmission {
            queue: Arc::clone(self),
            plugin_id: plugin_id.to_string(),
            seq,
            rx: Some(rx),
        };
        let admitted = match pending.rx.as_mut() {
            Some(rx) => rx.await.is_ok(),
            None => false,
        };
        pending.rx = None;

        if admitted {
            debug!(plugin = %plugin_id, "Queued play admitted");
            Ok(self.permit(plugin_id))
        } else {
            Err(Error::Internal("play queue dropped a waiter".to_string()))
        }
    }

    fn permit(self: &Arc<Self>, plugin_id: &str) -> PlayPermit {
        PlayPermit {
            queue: Arc::clone(self),
            plugin_id: plugin_id.to_string(),
        }
    }

    /// Hand the slot to the next live waiter, or free it.
    fn release(&self, plugin_id: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(lane) = state.lanes.get_mut(plugin_id) else {
            return;
        };
        while let Some(waiter) = lane.waiting.pop() {
            if waiter.tx.send(()).is_ok() {
                return;
            }
        }
        lane.active = lane.active.saturating_sub(1);
        if lane.active == 0 {
            state.lanes.remove(plugin_id);
        }
    }

    /// Take a waiter out of line. Returns false once it was already popped.
    fn withdraw(&self, plugin_id: &str, seq: u64) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(lane) = state.lanes.get_mut(plugin_id) else {
            return false;
        };
        let before = lane.waiting.len();
        lane.waiting.retain(|w| w.seq != seq);
        lane.waiting.len() < before
    }

    /// Plays currently admitted on a plugin's lane
    #[must_use]
    pub fn active(&self, plugin_id: &str) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lanes
            .get(plugin_id)
            .map_or(0, |lane| lane.active)
    }

    /// Plays waiting for admission, across all plugins
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lanes
            .values()
            .map(|lane| lane.waiting.len())
            .sum()
    }

    /// Plays waiting for admission on one plugin
    #[must_use]
    pub fn waiting_for(&self, plugin_id: &str) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lanes
            .get(plugin_id)
            .map_or(0, |lane| lane.waiting.len())
    }
}

/// Place in line that is still waiting; returns a slot it was handed after
/// its owner stopped listening.
struct PendingAdmission {
    queue: Arc<PlayQueue>,
    plugin_id: String,
    seq: u64,
    rx: Option<oneshot::Receiver<()>>,
}

impl Drop for PendingAdmission {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            if self.queue.withdraw(&self.plugin_id, self.seq) {
                return;
            }
            rx.close();
            if rx.try_recv().is_ok() {
                self.queue.release(&self.plugin_id);
            }
        }
    }
}

/// A permit that releases the plugin slot when dropped.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct PlayPermit {
    queue: Arc<PlayQueue>,
    plugin_id: String,
}

impl PlayPermit {
    /// Plugin lane this permit belongs to
    #[must_use]
    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }
}

impl std::fmt::Debug for PlayPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayPermit")
            .field("plugin_id", &self.plugin_id)
            .finish()
    }
}

impl Drop for PlayPermit {
    fn drop(&mut self) {
        self.queue.release(&self.plugin_id);
    }
}
