//! Conductor helper methods
//!
//! Contains utility methods for the Conductor:
//! - Event emission
//! - Active play bookkeeping
//! - Payload initialisation and output merging
//! - Timeout wrapping

use crate::error::Error;
use crate::event_bus::ConductorEvent;
use crate::plugin::BeatOutput;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::context::PlayScope;
use super::core::{ActivePlayEntry, Conductor};
use super::types::PlayState;

impl Conductor {
    /// Publish a lifecycle event on the bus.
    pub(crate) fn emit(&self, event: ConductorEvent) {
        self.event_bus.emit(event);
    }

    pub(crate) fn mark_running(&self, play_id: Uuid) {
        if let Some(mut entry) = self.active_plays.get_mut(&play_id) {
            entry.info.state = PlayState::Running;
        }
    }

    pub(crate) fn mark_beat(&self, play_id: Uuid, beat: u32) {
        if let Some(mut entry) = self.active_plays.get_mut(&play_id) {
            entry.info.current_beat = Some(beat);
        }
    }
}

/// Removes a play from the active table however the play ends
pub(crate) struct ActivePlayGuard {
    pub(crate) plays: Arc<DashMap<Uuid, ActivePlayEntry>>,
    pub(crate) play_id: Uuid,
}

impl Drop for ActivePlayGuard {
    fn drop(&mut self) {
        self.plays.remove(&self.play_id);
    }
}

/// Fresh payload for a play; a non-object context is kept under `"context"`
pub(crate) fn initial_payload(context: Value) -> Map<String, Value> {
    match context {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("context".to_string(), other);
            map
        }
    }
}

/// Fold a handler's output into the payload
pub(crate) fn merge_output(payload: &Mutex<Map<String, Value>>, handler: &str, output: &BeatOutput) {
    let mut payload = payload.lock().unwrap_or_else(PoisonError::into_inner);
    match output {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            payload.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Some(other) => {
            payload.insert(handler.to_string(), other.clone());
        }
    }
}

/// Run `future` under an optional limit; `None` means it timed out
pub(crate) async fn bounded<F: Future>(future: F, limit: Option<Duration>) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, future).await.ok(),
        None => Some(future.await),
    }
}

pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn duration_ms(limit: Option<Duration>) -> u64 {
    limit.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

pub(crate) fn cancelled(scope: &PlayScope, beat: Option<u32>) -> Error {
    Error::Cancelled {
        play_id: scope.play_id,
        plugin_id: scope.plugin_id.clone(),
        sequence_id: scope.sequence_id.clone(),
        beat,
    }
}
