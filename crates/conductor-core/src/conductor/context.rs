//! Beat context - what a handler sees of the play it runs in

use crate::client::ConductorClient;
use crate::sequence::Beat;
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Host-provided I/O adapter, looked up by name and downcast by type
pub type Adapter = Arc<dyn Any + Send + Sync>;

/// Work a handler scheduled to finish after it returned
pub(crate) struct DeferredWork {
    pub(crate) beat: u32,
    pub(crate) handler: String,
    pub(crate) handle: JoinHandle<anyhow::Result<()>>,
}

/// State shared by every beat of one play
pub(crate) struct PlayScope {
    pub(crate) play_id: Uuid,
    pub(crate) plugin_id: String,
    pub(crate) sequence_id: String,
    pub(crate) payload: Mutex<Map<String, Value>>,
    pub(crate) deferred: Mutex<Vec<DeferredWork>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) client: ConductorClient,
    pub(crate) adapters: Arc<HashMap<String, Adapter>>,
}

impl PlayScope {
    pub(crate) fn payload_snapshot(&self) -> Map<String, Value> {
        self.payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn take_deferred(&self) -> Vec<DeferredWork> {
        std::mem::take(&mut *self.deferred.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn abort_deferred(&self) {
        for work in self.take_deferred() {
            work.handle.abort();
        }
    }
}

/// Per-beat view handed to a [`BeatHandler`](crate::plugin::BeatHandler).
///
/// Cheap to clone; clones share the live payload of the play.
#[derive(Clone)]
pub struct BeatContext {
    scope: Arc<PlayScope>,
    movement: String,
    beat: Beat,
    signal: Option<Value>,
    span: tracing::Span,
}

impl std::fmt::Debug for BeatContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeatContext")
            .field("play_id", &self.scope.play_id)
            .field("plugin_id", &self.scope.plugin_id)
            .field("sequence_id", &self.scope.sequence_id)
            .field("movement", &self.movement)
            .field("beat", &self.beat.beat)
            .finish()
    }
}

impl BeatContext {
    pub(crate) fn new(
        scope: Arc<PlayScope>,
        movement: &str,
        beat: &Beat,
        signal: Option<Value>,
        span: tracing::Span,
    ) -> Self {
        Self {
            scope,
            movement: movement.to_string(),
            beat: beat.clone(),
            signal,
            span,
        }
    }

    /// Play identifier
    #[must_use]
    pub fn play_id(&self) -> Uuid {
        self.scope.play_id
    }

    /// Plugin the play runs against
    #[must_use]
    pub fn plugin_id(&self) -> &str {
        &self.scope.plugin_id
    }

    /// Sequence being played
    #[must_use]
    pub fn sequence_id(&self) -> &str {
        &self.scope.sequence_id
    }

    /// Movement id
    #[must_use]
    pub fn movement(&self) -> &str {
        &self.movement
    }

    /// Beat definition
    #[must_use]
    pub fn beat(&self) -> &Beat {
        &self.beat
    }

    /// Signal payload that released a synchronized beat
    #[must_use]
    pub fn signal(&self) -> Option<&Value> {
        self.signal.as_ref()
    }

    /// Copy of the live payload
    #[must_use]
    pub fn payload(&self) -> Map<String, Value> {
        self.scope.payload_snapshot()
    }

    /// Read one payload key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.scope
            .payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Write one payload key; later beats see it
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.scope
            .payload
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
    }

    /// Client for nested plays; they run inside this play's admission slot
    /// and are cancelled with it.
    #[must_use]
    pub fn conductor(&self) -> &ConductorClient {
        &self.scope.client
    }

    /// Injected adapter by name, if present and of type `T`
    #[must_use]
    pub fn adapter<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.scope
            .adapters
            .get(name)
            .cloned()
            .and_then(|adapter| adapter.downcast::<T>().ok())
    }

    /// Schedule work that keeps running after the handler returns.
    ///
    /// The next `after-beat` beat, or the end of the play, waits for it. A
    /// failure is reported against this beat.
    pub fn defer<F>(&self, work: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(work.instrument(self.span.clone()));
        self.scope
            .deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(DeferredWork {
                beat: self.beat.beat,
                handler: self.beat.handler.clone(),
                handle,
            });
    }

    /// Token cancelled when the play is cancelled
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.scope.cancel.clone()
    }

    /// Whether the play has been cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.scope.cancel.is_cancelled()
    }

    /// Span the beat runs in; events logged inside it carry the play,
    /// sequence and beat fields
    #[must_use]
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}
