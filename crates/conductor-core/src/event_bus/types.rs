use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::conductor::PlayStatus;
use crate::sequence::SequencePriority;

/// Stable event names published by the conductor.
///
/// Subscribers may rely on these literals; they are part of the public contract.
pub mod names {
    /// A play has been admitted and starts its first movement
    pub const SEQUENCE_START: &str = "sequence:start";
    /// A beat is about to run
    pub const BEAT_START: &str = "beat:start";
    /// A synchronized beat is waiting for its external signal
    pub const BEAT_WAITING: &str = "beat:waiting";
    /// A beat finished successfully
    pub const BEAT_COMPLETE: &str = "beat:complete";
    /// A beat failed
    pub const BEAT_ERROR: &str = "beat:error";
    /// A play finished (completed or partially failed under continue-and-report)
    pub const SEQUENCE_COMPLETE: &str = "sequence:complete";
    /// A play failed
    pub const SEQUENCE_FAILED: &str = "sequence:failed";
    /// A play was cancelled
    pub const SEQUENCE_CANCELLED: &str = "sequence:cancelled";
    /// A plugin mount entry was created or replaced
    pub const PLUGIN_MOUNTED: &str = "plugin:mounted";
    /// A plugin mount entry was removed
    pub const PLUGIN_UNMOUNTED: &str = "plugin:unmounted";

    /// Every lifecycle name; only the conductor publishes these
    pub const LIFECYCLE: [&str; 10] = [
        SEQUENCE_START,
        BEAT_START,
        BEAT_WAITING,
        BEAT_COMPLETE,
        BEAT_ERROR,
        SEQUENCE_COMPLETE,
        SEQUENCE_FAILED,
        SEQUENCE_CANCELLED,
        PLUGIN_MOUNTED,
        PLUGIN_UNMOUNTED,
    ];

    /// Whether `name` is reserved for conductor lifecycle events
    #[must_use]
    pub fn is_lifecycle(name: &str) -> bool {
        LIFECYCLE.contains(&name)
    }
}

/// Lifecycle events emitted by the conductor.
///
/// Serialised with the event name as `type` and camelCase fields; the same
/// JSON object is the payload subscribers receive.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ConductorEvent {
    /// Play started
    #[serde(rename = "sequence:start")]
    SequenceStarted {
        /// Play identifier
        play_id: Uuid,
        /// Plugin the sequence plays against
        plugin_id: String,
        /// Sequence id
        sequence_id: String,
        /// Admission priority
        priority: SequencePriority,
    },
    /// Beat started
    #[serde(rename = "beat:start")]
    BeatStarted {
        /// Play identifier
        play_id: Uuid,
        /// Plugin id
        plugin_id: String,
        /// Sequence id
        sequence_id: String,
        /// Movement id
        movement: String,
        /// Beat number
        beat: u32,
        /// Event declared by the beat
        event: String,
        /// Handler declared by the beat
        handler: String,
    },
    /// Synchronized beat waiting for a signal
    #[serde(rename = "beat:waiting")]
    BeatWaiting {
        /// Play identifier
        play_id: Uuid,
        /// Plugin id
        plugin_id: String,
        /// Sequence id
        sequence_id: String,
        /// Beat number
        beat: u32,
        /// Signal name that releases the beat
        signal: String,
    },
    /// Beat completed
    #[serde(rename = "beat:complete")]
    BeatCompleted {
        /// Play identifier
        play_id: Uuid,
        /// Plugin id
        plugin_id: String,
        /// Sequence id
        sequence_id: String,
        /// Beat number
        beat: u32,
        /// Event declared by the beat
        event: String,
        /// Handler name
        handler: String,
        /// Handler duration in milliseconds
        duration_ms: u64,
    },
    /// Beat failed
    #[serde(rename = "beat:error")]
    BeatFailed {
        /// Play identifier
        play_id: Uuid,
        /// Plugin id
        plugin_id: String,
        /// Sequence id
        sequence_id: String,
        /// Beat number
        beat: u32,
        /// Handler name
        handler: String,
        /// Structured error detail
        error: Value,
    },
    /// Play completed
    #[serde(rename = "sequence:complete")]
    SequenceCompleted {
        /// Play identifier
        play_id: Uuid,
        /// Plugin id
        plugin_id: String,
        /// Sequence id
        sequence_id: String,
        /// Final status (completed or partially failed)
        status: PlayStatus,
        /// Number of beats that ran
        beats_executed: usize,
        /// Play duration in milliseconds
        duration_ms: u64,
    },
    /// Play failed
    #[serde(rename = "sequence:failed")]
    SequenceFailed {
        /// Play identifier
        play_id: Uuid,
        /// Plugin id
        plugin_id: String,
        /// Sequence id
        sequence_id: String,
        /// Beat numbers that failed
        failed_beats: Vec<u32>,
        /// Structured detail of the error that failed the play
        error: Value,
        /// Play duration in milliseconds
        duration_ms: u64,
    },
    /// Play cancelled
    #[serde(rename = "sequence:cancelled")]
    SequenceCancelled {
        /// Play identifier
        play_id: Uuid,
        /// Plugin id
        plugin_id: String,
        /// Sequence id
        sequence_id: String,
    },
    /// Plugin mounted or re-mounted
    #[serde(rename = "plugin:mounted")]
    PluginMounted {
        /// Plugin id
        plugin_id: String,
        /// Sequences owned by the mount entry
        sequence_ids: Vec<String>,
    },
    /// Plugin unmounted
    #[serde(rename = "plugin:unmounted")]
    PluginUnmounted {
        /// Plugin id
        plugin_id: String,
    },
}

impl ConductorEvent {
    /// Literal event name this variant is published under.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SequenceStarted { .. } => names::SEQUENCE_START,
            Self::BeatStarted { .. } => names::BEAT_START,
            Self::BeatWaiting { .. } => names::BEAT_WAITING,
            Self::BeatCompleted { .. } => names::BEAT_COMPLETE,
            Self::BeatFailed { .. } => names::BEAT_ERROR,
            Self::SequenceCompleted { .. } => names::SEQUENCE_COMPLETE,
            Self::SequenceFailed { .. } => names::SEQUENCE_FAILED,
            Self::SequenceCancelled { .. } => names::SEQUENCE_CANCELLED,
            Self::PluginMounted { .. } => names::PLUGIN_MOUNTED,
            Self::PluginUnmounted { .. } => names::PLUGIN_UNMOUNTED,
        }
    }

    /// Play id, for events emitted during a play.
    #[must_use]
    pub fn play_id(&self) -> Option<Uuid> {
        match self {
            Self::SequenceStarted { play_id, .. }
            | Self::BeatStarted { play_id, .. }
            | Self::BeatWaiting { play_id, .. }
            | Self::BeatCompleted { play_id, .. }
            | Self::BeatFailed { play_id, .. }
            | Self::SequenceCompleted { play_id, .. }
            | Self::SequenceFailed { play_id, .. }
            | Self::SequenceCancelled { play_id, .. } => Some(*play_id),
            Self::PluginMounted { .. } | Self::PluginUnmounted { .. } => None,
        }
    }

    /// JSON payload handed to subscribers.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        // Serialising a tagged enum of plain fields cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// One publication as seen through [`EventBus::tap`](super::EventBus::tap).
#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    /// Event name
    pub name: String,
    /// Published payload
    pub payload: Value,
}
