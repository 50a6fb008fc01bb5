//! Conductor types
//!
//! Contains the records a play produces and the snapshots the conductor
//! hands out:
//! - `PlayStatus`, `PlayResult`, `BeatRecord` for play outcomes
//! - `ActivePlay` and `ConductorStatus` for introspection

use crate::sequence::{SequencePriority, Timing};
use crate::stats::ConductorStatistics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Final status of a play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlayStatus {
    /// Every beat completed
    Completed,
    /// The play failed
    Failed,
    /// Some beats failed under continue-and-report
    PartiallyFailed,
    /// The play was cancelled
    Cancelled,
}

impl PlayStatus {
    /// Returns the string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::PartiallyFailed => "partially-failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PlayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one beat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeatStatus {
    /// Handler returned successfully
    Completed,
    /// Handler, timing or resolution failed
    Failed,
}

/// Record of one beat within a play
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatRecord {
    /// Movement id
    pub movement: String,
    /// Beat number
    pub beat: u32,
    /// Event declared by the beat
    pub event: String,
    /// Handler declared by the beat
    pub handler: String,
    /// Timing the beat ran with
    pub timing: Timing,
    /// Outcome
    pub status: BeatStatus,
    /// Time spent on the beat (waits included) in milliseconds
    pub duration_ms: u64,
    /// Structured error detail when failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Result of a finished play
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayResult {
    /// Play identifier
    pub play_id: Uuid,
    /// Plugin id
    pub plugin_id: String,
    /// Sequence id
    pub sequence_id: String,
    /// Final status
    pub status: PlayStatus,
    /// Final payload: initial context merged with every beat output
    pub payload: Map<String, Value>,
    /// One record per beat that ran, in execution order
    pub beats: Vec<BeatRecord>,
    /// Play duration in milliseconds
    pub duration_ms: u64,
}

impl PlayResult {
    /// Beat numbers that failed
    #[must_use]
    pub fn failed_beats(&self) -> Vec<u32> {
        self.beats
            .iter()
            .filter(|b| b.status == BeatStatus::Failed)
            .map(|b| b.beat)
            .collect()
    }

    /// Whether every beat completed
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == PlayStatus::Completed
    }
}

/// Lifecycle state of an in-flight play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayState {
    /// Waiting for admission
    Queued,
    /// Running beats
    Running,
}

/// Snapshot of an in-flight play
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivePlay {
    /// Play identifier
    pub play_id: Uuid,
    /// Plugin id
    pub plugin_id: String,
    /// Sequence id
    pub sequence_id: String,
    /// Admission priority
    pub priority: SequencePriority,
    /// Queued or running
    pub state: PlayState,
    /// Beat currently running
    pub current_beat: Option<u32>,
    /// Play that started this one from a handler
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Uuid>,
    /// When the play was requested
    pub started_at: DateTime<Utc>,
}

/// Point-in-time view of the conductor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConductorStatus {
    /// `idle` or `busy`
    pub state: String,
    /// Plays in flight, oldest first
    pub active_plays: Vec<ActivePlay>,
    /// Plays waiting for admission
    pub queued_plays: usize,
    /// Mounted plugin ids, sorted
    pub mounted_plugin_ids: Vec<String>,
    /// Registered sequence ids, sorted
    pub sequence_ids: Vec<String>,
    /// Event names with subscribers, sorted
    pub subscribed_events: Vec<String>,
    /// Counters
    pub statistics: ConductorStatistics,
    /// Time since the conductor was created, in milliseconds
    pub uptime_ms: u64,
}
