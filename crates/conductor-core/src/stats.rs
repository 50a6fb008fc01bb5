//! Statistics - play and beat counters, read out as snapshots

use crate::conductor::PlayStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Counters for a single sequence
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceStats {
    /// Plays that ran to an outcome
    pub plays: u64,
    /// Plays that ended failed or partially failed
    pub failures: u64,
    /// Sum of play durations in milliseconds
    pub total_duration_ms: u64,
    /// Duration of the most recent play
    pub last_duration_ms: u64,
}

impl SequenceStats {
    /// Mean play duration in milliseconds
    #[must_use]
    pub fn average_duration_ms(&self) -> f64 {
        if self.plays == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.plays as f64
        }
    }
}

/// Point-in-time copy of the conductor's counters
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConductorStatistics {
    /// Plays admitted (unknown sequences and unmounted plugins never count)
    pub play_count: u64,
    /// Plays that completed
    pub completed: u64,
    /// Plays that failed
    pub failed: u64,
    /// Plays that completed with failed beats under continue-and-report
    pub partially_failed: u64,
    /// Plays that were cancelled
    pub cancelled: u64,
    /// Beats that ran to an outcome
    pub beats_executed: u64,
    /// Beats that failed
    pub beats_failed: u64,
    /// Mean duration over finished plays
    pub average_play_duration_ms: f64,
    /// Completed plays over finished plays (1.0 when none finished)
    pub success_rate: f64,
    /// Mounted plugin count
    pub mounted_plugin_count: usize,
    /// Registered sequence count
    pub registered_sequence_count: usize,
    /// Per-sequence counters, keyed by sequence id
    pub sequences: BTreeMap<String, SequenceStats>,
    /// When the most recent play finished
    pub last_play_at: Option<DateTime<Utc>>,
}

/// Aggregated statistics (in-process only)
#[derive(Debug, Default)]
pub struct StatisticsCollector {
    plays_started: AtomicU64,
    plays_completed: AtomicU64,
    plays_failed: AtomicU64,
    plays_partially_failed: AtomicU64,
    plays_cancelled: AtomicU64,
    beats_executed: AtomicU64,
    beats_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    sequences: Mutex<HashMap<String, SequenceStats>>,
    last_play_at: Mutex<Option<DateTime<Utc>>>,
}

impl StatisticsCollector {
    /// Create zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A play passed admission
    pub fn record_play_started(&self) {
        self.plays_started.fetch_add(1, Ordering::Relaxed);
    }

    /// A beat ran to an outcome
    pub fn record_beat(&self, success: bool) {
        self.beats_executed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.beats_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A beat already counted as executed failed through its deferred work
    pub fn record_late_beat_failure(&self) {
        self.beats_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A play reached its final status
    pub fn record_play_finished(&self, sequence_id: &str, status: PlayStatus, duration_ms: u64) {
        let counter = match status {
            PlayStatus::Completed => &self.plays_completed,
            PlayStatus::Failed => &self.plays_failed,
            PlayStatus::PartiallyFailed => &self.plays_partially_failed,
            PlayStatus::Cancelled => &self.plays_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_duration_ms
            .fetch_add(duration_ms, Ordering::Relaxed);

        {
            let mut sequences = self.sequences.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = sequences.entry(sequence_id.to_string()).or_default();
            entry.plays += 1;
            if matches!(status, PlayStatus::Failed | PlayStatus::PartiallyFailed) {
                entry.failures += 1;
            }
            entry.total_duration_ms += duration_ms;
            entry.last_duration_ms = duration_ms;
        }

        *self
            .last_play_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    /// Plays that passed admission
    #[must_use]
    pub fn play_count(&self) -> u64 {
        self.plays_started.load(Ordering::Relaxed)
    }

    /// Get play success rate (0.0 to 1.0)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let finished = self.finished();
        let completed = self.plays_completed.load(Ordering::Relaxed);

        if finished == 0 {
            1.0
        } else {
            completed as f64 / finished as f64
        }
    }

    fn finished(&self) -> u64 {
        self.plays_completed.load(Ordering::Relaxed)
            + self.plays_failed.load(Ordering::Relaxed)
            + self.plays_partially_failed.load(Ordering::Relaxed)
            + self.plays_cancelled.load(Ordering::Relaxed)
    }

    /// Copy the counters out
    #[must_use]
    pub fn snapshot(
        &self,
        mounted_plugin_count: usize,
        registered_sequence_count: usize,
    ) -> ConductorStatistics {
        let finished = self.finished();
        let total = self.total_duration_ms.load(Ordering::Relaxed);
        let sequences = self
            .sequences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, stats)| (id.clone(), stats.clone()))
            .collect();

        ConductorStatistics {
            play_count: self.play_count(),
            completed: self.plays_completed.load(Ordering::Relaxed),
            failed: self.plays_failed.load(Ordering::Relaxed),
            partially_failed: self.plays_partially_failed.load(Ordering::Relaxed),
            cancelled: self.plays_cancelled.load(Ordering::Relaxed),
            beats_executed: self.beats_executed.load(Ordering::Relaxed),
            beats_failed: self.beats_failed.load(Ordering::Relaxed),
            average_play_duration_ms: if finished == 0 {
                0.0
            } else {
                total as f64 / finished as f64
            },
            success_rate: self.success_rate(),
            mounted_plugin_count,
            registered_sequence_count,
            sequences,
            last_play_at: *self
                .last_play_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let stats = StatisticsCollector::new();
        let snapshot = stats.snapshot(0, 0);

        assert_eq!(snapshot.play_count, 0);
        assert_eq!(snapshot.success_rate, 1.0);
        assert!(snapshot.last_play_at.is_none());
    }

    #[test]
    fn test_per_sequence_counters() {
        let stats = StatisticsCollector::new();
        stats.record_play_started();
        stats.record_beat(true);
        stats.record_play_finished("seq", PlayStatus::Completed, 10);
        stats.record_play_started();
        stats.record_beat(false);
        stats.record_play_finished("seq", PlayStatus::Failed, 30);

        let snapshot = stats.snapshot(1, 1);
        assert_eq!(snapshot.play_count, 2);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.beats_executed, 2);
        assert_eq!(snapshot.beats_failed, 1);
        assert_eq!(snapshot.success_rate, 0.5);
        assert_eq!(snapshot.average_play_duration_ms, 20.0);

        let seq = &snapshot.sequences["seq"];
        assert_eq!(seq.plays, 2);
        assert_eq!(seq.failures, 1);
        assert_eq!(seq.last_duration_ms, 30);
        assert_eq!(seq.average_duration_ms(), 20.0);
    }

    #[test]
    fn test_late_failure_is_not_a_second_beat() {
        let stats = StatisticsCollector::new();
        stats.record_beat(true);
        stats.record_late_beat_failure();

        let snapshot = stats.snapshot(0, 0);
        assert_eq!(snapshot.beats_executed, 1);
        assert_eq!(snapshot.beats_failed, 1);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let stats = StatisticsCollector::new();
        let json = serde_json::to_value(stats.snapshot(2, 3)).unwrap();
        assert_eq!(json["mountedPluginCount"], 2);
        assert_eq!(json["playCount"], 0);
    }
}
