//! Conductor configuration
//!
//! Contains configuration types for the conductor:
//! - `ConductorConfig` with `conductor`, `registry`, `queue` and `events` sections
//! - `ErrorPolicy` for beat failure handling

use crate::error::{Error, Result};
use crate::queue::{QueueConfig, QueueMode};
use crate::sequence::RegistrationPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a play does after a beat fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop at the first failed beat and fail the play (default)
    #[default]
    AbortOnFirstError,
    /// Run every beat and report failures in the result
    ContinueAndReport,
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Beat failure policy
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    /// Default beat timeout in milliseconds (0 = no limit)
    #[serde(default)]
    pub beat_timeout_ms: u64,
    /// How long a synchronized beat waits for its signal (0 = no limit)
    #[serde(default)]
    pub signal_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            error_policy: ErrorPolicy::AbortOnFirstError,
            beat_timeout_ms: 0,
            signal_timeout_ms: 0,
        }
    }
}

impl EngineConfig {
    /// Default beat timeout, `None` when unlimited
    #[must_use]
    pub fn beat_timeout(&self) -> Option<Duration> {
        (self.beat_timeout_ms > 0).then(|| Duration::from_millis(self.beat_timeout_ms))
    }

    /// Signal wait timeout, `None` when unlimited
    #[must_use]
    pub fn signal_timeout(&self) -> Option<Duration> {
        (self.signal_timeout_ms > 0).then(|| Duration::from_millis(self.signal_timeout_ms))
    }
}

/// Registry settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// What registering a different definition under a taken id does
    #[serde(default)]
    pub on_duplicate: RegistrationPolicy,
}

/// Event bus settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Capacity of the broadcast tap
    #[serde(default = "default_tap_capacity")]
    pub tap_capacity: usize,
}

fn default_tap_capacity() -> usize {
    256
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            tap_capacity: default_tap_capacity(),
        }
    }
}

/// Configuration for the conductor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConductorConfig {
    /// Engine settings
    #[serde(default)]
    pub conductor: EngineConfig,
    /// Registry settings
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Play queue settings
    #[serde(default)]
    pub queue: QueueConfig,
    /// Event bus settings
    #[serde(default)]
    pub events: EventsConfig,
}

impl ConductorConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the beat failure policy
    #[must_use]
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.conductor.error_policy = policy;
        self
    }

    /// Set the default beat timeout (0 = no limit)
    #[must_use]
    pub fn with_beat_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.conductor.beat_timeout_ms = timeout_ms;
        self
    }

    /// Set the signal wait timeout (0 = no limit)
    #[must_use]
    pub fn with_signal_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.conductor.signal_timeout_ms = timeout_ms;
        self
    }

    /// Set the duplicate registration policy
    #[must_use]
    pub fn with_registration_policy(mut self, policy: RegistrationPolicy) -> Self {
        self.registry.on_duplicate = policy;
        self
    }

    /// Set the queue mode
    #[must_use]
    pub fn with_queue_mode(mut self, mode: QueueMode) -> Self {
        self.queue.mode = mode;
        self
    }

    /// Set the per-plugin concurrency limit (Concurrent mode)
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.queue.max_concurrent = max;
        self
    }
    /// Reject settings the engine would otherwise have to clamp
    pub fn validate(&self) -> Result<()> {
        if self.queue.mode == QueueMode::Concurrent && self.queue.max_concurrent == 0 {
            return Err(Error::Configuration(
                "queue.max_concurrent must be at least 1 in concurrent mode".to_string(),
            ));
        }
        if self.events.tap_capacity == 0 {
            return Err(Error::Configuration(
                "events.tap_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
