//! Error types for conductor-core
//!
//! This module provides the error taxonomy of the orchestration core and
//! user-friendly error formatting for hosts.

use thiserror::Error;
use uuid::Uuid;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed sequence rejected at registration
    #[error("invalid sequence '{sequence_id}': {}", violations.join("; "))]
    Validation {
        /// Id of the rejected sequence (may be empty)
        sequence_id: String,
        /// Every violation found, not just the first
        violations: Vec<String>,
    },

    /// Sequence id already registered and the policy forbids overwriting
    #[error("sequence already registered: {sequence_id}")]
    DuplicateSequence {
        /// Sequence id
        sequence_id: String,
        /// Plugin that currently owns the sequence, if any
        owner: Option<String>,
    },

    /// Requested sequence is not registered
    #[error("sequence not found: {sequence_id}")]
    SequenceNotFound {
        /// Sequence id
        sequence_id: String,
    },

    /// Requested plugin has no mounted handlers
    #[error("plugin not mounted: {plugin_id}")]
    PluginNotMounted {
        /// Plugin id
        plugin_id: String,
    },

    /// Beat handler name did not resolve for the plugin
    #[error("handler '{handler}' not found for plugin '{plugin_id}' (sequence '{sequence_id}', beat {beat})")]
    HandlerNotFound {
        /// Plugin id
        plugin_id: String,
        /// Sequence id
        sequence_id: String,
        /// Beat number
        beat: u32,
        /// Handler name declared by the beat
        handler: String,
    },

    /// Handler returned an error or panicked
    #[error("handler '{handler}' failed for plugin '{plugin_id}' (sequence '{sequence_id}', beat {beat}): {message}")]
    HandlerExecution {
        /// Plugin id
        plugin_id: String,
        /// Sequence id
        sequence_id: String,
        /// Beat number
        beat: u32,
        /// Handler name
        handler: String,
        /// Underlying error with its cause chain
        message: String,
    },

    /// Beat (handler, deferred work or signal wait) exceeded its timeout
    #[error("beat {beat} of sequence '{sequence_id}' timed out after {timeout_ms}ms (plugin '{plugin_id}')")]
    BeatTimeout {
        /// Plugin id
        plugin_id: String,
        /// Sequence id
        sequence_id: String,
        /// Beat number
        beat: u32,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// Play was cancelled before completing
    #[error("play {play_id} of sequence '{sequence_id}' cancelled")]
    Cancelled {
        /// Play id
        play_id: Uuid,
        /// Plugin id
        plugin_id: String,
        /// Sequence id
        sequence_id: String,
        /// Beat that was pending when the cancellation landed
        beat: Option<u32>,
    },

    /// Plugin module could not be resolved or its registration failed
    #[error("failed to load plugin '{plugin_id}': {message}")]
    PluginLoad {
        /// Manifest plugin id
        plugin_id: String,
        /// Detailed message
        message: String,
    },

    /// Plugin manifest is malformed
    #[error("invalid plugin manifest: {0}")]
    Manifest(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error (poisoned lock, closed channel)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable code for the error kind
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::DuplicateSequence { .. } => "DUPLICATE_SEQUENCE",
            Self::SequenceNotFound { .. } => "SEQUENCE_NOT_FOUND",
            Self::PluginNotMounted { .. } => "PLUGIN_NOT_MOUNTED",
            Self::HandlerNotFound { .. } => "HANDLER_NOT_FOUND",
            Self::HandlerExecution { .. } => "HANDLER_EXECUTION_ERROR",
            Self::BeatTimeout { .. } => "BEAT_TIMEOUT",
            Self::Cancelled { .. } => "CANCELLED",
            Self::PluginLoad { .. } => "PLUGIN_LOAD_ERROR",
            Self::Manifest(_) => "MANIFEST_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Beat number the error is attached to, if any
    #[must_use]
    pub fn beat(&self) -> Option<u32> {
        match self {
            Self::HandlerNotFound { beat, .. }
            | Self::HandlerExecution { beat, .. }
            | Self::BeatTimeout { beat, .. } => Some(*beat),
            Self::Cancelled { beat, .. } => *beat,
            _ => None,
        }
    }

    /// Structured JSON detail, used for `beat:error` / `sequence:failed` payloads
    #[must_use]
    pub fn to_detail(&self) -> serde_json::Value {
        let mut detail = serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        let extra = match self {
            Self::HandlerNotFound {
                plugin_id,
                sequence_id,
                beat,
                handler,
            }
            | Self::HandlerExecution {
                plugin_id,
                sequence_id,
                beat,
                handler,
                ..
            } => serde_json::json!({
                "pluginId": plugin_id,
                "sequenceId": sequence_id,
                "beat": beat,
                "handler": handler,
            }),
            Self::BeatTimeout {
                plugin_id,
                sequence_id,
                beat,
                timeout_ms,
            } => serde_json::json!({
                "pluginId": plugin_id,
                "sequenceId": sequence_id,
                "beat": beat,
                "timeoutMs": timeout_ms,
            }),
            Self::Cancelled {
                play_id,
                plugin_id,
                sequence_id,
                beat,
            } => serde_json::json!({
                "playId": play_id,
                "pluginId": plugin_id,
                "sequenceId": sequence_id,
                "beat": beat,
            }),
            _ => serde_json::Value::Null,
        };
        if let (Some(target), serde_json::Value::Object(extra)) = (detail.as_object_mut(), extra) {
            target.extend(extra);
        }
        detail
    }
}

/// Trait for user-friendly error messages
pub trait UserFriendlyError {
    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get a suggestion for how to fix the error
    fn suggestion(&self) -> Option<String>;
}

impl UserFriendlyError for Error {
    fn user_message(&self) -> String {
        match self {
            Error::Validation {
                sequence_id,
                violations,
            } => format!(
                "Sequence '{}' is invalid ({} problem(s)):\n  - {}",
                sequence_id,
                violations.len(),
                violations.join("\n  - ")
            ),
            Error::DuplicateSequence { sequence_id, owner } => match owner {
                Some(owner) => format!(
                    "Sequence '{}' is already registered by plugin '{}'.",
                    sequence_id, owner
                ),
                None => format!("Sequence '{}' is already registered.", sequence_id),
            },
            Error::SequenceNotFound { sequence_id } => {
                format!("No sequence named '{}' is registered.", sequence_id)
            }
            Error::PluginNotMounted { plugin_id } => {
                format!("Plugin '{}' is not mounted.", plugin_id)
            }
            Error::Cancelled { sequence_id, .. } => {
                format!("Sequence '{}' was cancelled.", sequence_id)
            }
            other => other.to_string(),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            Error::Validation { .. } => {
                Some("Fix the listed fields and register the sequence again.".to_string())
            }
            Error::DuplicateSequence { .. } => Some(
                "Use a different sequence id or set registry.on_duplicate = \"replace\".".to_string(),
            ),
            Error::SequenceNotFound { .. } => {
                Some("Run `conductor inspect` to list registered sequences.".to_string())
            }
            Error::PluginNotMounted { .. } => Some(
                "Check the plugin manifest entry and its runtime module/export.".to_string(),
            ),
            Error::HandlerNotFound { handler, .. } => Some(format!(
                "Export a handler named '{}' from the plugin or fix the beat definition.",
                handler
            )),
            Error::BeatTimeout { .. } => Some(
                "Raise conductor.beat_timeout_ms or the beat's timeoutMs.".to_string(),
            ),
            _ => None,
        }
    }
}

/// Format an error for display in the CLI
pub fn format_error_for_cli(error: &Error) -> String {
    let mut output = String::new();

    output.push_str(&error.user_message());
    output.push('\n');

    if let Some(suggestion) = error.suggestion() {
        output.push('\n');
        output.push_str(&suggestion);
        output.push('\n');
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_lists_every_violation() {
        let error = Error::Validation {
            sequence_id: "seq".to_string(),
            violations: vec!["name is empty".to_string(), "no movements".to_string()],
        };

        let msg = error.to_string();
        assert!(msg.contains("name is empty"));
        assert!(msg.contains("no movements"));
        assert!(error.user_message().contains("2 problem(s)"));
    }

    #[test]
    fn test_handler_not_found_detail() {
        let error = Error::HandlerNotFound {
            plugin_id: "Canvas".to_string(),
            sequence_id: "canvas-create".to_string(),
            beat: 3,
            handler: "render".to_string(),
        };

        assert_eq!(error.code(), "HANDLER_NOT_FOUND");
        assert_eq!(error.beat(), Some(3));

        let detail = error.to_detail();
        assert_eq!(detail["pluginId"], "Canvas");
        assert_eq!(detail["sequenceId"], "canvas-create");
        assert_eq!(detail["beat"], 3);
        assert_eq!(detail["handler"], "render");
    }

    #[test]
    fn test_format_error_for_cli() {
        let error = Error::PluginNotMounted {
            plugin_id: "GhostPlugin".to_string(),
        };

        let output = format_error_for_cli(&error);
        assert!(output.contains("GhostPlugin"));
        assert!(output.contains("manifest"));
    }
}
