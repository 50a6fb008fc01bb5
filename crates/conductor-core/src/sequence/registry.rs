//! Registry - Sequence validation and storage
//!
//! Sequences are validated in full before anything is stored, and stored as
//! `Arc<MusicalSequence>` so a reader always sees either the previous or the
//! new definition, never a partially written one.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use super::types::MusicalSequence;

/// What `register` does when the sequence id is already taken by a
/// different definition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationPolicy {
    /// Fail with `DuplicateSequence` (default)
    #[default]
    Reject,
    /// Swap the stored definition
    Replace,
}

/// Outcome of a successful registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// New id stored
    Inserted,
    /// Identical definition already stored; nothing changed
    Unchanged,
    /// Existing definition swapped
    Replaced,
}

/// Validate a sequence, returning every violation found.
#[must_use]
pub fn validate_sequence(sequence: &MusicalSequence) -> Vec<String> {
    let mut violations = Vec::new();

    if sequence.id.trim().is_empty() {
        violations.push("id must not be empty".to_string());
    }
    if sequence.name.trim().is_empty() {
        violations.push("name must not be empty".to_string());
    }
    if !(sequence.tempo.is_finite() && sequence.tempo > 0.0) {
        violations.push(format!("tempo must be positive (got {})", sequence.tempo));
    }
    if sequence.movements.is_empty() {
        violations.push("at least one movement is required".to_string());
    }

    let mut movement_ids = HashSet::new();
    for (m_idx, movement) in sequence.movements.iter().enumerate() {
        let m_label = if movement.id.is_empty() {
            format!("movements[{m_idx}]")
        } else {
            format!("movement '{}'", movement.id)
        };
        if movement.id.trim().is_empty() {
            violations.push(format!("{m_label}: id must not be empty"));
        } else if !movement_ids.insert(movement.id.as_str()) {
            violations.push(format!("{m_label}: duplicate movement id"));
        }
        if movement.beats.is_empty() {
            violations.push(format!("{m_label}: at least one beat is required"));
        }

        let mut beat_numbers = HashSet::new();
        for (b_idx, beat) in movement.beats.iter().enumerate() {
            let b_label = format!("{m_label} beats[{b_idx}]");
            if beat.beat == 0 {
                violations.push(format!("{b_label}: beat number must be >= 1"));
            } else if !beat_numbers.insert(beat.beat) {
                violations.push(format!("{b_label}: duplicate beat number {}", beat.beat));
            }
            if beat.event.trim().is_empty() {
                violations.push(format!("{b_label}: event must not be empty"));
            }
            if beat.handler.trim().is_empty() {
                violations.push(format!("{b_label}: handler must not be empty"));
            }
            if beat.timeout_ms == Some(0) {
                violations.push(format!("{b_label}: timeoutMs must be greater than 0"));
            }
        }
    }

    violations
}

/// Validate and normalise a sequence (beats sorted ascending per movement).
pub fn validated(mut sequence: MusicalSequence) -> Result<MusicalSequence> {
    let violations = validate_sequence(&sequence);
    if !violations.is_empty() {
        return Err(Error::Validation {
            sequence_id: sequence.id,
            violations,
        });
    }
    for movement in &mut sequence.movements {
        movement.beats.sort_by_key(|b| b.beat);
    }
    Ok(sequence)
}

/// Parse a JSON sequence descriptor and validate it.
pub fn parse_sequence_json(json: &str) -> Result<MusicalSequence> {
    let sequence: MusicalSequence = serde_json::from_str(json)?;
    validated(sequence)
}

/// Registry of validated sequences
#[derive(Debug, Default)]
pub struct SequenceRegistry {
    sequences: RwLock<HashMap<String, Arc<MusicalSequence>>>,
    policy: RegistrationPolicy,
}

impl SequenceRegistry {
    /// Create an empty registry with the default (reject) policy
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry with the given duplicate policy
    #[must_use]
    pub fn with_policy(policy: RegistrationPolicy) -> Self {
        Self {
            sequences: RwLock::new(HashMap::new()),
            policy,
        }
    }

    /// Configured duplicate policy
    #[must_use]
    pub fn policy(&self) -> RegistrationPolicy {
        self.policy
    }

    /// Validate and store a sequence under the configured policy
    pub fn register(&self, sequence: MusicalSequence) -> Result<Arc<MusicalSequence>> {
        self.register_with_policy(sequence, self.policy)
            .map(|(stored, _)| stored)
    }

    /// Validate and store a sequence under an explicit policy
    pub fn register_with_policy(
        &self,
        sequence: MusicalSequence,
        policy: RegistrationPolicy,
    ) -> Result<(Arc<MusicalSequence>, Registration)> {
        let sequence = validated(sequence)?;
        let mut sequences = self
            .sequences
            .write()
            .map_err(|e| Error::Internal(format!("Lock poisoned: {}", e)))?;

        let outcome = match sequences.get(&sequence.id) {
            Some(existing) if **existing == sequence => {
                debug!(sequence = %sequence.id, "Identical sequence already registered");
                return Ok((Arc::clone(existing), Registration::Unchanged));
            }
            Some(_) if policy == RegistrationPolicy::Reject => {
                return Err(Error::DuplicateSequence {
                    sequence_id: sequence.id,
                    owner: None,
                });
            }
            Some(_) => Registration::Replaced,
            None => Registration::Inserted,
        };

        let stored = Arc::new(sequence);
        sequences.insert(stored.id.clone(), Arc::clone(&stored));
        info!(
            sequence = %stored.id,
            beats = stored.beat_count(),
            replaced = outcome == Registration::Replaced,
            "Sequence registered"
        );
        Ok((stored, outcome))
    }

    /// Get a sequence by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<MusicalSequence>> {
        self.sequences
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Check if a sequence exists
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.sequences
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Remove a sequence
    pub fn remove(&self, id: &str) -> Option<Arc<MusicalSequence>> {
        let removed = self
            .sequences
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if removed.is_some() {
            debug!(sequence = %id, "Sequence removed");
        }
        removed
    }

    /// All registered sequence ids, sorted
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sequences
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Sequence id → display name, sorted by id
    #[must_use]
    pub fn names(&self) -> Vec<(String, String)> {
        let mut names: Vec<(String, String)> = self
            .sequences
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|s| (s.id.clone(), s.name.clone()))
            .collect();
        names.sort();
        names
    }

    /// Number of registered sequences
    #[must_use]
    pub fn len(&self) -> usize {
        self.sequences
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{Beat, Movement};

    fn basic() -> MusicalSequence {
        MusicalSequence::new("basic-test-seq", "Basic Test Sequence").with_movement(
            Movement::new("main", "Main")
                .with_beat(Beat::new(3, "test:complete", "testComplete"))
                .with_beat(Beat::new(1, "test:start", "testStart"))
                .with_beat(Beat::new(2, "test:process", "testProcess")),
        )
    }

    #[test]
    fn test_register_sorts_beats() {
        let registry = SequenceRegistry::new();
        let stored = registry.register(basic()).unwrap();
        let numbers: Vec<u32> = stored.movements[0].beats.iter().map(|b| b.beat).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(registry.list(), vec!["basic-test-seq".to_string()]);
    }

    #[test]
    fn test_validation_collects_all_violations() {
        let registry = SequenceRegistry::new();
        let bad = MusicalSequence::new("", "")
            .with_tempo(0.0)
            .with_movement(
                Movement::new("m", "M")
                    .with_beat(Beat::new(1, "", "h"))
                    .with_beat(Beat::new(1, "e", "")),
            );

        let err = registry.register(bad).unwrap_err();
        match err {
            Error::Validation { violations, .. } => {
                assert_eq!(violations.len(), 6, "{violations:?}");
            }
            other => panic!("expected Validation, got {other:?}"),
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_empty_movements_rejected() {
        let registry = SequenceRegistry::new();
        let err = registry
            .register(MusicalSequence::new("empty", "Empty"))
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_duplicate_rejected_by_default() {
        let registry = SequenceRegistry::new();
        registry.register(basic()).unwrap();

        // identical re-registration is a no-op
        registry.register(basic()).unwrap();

        let changed = basic().with_description("changed");
        let err = registry.register(changed).unwrap_err();
        assert!(matches!(err, Error::DuplicateSequence { .. }));
        assert_eq!(registry.get("basic-test-seq").unwrap().description, "");
    }

    #[test]
    fn test_replace_policy_swaps_definition() {
        let registry = SequenceRegistry::with_policy(RegistrationPolicy::Replace);
        let first = registry.register(basic()).unwrap();
        let second = registry
            .register(basic().with_description("v2"))
            .unwrap();

        assert_eq!(first.description, "");
        assert_eq!(second.description, "v2");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_parse_sequence_json() {
        let json = r#"{
            "id": "library-load",
            "name": "Library Load",
            "movements": [{
                "id": "load",
                "name": "Load",
                "beats": [
                    { "beat": 1, "event": "library:load", "handler": "loadComponents", "dynamics": "forte" },
                    { "beat": 2, "event": "library:notify", "handler": "notifyUi", "timing": "after-beat" }
                ]
            }]
        }"#;

        let sequence = parse_sequence_json(json).unwrap();
        assert_eq!(sequence.tempo, 120.0);
        assert_eq!(sequence.movements[0].beats[1].timing, crate::sequence::Timing::AfterBeat);
    }

    #[test]
    fn test_parse_sequence_json_missing_fields() {
        let json = r#"{ "id": "x", "movements": [{ "id": "m", "beats": [{ "beat": 1 }] }] }"#;
        let err = parse_sequence_json(json).unwrap_err();
        match err {
            Error::Validation { violations, .. } => {
                assert!(violations.iter().any(|v| v.contains("name")));
                assert!(violations.iter().any(|v| v.contains("event")));
                assert!(violations.iter().any(|v| v.contains("handler")));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }
}
