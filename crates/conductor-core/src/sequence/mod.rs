//! Sequences - declarative orchestration scripts and their registry.
//!
//! A [`MusicalSequence`] is a list of movements, each an ordered list of
//! beats. Every beat names the event it publishes and the handler that
//! performs it. The [`SequenceRegistry`] validates definitions up front and
//! stores them immutably.

mod registry;
mod types;

pub use registry::{
    parse_sequence_json, validate_sequence, validated, Registration, RegistrationPolicy,
    SequenceRegistry,
};
pub use types::{Beat, BeatKind, Dynamics, Movement, MusicalSequence, SequencePriority, Timing};
