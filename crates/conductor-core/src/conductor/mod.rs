//! Conductor - the orchestration engine
//!
//! This module resolves a plugin and a sequence, admits the play through the
//! per-plugin queue, then runs the beats in order, publishing lifecycle
//! events on the bus as it goes.
//!
//! # Module Structure
//!
//! - `types`: Play records and snapshots (PlayResult, BeatRecord, ConductorStatus, etc.)
//! - `config`: Configuration types (ConductorConfig, ErrorPolicy)
//! - `context`: BeatContext handed to handlers
//! - `core`: Conductor struct, builder and introspection methods
//! - `process`: The play loop
//! - `helpers`: Utility methods (emit, payload merging, timeouts)

mod config;
mod context;
mod core;
mod helpers;
mod process;
mod types;


// Re-export public types
pub use config::{ConductorConfig, EngineConfig, ErrorPolicy, EventsConfig, RegistryConfig};
pub use context::{Adapter, BeatContext};
pub use core::Conductor;
pub use types::{
    ActivePlay, BeatRecord, BeatStatus, ConductorStatus, PlayResult, PlayState, PlayStatus,
};
