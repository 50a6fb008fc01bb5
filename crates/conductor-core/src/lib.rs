//! Conductor Core - Sequence Orchestration Engine
//!
//! This crate provides the in-process orchestration core:
//! - Sequences: declarative movements and beats, validated and registered
//! - Event bus: named publish/subscribe with fault-isolated subscribers
//! - Plugins: handler maps mounted per plugin, manifest-driven bootstrap
//! - Conductor: plays sequences beat by beat against a plugin's handlers
//! - Queue: per-plugin admission by priority class
//! - Client: the narrow public surface applications use
//!
//! ```ignore
//! use conductor_core::{Conductor, ConductorConfig, HandlerMap, SequencePriority};
//!
//! let client = Conductor::new(ConductorConfig::default()).into_client();
//! let report = client.register_cia_plugins(&manifest, &catalog);
//! let result = client
//!     .play("LibraryPlugin", "library-load", json!({}), SequencePriority::Normal)
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod conductor;
pub mod error;
pub mod event_bus;
pub mod plugin;
pub mod queue;
pub mod sequence;
pub mod stats;

pub use client::ConductorClient;
pub use conductor::{
    ActivePlay, Adapter, BeatContext, BeatRecord, BeatStatus, Conductor, ConductorConfig,
    ConductorStatus, EngineConfig, ErrorPolicy, EventsConfig, PlayResult, PlayState, PlayStatus,
    RegistryConfig,
};
pub use error::{format_error_for_cli, Error, Result, UserFriendlyError};
pub use event_bus::{
    names, BusEvent, ConductorEvent, EventBus, EventCallback, SignalWait, Subscription, WaitError,
};
pub use plugin::{
    async_handler_fn, handler_fn, register_plugins, BeatHandler, BeatOutput, BootstrapReport,
    HandlerMap, LoadedPlugin, MountOutcome, MountTable, MountedPluginInfo, Plugin, PluginCatalog,
    PluginEntry, PluginFailure, PluginManifest, PluginMount, PluginRegistrar, RuntimeEntry,
    SequencePlugin, UiEntry,
};
pub use queue::{PlayPermit, PlayQueue, QueueConfig, QueueMode};
pub use sequence::{
    parse_sequence_json, validate_sequence, validated, Beat, BeatKind, Dynamics, Movement,
    MusicalSequence, Registration, RegistrationPolicy, SequencePriority, SequenceRegistry, Timing,
};
pub use stats::{ConductorStatistics, SequenceStats, StatisticsCollector};
