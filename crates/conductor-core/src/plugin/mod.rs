//! Plugin - handlers, mount table and manifest-driven loading

mod handler;
mod loader;
mod manifest;
mod mount;

pub use handler::{async_handler_fn, handler_fn, BeatHandler, BeatOutput, HandlerMap};
pub use loader::{
    register_plugins, BootstrapReport, LoadedPlugin, Plugin, PluginCatalog, PluginFailure,
    PluginRegistrar, SequencePlugin,
};
pub use manifest::{PluginEntry, PluginManifest, RuntimeEntry, UiEntry};
pub use mount::{MountOutcome, MountTable, MountedPluginInfo, PluginMount};
