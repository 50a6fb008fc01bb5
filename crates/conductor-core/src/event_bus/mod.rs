//! EventBus - named-event publish/subscribe for conductor lifecycle events.
//!
//! Plugins and hosts subscribe callbacks to event names; the conductor
//! publishes `beat:*` and `sequence:*` lifecycle events plus each beat's own
//! declared event. A broadcast tap mirrors every publication for async
//! observers, and [`EventBus::wait_for`] turns a publication into an
//! awaitable signal for synchronized beats.

/// Core event bus implementation (subscriber registry + broadcast tap).
pub mod bus;
/// Event type definitions for conductor lifecycle.
pub mod types;

pub(crate) use bus::describe_panic;
pub use bus::{EventBus, EventCallback, SignalWait, Subscription, WaitError};
pub use types::{names, BusEvent, ConductorEvent};
