use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::{BusEvent, ConductorEvent};

/// Callback invoked synchronously for every publication of a subscribed event.
///
/// Returning `Err` (or panicking) is logged and never reaches the publisher.
pub type EventCallback = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

struct Subscriber {
    id: u64,
    context: Option<String>,
    callback: EventCallback,
}

struct Inner {
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
    tap: broadcast::Sender<BusEvent>,
}

impl Inner {
    fn remove(&self, event: &str, id: u64) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(list) = subscribers.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(event);
        }
        removed
    }
}

/// In-memory publish/subscribe bus.
///
/// Subscribers are keyed by event name and invoked in subscription order.
/// Every publication is also forwarded to a `tokio::broadcast` tap so async
/// observers can follow the whole stream; slow tappers lag rather than
/// blocking the publisher.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("events", &self.event_names())
            .finish()
    }
}

impl EventBus {
    /// Create a new EventBus with the given tap capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tap, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                tap,
            }),
        }
    }

    /// Subscribe `callback` to `event`.
    ///
    /// The returned [`Subscription`] removes exactly this registration.
    /// Dropping it does not unsubscribe.
    pub fn subscribe<F>(&self, event: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add(event.into(), None, Arc::new(callback))
    }

    /// Subscribe with an owner label (plugin id, component name).
    pub fn subscribe_with_context<F>(
        &self,
        event: impl Into<String>,
        context: impl Into<String>,
        callback: F,
    ) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add(event.into(), Some(context.into()), Arc::new(callback))
    }

    /// Subscribe an already shared callback, so it can later be passed to
    /// [`EventBus::unsubscribe`].
    pub fn subscribe_callback(
        &self,
        event: impl Into<String>,
        callback: EventCallback,
    ) -> Subscription {
        self.add(event.into(), None, callback)
    }

    fn add(
        &self,
        event: String,
        context: Option<String>,
        callback: EventCallback,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(event = %event, id, context = ?context, "Subscribing");
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.clone())
            .or_default()
            .push(Subscriber {
                id,
                context,
                callback,
            });
        Subscription {
            bus: Arc::downgrade(&self.inner),
            event,
            id,
        }
    }

    /// Remove every registration of `callback` on `event`.
    ///
    /// Callbacks are compared by `Arc` identity. Returns whether anything was
    /// removed; removing an absent callback is a no-op.
    pub fn unsubscribe(&self, event: &str, callback: &EventCallback) -> bool {
        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(list) = subscribers.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|s| !Arc::ptr_eq(&s.callback, callback));
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(event);
        }
        removed
    }

    /// Remove all registrations made with the given owner label.
    pub fn unsubscribe_context(&self, context: &str) -> usize {
        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        for list in subscribers.values_mut() {
            let before = list.len();
            list.retain(|s| s.context.as_deref() != Some(context));
            removed += before - list.len();
        }
        subscribers.retain(|_, list| !list.is_empty());
        removed
    }

    /// Publish `payload` to every current subscriber of `event`.
    ///
    /// Subscribers run synchronously in subscription order, outside the
    /// registry lock, so they may subscribe or unsubscribe re-entrantly.
    /// Returns the number of subscribers that completed without error.
    pub fn publish(&self, event: &str, payload: Value) -> usize {
        let callbacks: Vec<(u64, Option<String>, EventCallback)> = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map(|list| {
                list.iter()
                    .map(|s| (s.id, s.context.clone(), Arc::clone(&s.callback)))
                    .collect()
            })
            .unwrap_or_default();

        let mut delivered = 0;
        for (id, context, callback) in callbacks {
            match std::panic::catch_unwind(AssertUnwindSafe(|| callback(&payload))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(
                        event = %event,
                        subscriber = id,
                        context = ?context,
                        error = %format!("{e:#}"),
                        "Subscriber failed"
                    );
                }
                Err(panic) => {
                    warn!(
                        event = %event,
                        subscriber = id,
                        context = ?context,
                        panic = %describe_panic(panic.as_ref()),
                        "Subscriber panicked"
                    );
                }
            }
        }

        if self.inner.tap.receiver_count() > 0 {
            // send() only fails when every tapper has gone away
            let _ = self.inner.tap.send(BusEvent {
                name: event.to_string(),
                payload,
            });
        }

        delivered
    }

    /// Publish a typed lifecycle event under its literal name.
    pub fn emit(&self, event: ConductorEvent) -> usize {
        self.publish(event.name(), event.to_payload())
    }

    /// Observe every publication, regardless of event name.
    #[must_use]
    pub fn tap(&self) -> broadcast::Receiver<BusEvent> {
        self.inner.tap.subscribe()
    }

    /// Register interest in the next publication of `event`.
    ///
    /// The subscription is live as soon as this returns, so a signal published
    /// between this call and [`SignalWait::wait`] is not lost.
    #[must_use]
    pub fn prepare_wait(&self, event: impl Into<String>) -> SignalWait {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let subscription = self.subscribe(event, move |payload| {
            if let Some(tx) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                let _ = tx.send(payload.clone());
            }
            Ok(())
        });
        SignalWait {
            subscription,
            rx: Some(rx),
        }
    }

    /// Await the next publication of `event`.
    pub async fn wait_for(
        &self,
        event: impl Into<String>,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<Value, WaitError> {
        self.prepare_wait(event).wait(cancel, timeout).await
    }

    /// Number of subscribers currently registered for `event`.
    #[must_use]
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Event names with at least one subscriber, sorted.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Handle to a single registration on the bus.
#[derive(Debug)]
#[must_use = "a subscription is only removable through its handle"]
pub struct Subscription {
    bus: Weak<Inner>,
    event: String,
    id: u64,
}

impl Subscription {
    /// Event name this subscription listens to.
    #[must_use]
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Remove this registration. Idempotent.
    pub fn unsubscribe(&self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => inner.remove(&self.event, self.id),
            None => false,
        }
    }
}

/// Why a [`SignalWait`] ended without a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    /// Cancellation token fired
    #[error("wait cancelled")]
    Cancelled,
    /// No signal within the timeout
    #[error("no signal after {0:?}")]
    TimedOut(Duration),
    /// The bus was dropped
    #[error("event bus closed")]
    Closed,
}

/// Pending wait for one publication, created by [`EventBus::prepare_wait`].
///
/// Unsubscribes when dropped.
#[derive(Debug)]
pub struct SignalWait {
    subscription: Subscription,
    rx: Option<oneshot::Receiver<Value>>,
}

impl SignalWait {
    /// Await the signal, honouring cancellation and an optional timeout.
    pub async fn wait(
        mut self,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<Value, WaitError> {
        let Some(rx) = self.rx.take() else {
            return Err(WaitError::Closed);
        };
        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WaitError::Cancelled),
            received = rx => received.map_err(|_| WaitError::Closed),
            _ = deadline => Err(WaitError::TimedOut(timeout.unwrap_or_default())),
        }
    }
}

impl Drop for SignalWait {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn describe_panic(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
