//! Handlers - beat handler trait and the per-plugin handler map
//!
//! Beats name their handler by string. The indirection is kept, but the
//! names map to typed [`BeatHandler`] trait objects registered through
//! [`HandlerMap`] helpers rather than untyped lookups.

use crate::conductor::BeatContext;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Value a handler hands back to the conductor.
///
/// An object is merged key by key into the play payload; any other value is
/// stored under the handler's name; `None` leaves the payload untouched.
pub type BeatOutput = Option<Value>;

/// Trait for beat handler implementations
#[async_trait::async_trait]
pub trait BeatHandler: Send + Sync {
    /// Perform the beat.
    ///
    /// `data` is a snapshot of the play payload (original context merged with
    /// earlier outputs); `ctx` exposes the live payload, beat metadata, the
    /// conductor for nested plays and injected adapters.
    async fn handle(&self, data: Value, ctx: BeatContext) -> anyhow::Result<BeatOutput>;
}

struct FnHandler<F>(F);

#[async_trait::async_trait]
impl<F> BeatHandler for FnHandler<F>
where
    F: Fn(Value, &BeatContext) -> anyhow::Result<BeatOutput> + Send + Sync,
{
    async fn handle(&self, data: Value, ctx: BeatContext) -> anyhow::Result<BeatOutput> {
        (self.0)(data, &ctx)
    }
}

struct AsyncFnHandler<F, Fut> {
    f: F,
    _output: PhantomData<fn() -> Fut>,
}

#[async_trait::async_trait]
impl<F, Fut> BeatHandler for AsyncFnHandler<F, Fut>
where
    F: Fn(Value, BeatContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<BeatOutput>> + Send + 'static,
{
    async fn handle(&self, data: Value, ctx: BeatContext) -> anyhow::Result<BeatOutput> {
        (self.f)(data, ctx).await
    }
}

/// Wrap a synchronous closure as a handler
pub fn handler_fn<F>(f: F) -> Arc<dyn BeatHandler>
where
    F: Fn(Value, &BeatContext) -> anyhow::Result<BeatOutput> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Wrap an async closure as a handler
pub fn async_handler_fn<F, Fut>(f: F) -> Arc<dyn BeatHandler>
where
    F: Fn(Value, BeatContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<BeatOutput>> + Send + 'static,
{
    Arc::new(AsyncFnHandler {
        f,
        _output: PhantomData,
    })
}

/// Handlers exported by one plugin, keyed by name
#[derive(Clone, Default)]
pub struct HandlerMap {
    handlers: HashMap<String, Arc<dyn BeatHandler>>,
}

impl std::fmt::Debug for HandlerMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

impl HandlerMap {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler, replacing any previous binding of the same name
    pub fn insert(&mut self, name: impl Into<String>, handler: Arc<dyn BeatHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Bind a handler (builder form)
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, handler: Arc<dyn BeatHandler>) -> Self {
        self.insert(name, handler);
        self
    }

    /// Bind a synchronous closure
    #[must_use]
    pub fn with_fn<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, &BeatContext) -> anyhow::Result<BeatOutput> + Send + Sync + 'static,
    {
        self.with(name, handler_fn(f))
    }

    /// Bind an async closure
    #[must_use]
    pub fn with_async<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, BeatContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<BeatOutput>> + Send + 'static,
    {
        self.with(name, async_handler_fn(f))
    }

    /// Merge `other` into this map; bindings in `other` win
    pub fn extend(&mut self, other: HandlerMap) {
        self.handlers.extend(other.handlers);
    }

    /// Get a handler by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn BeatHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Check if a handler exists
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Handler names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of handlers
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the map is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
